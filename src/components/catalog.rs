// =============================================================================
// Component Catalog: Default directors and specialists
// =============================================================================
//
// The process-wide set of signal components registered once at startup.
// Directors group related specialists; both kinds can be scored. Seed weights
// are priors only: the learner moves them as outcomes arrive.
// =============================================================================

use tracing::info;

use crate::components::registry::{ComponentRegistry, ComponentSpec, RegistryError};
use crate::types::{Regime, ScoreRange};

/// Return the default component catalog, directors first.
pub fn default_catalog() -> Vec<ComponentSpec> {
    vec![
        // ── Directors ──────────────────────────────────────────────
        ComponentSpec::director(
            "fundamentals",
            "Blends company-level fundamentals: earnings quality, guidance \
             revisions and insider flows.",
        )
        .with_weight(0.20),
        ComponentSpec::director(
            "sentiment",
            "Aggregated news and social tone toward the ticker.",
        )
        .with_weight(0.15),
        ComponentSpec::director(
            "technical",
            "Price-action view: momentum, mean reversion and volatility state.",
        )
        .with_weight(0.15),
        ComponentSpec::director(
            "innovation",
            "Long-horizon innovation signals from patents and regulatory filings.",
        )
        .with_weight(0.10),
        // ── Fundamentals specialists ───────────────────────────────
        ComponentSpec::specialist(
            "earnings_confidence",
            "fundamentals",
            "Probability that the next report beats consensus.",
        )
        .with_weight(0.25)
        .with_regime_weight(Regime::StressedTrend, 0.15),
        ComponentSpec::specialist(
            "guidance_revision",
            "fundamentals",
            "Direction and size of the latest guidance revision.",
        )
        .with_range(ScoreRange::Signed)
        .with_weight(0.20),
        ComponentSpec::specialist(
            "insider_activity",
            "fundamentals",
            "Net insider buying versus selling over the last quarter.",
        )
        .with_range(ScoreRange::Signed)
        .with_weight(0.10),
        // ── Sentiment specialists ──────────────────────────────────
        ComponentSpec::specialist(
            "news_sentiment",
            "sentiment",
            "Tone of recent headlines, scored by the text judgement provider.",
        )
        .with_range(ScoreRange::Signed)
        .with_weight(0.15)
        .with_regime_weight(Regime::Crisis, 0.05),
        ComponentSpec::specialist(
            "social_momentum",
            "sentiment",
            "Acceleration of social mentions, signed by tone.",
        )
        .with_range(ScoreRange::Signed)
        .with_weight(0.05),
        // ── Technical specialists ──────────────────────────────────
        ComponentSpec::specialist(
            "price_momentum",
            "technical",
            "Trend persistence over the intermediate horizon.",
        )
        .with_range(ScoreRange::Signed)
        .with_weight(0.15)
        .with_regime_weight(Regime::CalmTrend, 0.30)
        .with_regime_weight(Regime::CalmRange, 0.05),
        ComponentSpec::specialist(
            "mean_reversion",
            "technical",
            "Distance from the rolling mean, faded.",
        )
        .with_range(ScoreRange::Signed)
        .with_weight(0.10)
        .with_regime_weight(Regime::CalmRange, 0.25)
        .with_regime_weight(Regime::CalmTrend, 0.05),
        // ── Innovation specialists ─────────────────────────────────
        ComponentSpec::specialist(
            "patent_velocity",
            "innovation",
            "Rate of new patent grants relative to sector peers.",
        )
        .with_weight(0.05),
        ComponentSpec::specialist(
            "filing_anomaly",
            "innovation",
            "Unusual language or timing in regulatory filings (high = benign).",
        )
        .with_weight(0.10),
    ]
}

/// Register every spec in order. Stops at the first failure.
pub fn register_catalog(
    registry: &ComponentRegistry,
    specs: Vec<ComponentSpec>,
) -> Result<usize, RegistryError> {
    let count = specs.len();
    for spec in specs {
        registry.register(spec)?;
    }
    info!(count, "component catalog registered");
    Ok(count)
}
