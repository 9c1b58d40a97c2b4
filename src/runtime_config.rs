// =============================================================================
// Runtime Configuration: Engine tunables with atomic save
// =============================================================================
//
// Every tunable of the council lives here: registry bookkeeping, the weight
// learner, regime reference profiles, the crisis monitor's cadence/budget/
// policy, aggregation thresholds and the ticker -> sector directory.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Regime;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_trust_smoothing() -> f64 {
    // EMA factor 2 / (N + 1) with N = 50 observations.
    2.0 / 51.0
}

fn default_initial_trust() -> f64 {
    0.5
}

fn default_component_weight() -> f64 {
    0.1
}

fn default_deactivate_min_samples() -> u64 {
    30
}

fn default_deactivate_trust_floor() -> f64 {
    0.3
}

fn default_base_learning_rate() -> f64 {
    0.05
}

fn default_decay_horizon() -> f64 {
    25.0
}

fn default_weight_clip() -> f64 {
    1.0
}

fn default_cold_start_min_observations() -> u64 {
    10
}

fn default_window_size() -> usize {
    60
}

fn default_min_observations() -> usize {
    20
}

fn default_hysteresis_margin() -> f64 {
    0.05
}

fn default_regime_update_secs() -> u64 {
    300
}

fn default_volatility_scale() -> f64 {
    1.0
}

fn default_normal_interval_secs() -> u64 {
    900
}

fn default_elevated_interval_secs() -> u64 {
    300
}

fn default_crisis_interval_secs() -> u64 {
    60
}

fn default_daily_budget() -> u32 {
    500
}

fn default_scan_cost() -> u32 {
    1
}

fn default_verify_cost() -> u32 {
    5
}

fn default_cache_ttl_secs() -> i64 {
    1800
}

fn default_alert_ttl_secs() -> i64 {
    6 * 3600
}

fn default_borderline_threshold() -> f64 {
    0.3
}

fn default_escalation_threshold() -> f64 {
    0.5
}

fn default_min_credibility() -> f64 {
    0.5
}

fn default_calm_polls_to_relax() -> u32 {
    3
}

fn default_detector_timeout_secs() -> u64 {
    10
}

fn default_buy_threshold() -> f64 {
    0.6
}

fn default_sell_threshold() -> f64 {
    0.4
}

fn default_low_confidence_penalty() -> f64 {
    0.75
}

fn default_high_confidence() -> f64 {
    0.7
}

fn default_moderate_confidence() -> f64 {
    0.4
}

fn default_record_max() -> u8 {
    3
}

fn default_elevate_max() -> u8 {
    6
}

fn default_blacklist_max() -> u8 {
    8
}

fn default_profiles() -> Vec<RegimeProfile> {
    vec![
        RegimeProfile::new(Regime::CalmTrend, 0.8, 0.45, 0.30),
        RegimeProfile::new(Regime::CalmRange, 0.7, 0.0, 0.0),
        RegimeProfile::new(Regime::StressedTrend, 2.0, -0.35, -0.30),
        RegimeProfile::new(Regime::Crisis, 4.0, -0.60, -0.70),
    ]
}

fn default_sectors() -> HashMap<String, String> {
    [
        ("JPM", "financials"),
        ("BAC", "financials"),
        ("GS", "financials"),
        ("WFC", "financials"),
        ("AAPL", "technology"),
        ("MSFT", "technology"),
        ("NVDA", "technology"),
        ("XOM", "energy"),
        ("CVX", "energy"),
        ("PFE", "healthcare"),
        ("JNJ", "healthcare"),
        ("BA", "industrials"),
    ]
    .into_iter()
    .map(|(t, s)| (t.to_string(), s.to_string()))
    .collect()
}

// =============================================================================
// Registry
// =============================================================================

/// Bookkeeping parameters for the component registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryParams {
    /// EMA smoothing factor for the trust score.
    #[serde(default = "default_trust_smoothing")]
    pub trust_smoothing: f64,

    /// Trust assigned to a freshly registered component.
    #[serde(default = "default_initial_trust")]
    pub initial_trust: f64,

    /// Global weight used when a component is registered without one.
    #[serde(default = "default_component_weight")]
    pub default_weight: f64,

    /// Minimum lifetime participations before deactivation is considered.
    #[serde(default = "default_deactivate_min_samples")]
    pub deactivate_min_samples: u64,

    /// Trust below which a well-sampled component is deactivated.
    #[serde(default = "default_deactivate_trust_floor")]
    pub deactivate_trust_floor: f64,
}

impl Default for RegistryParams {
    fn default() -> Self {
        Self {
            trust_smoothing: default_trust_smoothing(),
            initial_trust: default_initial_trust(),
            default_weight: default_component_weight(),
            deactivate_min_samples: default_deactivate_min_samples(),
            deactivate_trust_floor: default_deactivate_trust_floor(),
        }
    }
}

// =============================================================================
// Weight learner
// =============================================================================

/// Online learning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerParams {
    /// Step size applied to the very first observation of a pair.
    #[serde(default = "default_base_learning_rate")]
    pub base_learning_rate: f64,

    /// Observation count at which the step size has halved.
    #[serde(default = "default_decay_horizon")]
    pub decay_horizon: f64,

    /// Weights are clipped to `[-weight_clip, weight_clip]`.
    #[serde(default = "default_weight_clip")]
    pub weight_clip: f64,

    /// When false the lower clip bound is 0 ("avoid" weights disabled).
    #[serde(default = "default_true")]
    pub allow_negative_weights: bool,

    /// Observations a (component, regime) pair needs before its learned
    /// weight replaces the global fallback.
    #[serde(default = "default_cold_start_min_observations")]
    pub cold_start_min_observations: u64,
}

impl Default for LearnerParams {
    fn default() -> Self {
        Self {
            base_learning_rate: default_base_learning_rate(),
            decay_horizon: default_decay_horizon(),
            weight_clip: default_weight_clip(),
            allow_negative_weights: true,
            cold_start_min_observations: default_cold_start_min_observations(),
        }
    }
}

impl LearnerParams {
    /// Inclusive clip bounds for learned weights.
    pub fn clip_bounds(&self) -> (f64, f64) {
        let hi = self.weight_clip.abs();
        let lo = if self.allow_negative_weights { -hi } else { 0.0 };
        (lo, hi)
    }
}

// =============================================================================
// Regime detection
// =============================================================================

/// Reference feature profile for one regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeProfile {
    pub regime: Regime,
    /// Std-dev of market returns, in percent.
    pub volatility: f64,
    /// Signed efficiency ratio in [-1, 1].
    pub trend: f64,
    /// Mean advance/decline balance in [-1, 1].
    pub breadth: f64,
}

impl RegimeProfile {
    pub fn new(regime: Regime, volatility: f64, trend: f64, breadth: f64) -> Self {
        Self {
            regime,
            volatility,
            trend,
            breadth,
        }
    }
}

/// Regime detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Maximum observations retained in the rolling window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Observations required before a classification is trusted.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,

    /// Distance slack within which the previous regime is retained.
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,

    /// Regime reported before enough data has accumulated.
    #[serde(default)]
    pub default_regime: Regime,

    /// Cadence of the background regime update loop.
    #[serde(default = "default_regime_update_secs")]
    pub update_interval_secs: u64,

    /// Divisor applied to the volatility feature before distance scoring.
    #[serde(default = "default_volatility_scale")]
    pub volatility_scale: f64,

    #[serde(default = "default_profiles")]
    pub profiles: Vec<RegimeProfile>,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_observations: default_min_observations(),
            hysteresis_margin: default_hysteresis_margin(),
            default_regime: Regime::default(),
            update_interval_secs: default_regime_update_secs(),
            volatility_scale: default_volatility_scale(),
            profiles: default_profiles(),
        }
    }
}

// =============================================================================
// Crisis monitor
// =============================================================================

/// Severity bands mapping a verified alert to an action.
///
/// `1..=record_max` records only, `..=elevate_max` raises the polling mode,
/// `..=blacklist_max` blacklists affected sectors, anything above blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityPolicy {
    #[serde(default = "default_record_max")]
    pub record_max: u8,
    #[serde(default = "default_elevate_max")]
    pub elevate_max: u8,
    #[serde(default = "default_blacklist_max")]
    pub blacklist_max: u8,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            record_max: default_record_max(),
            elevate_max: default_elevate_max(),
            blacklist_max: default_blacklist_max(),
        }
    }
}

/// Crisis monitor cadence, budget and escalation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorParams {
    #[serde(default = "default_normal_interval_secs")]
    pub normal_interval_secs: u64,

    #[serde(default = "default_elevated_interval_secs")]
    pub elevated_interval_secs: u64,

    #[serde(default = "default_crisis_interval_secs")]
    pub crisis_interval_secs: u64,

    /// Hard ceiling of cost units per UTC day.
    #[serde(default = "default_daily_budget")]
    pub daily_budget: u32,

    /// Cost charged per cache-missing scanned topic.
    #[serde(default = "default_scan_cost")]
    pub scan_cost: u32,

    /// Cost charged per deep verification.
    #[serde(default = "default_verify_cost")]
    pub verify_cost: u32,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: i64,

    #[serde(default = "default_alert_ttl_secs")]
    pub alert_ttl_secs: i64,

    /// Scan confidence at which polling tightens to ELEVATED.
    #[serde(default = "default_borderline_threshold")]
    pub borderline_threshold: f64,

    /// Scan confidence at which a deep verification is issued.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,

    /// Alerts less credible than this are recorded but never acted on.
    #[serde(default = "default_min_credibility")]
    pub min_credibility: f64,

    /// Consecutive calm polls before the polling mode steps down.
    #[serde(default = "default_calm_polls_to_relax")]
    pub calm_polls_to_relax: u32,

    #[serde(default)]
    pub severity: SeverityPolicy,

    /// Base URL of the event-detection provider. `None` runs idle.
    #[serde(default)]
    pub detector_url: Option<String>,

    #[serde(default = "default_detector_timeout_secs")]
    pub detector_timeout_secs: u64,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            normal_interval_secs: default_normal_interval_secs(),
            elevated_interval_secs: default_elevated_interval_secs(),
            crisis_interval_secs: default_crisis_interval_secs(),
            daily_budget: default_daily_budget(),
            scan_cost: default_scan_cost(),
            verify_cost: default_verify_cost(),
            cache_ttl_secs: default_cache_ttl_secs(),
            alert_ttl_secs: default_alert_ttl_secs(),
            borderline_threshold: default_borderline_threshold(),
            escalation_threshold: default_escalation_threshold(),
            min_credibility: default_min_credibility(),
            calm_polls_to_relax: default_calm_polls_to_relax(),
            severity: SeverityPolicy::default(),
            detector_url: None,
            detector_timeout_secs: default_detector_timeout_secs(),
        }
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// Thresholds turning an aggregate score into an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorParams {
    /// Aggregate at or above which the action is BUY.
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,

    /// Aggregate at or below which the action is SELL.
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,

    /// Confidence multiplier applied while the regime is low-confidence.
    #[serde(default = "default_low_confidence_penalty")]
    pub low_confidence_penalty: f64,

    /// Confidence label bands used in the rationale.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,

    #[serde(default = "default_moderate_confidence")]
    pub moderate_confidence: f64,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            buy_threshold: default_buy_threshold(),
            sell_threshold: default_sell_threshold(),
            low_confidence_penalty: default_low_confidence_penalty(),
            high_confidence: default_high_confidence(),
            moderate_confidence: default_moderate_confidence(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the council.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub registry: RegistryParams,

    #[serde(default)]
    pub learner: LearnerParams,

    #[serde(default)]
    pub regime: RegimeConfig,

    #[serde(default)]
    pub monitor: MonitorParams,

    #[serde(default)]
    pub aggregator: AggregatorParams,

    /// Ticker -> sector directory used for sector blacklists.
    #[serde(default = "default_sectors")]
    pub sectors: HashMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            registry: RegistryParams::default(),
            learner: LearnerParams::default(),
            regime: RegimeConfig::default(),
            monitor: MonitorParams::default(),
            aggregator: AggregatorParams::default(),
            sectors: default_sectors(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            daily_budget = config.monitor.daily_budget,
            sectors = config.sectors.len(),
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.monitor.normal_interval_secs, 900);
        assert_eq!(cfg.monitor.elevated_interval_secs, 300);
        assert_eq!(cfg.monitor.crisis_interval_secs, 60);
        assert!((cfg.monitor.escalation_threshold - 0.5).abs() < f64::EPSILON);
        assert!(cfg.learner.allow_negative_weights);
        assert_eq!(cfg.regime.profiles.len(), 4);
        assert_eq!(cfg.regime.default_regime, Regime::CalmRange);
        assert!((cfg.registry.trust_smoothing - 2.0 / 51.0).abs() < 1e-12);
        assert_eq!(cfg.sectors.get("JPM").map(String::as_str), Some("financials"));
    }

    #[test]
    fn default_and_empty_json_share_sector_directory() {
        let built = RuntimeConfig::default();
        let parsed: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert!(!built.sectors.is_empty());
        assert_eq!(built.sectors, parsed.sectors);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.monitor.daily_budget, 500);
        assert_eq!(cfg.learner.cold_start_min_observations, 10);
        assert_eq!(cfg.monitor.severity.blacklist_max, 8);
        assert!(cfg.monitor.detector_url.is_none());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "monitor": { "daily_budget": 10 }, "learner": { "allow_negative_weights": false } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.monitor.daily_budget, 10);
        assert_eq!(cfg.monitor.verify_cost, 5);
        assert_eq!(cfg.learner.clip_bounds(), (0.0, 1.0));
        assert_eq!(cfg.regime.window_size, 60);
    }

    #[test]
    fn clip_bounds_are_symmetric_by_default() {
        let params = LearnerParams::default();
        assert_eq!(params.clip_bounds(), (-1.0, 1.0));
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = std::env::temp_dir().join(format!("council-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("council_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.monitor.daily_budget = 42;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.monitor.daily_budget, 42);
        assert!(!path.with_extension("json.tmp").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
