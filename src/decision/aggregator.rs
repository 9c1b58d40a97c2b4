// =============================================================================
// Decision Aggregator: Regime-aware, override-gated signal combination
// =============================================================================
//
// For the components present in a request:
//
//   u_i   = score mapped onto [0, 1]        (Signed: (s + 1) / 2)
//   u_i'  = 1 - u_i if w_i < 0 else u_i     (negative weight inverts)
//   a_i   = |w_i| / Σ|w|                    (applied weight)
//   aggregate = Σ a_i · u_i'
//
// Confidence = 1 - disagreement · evenness, where
//
//   disagreement = Σ a_i (u_i' - aggregate)² / 0.25     (max variance on [0,1])
//   evenness     = (1 - HHI) / (1 - 1/k),  HHI = Σ a_i²   (0 when k = 1)
//
// so one dominant component or unanimous components give high confidence,
// and evenly weighted components pulling apart give low confidence.
//
// The aggregator only reads: registry weights under one read lock, a regime
// snapshot and the published override Arc. It never awaits.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::ComponentRegistry;
use crate::crisis::{CrisisMonitor, OverrideState, OverrideStatus};
use crate::decision::record::{Decision, DecisionEntry, Verdict};
use crate::regime::{RegimeDetector, RegimeSnapshot};
use crate::runtime_config::AggregatorParams;
use crate::types::Action;

/// Maximum variance of a distribution on [0, 1].
const MAX_UNIT_VARIANCE: f64 = 0.25;

/// One component score supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    pub component_id: String,
    pub score: f64,
}

impl ComponentScore {
    pub fn new(component_id: impl Into<String>, score: f64) -> Self {
        Self {
            component_id: component_id.into(),
            score,
        }
    }
}

/// Aggregate and confidence for a set of (unit score, learned weight) pairs.
/// Returns the applied weights alongside, in input order.
pub fn combine(inputs: &[(f64, f64)]) -> (f64, f64, Vec<f64>) {
    let total: f64 = inputs.iter().map(|(_, w)| w.abs()).sum();
    if total <= f64::EPSILON {
        return (0.5, 0.0, vec![0.0; inputs.len()]);
    }

    let applied: Vec<f64> = inputs.iter().map(|(_, w)| w.abs() / total).collect();
    let oriented: Vec<f64> = inputs
        .iter()
        .map(|(u, w)| if *w < 0.0 { 1.0 - u } else { *u })
        .collect();

    let aggregate: f64 = applied.iter().zip(&oriented).map(|(a, u)| a * u).sum();

    let variance: f64 = applied
        .iter()
        .zip(&oriented)
        .map(|(a, u)| a * (u - aggregate).powi(2))
        .sum();
    let disagreement = (variance / MAX_UNIT_VARIANCE).clamp(0.0, 1.0);

    let k = applied.iter().filter(|a| **a > 0.0).count();
    let evenness = if k <= 1 {
        0.0
    } else {
        let hhi: f64 = applied.iter().map(|a| a * a).sum();
        ((1.0 - hhi) / (1.0 - 1.0 / k as f64)).clamp(0.0, 1.0)
    };

    let confidence = (1.0 - disagreement * evenness).clamp(0.0, 1.0);
    (aggregate.clamp(0.0, 1.0), confidence, applied)
}

pub struct DecisionAggregator {
    registry: Arc<ComponentRegistry>,
    regime: Arc<RegimeDetector>,
    monitor: Arc<CrisisMonitor>,
    params: AggregatorParams,
    /// Upper-case ticker -> lower-case sector.
    sectors: HashMap<String, String>,
}

impl DecisionAggregator {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        regime: Arc<RegimeDetector>,
        monitor: Arc<CrisisMonitor>,
        params: AggregatorParams,
        sectors: &HashMap<String, String>,
    ) -> Self {
        let sectors = sectors
            .iter()
            .map(|(t, s)| (t.trim().to_uppercase(), s.trim().to_lowercase()))
            .collect();
        Self {
            registry,
            regime,
            monitor,
            params,
            sectors,
        }
    }

    pub fn sector_of(&self, ticker: &str) -> Option<&str> {
        self.sectors
            .get(&ticker.trim().to_uppercase())
            .map(String::as_str)
    }

    /// Produce a new decision record.
    pub fn decide(&self, ticker: &str, scores: &[ComponentScore]) -> Decision {
        Decision::new(self.evaluate(ticker, scores))
    }

    /// Deterministic content of a decision for the current state.
    pub fn evaluate(&self, ticker: &str, scores: &[ComponentScore]) -> Verdict {
        let regime = self.regime.current();
        let override_state = self.monitor.override_snapshot();
        self.evaluate_with(ticker, scores, &regime, &override_state)
    }

    fn evaluate_with(
        &self,
        ticker: &str,
        scores: &[ComponentScore],
        regime: &RegimeSnapshot,
        override_state: &OverrideState,
    ) -> Verdict {
        let ticker = ticker.trim().to_uppercase();
        let sector = self.sector_of(&ticker).map(str::to_string);

        let views = self
            .registry
            .lookup_weights(scores.iter().map(|s| s.component_id.as_str()), regime.regime);

        let mut seen: HashSet<&str> = HashSet::new();
        let mut entries: Vec<DecisionEntry> = Vec::new();
        let mut inputs: Vec<(f64, f64)> = Vec::new();
        let mut unknown: Vec<&str> = Vec::new();
        let mut ignored: Vec<String> = Vec::new();

        for s in scores {
            let id = s.component_id.as_str();
            if !seen.insert(id) {
                ignored.push(format!("{id} (duplicate)"));
                continue;
            }
            let Some(view) = views.get(id) else {
                warn!(ticker = %ticker, component = id, "score for unknown component skipped");
                unknown.push(id);
                continue;
            };
            if !view.enabled {
                ignored.push(format!("{id} (disabled)"));
                continue;
            }
            if !s.score.is_finite() {
                ignored.push(format!("{id} (non-finite score)"));
                continue;
            }

            inputs.push((view.score_range.to_unit(s.score), view.weight));
            entries.push(DecisionEntry {
                component_id: id.to_string(),
                raw_score: s.score,
                weight: view.weight,
                applied_weight: 0.0,
                cold_start: view.cold_start,
            });
        }

        let (aggregate, mut confidence, applied) = combine(&inputs);
        for (entry, a) in entries.iter_mut().zip(applied) {
            entry.applied_weight = a;
        }
        if regime.low_confidence {
            confidence *= self.params.low_confidence_penalty.clamp(0.0, 1.0);
        }

        let blocked = override_state.blocks(sector.as_deref());
        let action = if blocked {
            Action::Pass
        } else if aggregate >= self.params.buy_threshold {
            Action::Buy
        } else if aggregate <= self.params.sell_threshold {
            Action::Sell
        } else {
            Action::Hold
        };

        let rationale = self.rationale(
            &ticker,
            sector.as_deref(),
            action,
            aggregate,
            confidence,
            regime,
            override_state,
            blocked,
            &entries,
            &unknown,
            &ignored,
        );

        debug!(
            ticker = %ticker,
            action = %action,
            aggregate = format!("{:.4}", aggregate),
            confidence = format!("{:.4}", confidence),
            regime = %regime.regime,
            components = entries.len(),
            "decision evaluated"
        );

        Verdict {
            ticker,
            sector,
            entries,
            aggregate,
            confidence,
            action,
            rationale,
            regime: regime.regime,
            low_confidence_regime: regime.low_confidence,
            override_status: override_state.status,
            override_alert_id: override_state.alert_id.clone(),
        }
    }

    fn confidence_label(&self, confidence: f64) -> &'static str {
        if confidence >= self.params.high_confidence {
            "high"
        } else if confidence >= self.params.moderate_confidence {
            "moderate"
        } else {
            "low"
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn rationale(
        &self,
        ticker: &str,
        sector: Option<&str>,
        action: Action,
        aggregate: f64,
        confidence: f64,
        regime: &RegimeSnapshot,
        override_state: &OverrideState,
        blocked: bool,
        entries: &[DecisionEntry],
        unknown: &[&str],
        ignored: &[String],
    ) -> String {
        let mut out = String::new();
        let _ = write!(out, "{ticker}");
        if let Some(sector) = sector {
            let _ = write!(out, " [{sector}]");
        }
        let _ = writeln!(
            out,
            " -> {action}: aggregate {aggregate:.3}, confidence {confidence:.3} ({}), regime {}{}.",
            self.confidence_label(confidence),
            regime.regime,
            if regime.low_confidence {
                " (low confidence, confidence penalised)"
            } else {
                ""
            },
        );

        if entries.is_empty() {
            let _ = writeln!(out, "No usable component scores; neutral aggregate.");
        }
        for e in entries {
            let _ = write!(
                out,
                "  - {}: raw {:.3}, weight {:+.3}, applied {:.3}",
                e.component_id, e.raw_score, e.weight, e.applied_weight
            );
            if e.cold_start {
                let _ = write!(out, ", cold start (global weight)");
            }
            if e.weight == 0.0 {
                let _ = write!(out, ", no contribution");
            } else if e.weight < 0.0 {
                let _ = write!(out, ", inverted");
            }
            let _ = writeln!(out);
        }

        if !unknown.is_empty() {
            let _ = writeln!(out, "Skipped unknown components: {}.", unknown.join(", "));
        }
        if !ignored.is_empty() {
            let _ = writeln!(out, "Ignored: {}.", ignored.join(", "));
        }

        let alert = override_state.alert_id.as_deref().unwrap_or("none");
        match (override_state.status, blocked) {
            (OverrideStatus::CrisisBlocked, _) => {
                let _ = writeln!(
                    out,
                    "Override CRISIS_BLOCKED: all decisions suppressed (alert {alert})."
                );
            }
            (OverrideStatus::Elevated, true) => {
                let _ = writeln!(
                    out,
                    "Override ELEVATED: sector {} blacklisted (alert {alert}).",
                    sector.unwrap_or("-")
                );
            }
            (OverrideStatus::Elevated, false) => {
                let _ = writeln!(
                    out,
                    "Override ELEVATED (alert {alert}); sector not blacklisted."
                );
            }
            (OverrideStatus::Normal, _) => {}
        }

        out.trim_end().to_string()
    }
}

impl std::fmt::Debug for DecisionAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionAggregator")
            .field("params", &self.params)
            .field("sectors", &self.sectors.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
