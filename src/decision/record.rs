// =============================================================================
// Decision Record: Auditable output of every council decision
// =============================================================================
//
// A `Decision` captures, per component, the raw score, the learned weight and
// the normalised weight actually applied, plus the regime and override state
// the decision was taken under. Records are immutable once created.
//
// `Verdict` is the deterministic content of a decision; `Decision` wraps it
// with an id and timestamp. Two calls to `decide` with identical state and
// inputs produce equal verdicts.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crisis::OverrideStatus;
use crate::types::{Action, Regime};

/// One component's contribution to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub component_id: String,

    /// Score as supplied by the caller, before clamping.
    pub raw_score: f64,

    /// Learned (regime-conditioned) weight looked up at decision time.
    pub weight: f64,

    /// `|weight| / Σ|weight|` over the components present.
    pub applied_weight: f64,

    /// True when the regime had no learned weight and the global weight
    /// was used instead.
    pub cold_start: bool,
}

/// Everything a decision says, minus identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub ticker: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,

    pub entries: Vec<DecisionEntry>,

    /// Weighted score on the unit scale; 0.5 is neutral.
    pub aggregate: f64,

    /// Agreement of the weighted evidence, [0, 1].
    pub confidence: f64,

    pub action: Action,

    pub rationale: String,

    pub regime: Regime,

    pub low_confidence_regime: bool,

    pub override_status: OverrideStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_alert_id: Option<String>,
}

/// Complete auditable record of a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique identifier (UUID v4), used to report outcomes.
    pub id: Uuid,

    pub created_at: DateTime<Utc>,

    #[serde(flatten)]
    pub verdict: Verdict,
}

impl Decision {
    /// Stamp a verdict with a fresh id and the current time.
    pub fn new(verdict: Verdict) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            verdict,
        }
    }

    pub fn action(&self) -> Action {
        self.verdict.action
    }

    /// Direction the decision leaned: +1 above neutral, -1 below, 0 at it.
    pub fn direction(&self) -> f64 {
        let centered = self.verdict.aggregate - 0.5;
        if centered.abs() < 1e-12 {
            0.0
        } else {
            centered.signum()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(aggregate: f64) -> Verdict {
        Verdict {
            ticker: "AAPL".into(),
            sector: Some("technology".into()),
            entries: vec![DecisionEntry {
                component_id: "price_momentum".into(),
                raw_score: 0.4,
                weight: 0.3,
                applied_weight: 1.0,
                cold_start: false,
            }],
            aggregate,
            confidence: 0.0,
            action: Action::Hold,
            rationale: String::new(),
            regime: Regime::CalmTrend,
            low_confidence_regime: false,
            override_status: OverrideStatus::Normal,
            override_alert_id: None,
        }
    }

    #[test]
    fn decisions_get_distinct_ids() {
        let a = Decision::new(verdict(0.7));
        let b = Decision::new(verdict(0.7));
        assert_ne!(a.id, b.id);
        assert_eq!(a.verdict, b.verdict);
    }

    #[test]
    fn direction_follows_aggregate() {
        assert_eq!(Decision::new(verdict(0.7)).direction(), 1.0);
        assert_eq!(Decision::new(verdict(0.2)).direction(), -1.0);
        assert_eq!(Decision::new(verdict(0.5)).direction(), 0.0);
    }

    #[test]
    fn verdict_fields_flatten_into_decision_json() {
        let d = Decision::new(verdict(0.7));
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["ticker"], "AAPL");
        assert_eq!(json["regime"], "calm_trend");
        assert!(json.get("verdict").is_none());
        assert!(json.get("override_alert_id").is_none());
    }
}
