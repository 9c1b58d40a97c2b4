// =============================================================================
// Shared types used across the Signal Council engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Discrete market condition used to condition component weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// Low volatility with a persistent direction.
    CalmTrend,
    /// Low volatility, no directional persistence.
    CalmRange,
    /// Elevated volatility with a directional move.
    StressedTrend,
    /// Disorderly market: extreme volatility and collapsing breadth.
    Crisis,
}

impl Regime {
    /// Every regime, in a stable order.
    pub const ALL: [Regime; 4] = [
        Regime::CalmTrend,
        Regime::CalmRange,
        Regime::StressedTrend,
        Regime::Crisis,
    ];
}

impl Default for Regime {
    fn default() -> Self {
        Self::CalmRange
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CalmTrend => write!(f, "CALM_TREND"),
            Self::CalmRange => write!(f, "CALM_RANGE"),
            Self::StressedTrend => write!(f, "STRESSED_TREND"),
            Self::Crisis => write!(f, "CRISIS"),
        }
    }
}

/// Range a component's raw scores are declared in at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreRange {
    /// Scores in `[0, 1]`; 0.5 is neutral.
    Unit,
    /// Scores in `[-1, 1]`; 0.0 is neutral.
    Signed,
}

impl Default for ScoreRange {
    fn default() -> Self {
        Self::Unit
    }
}

impl ScoreRange {
    /// Clamp a raw score into the declared range.
    pub fn clamp(self, raw: f64) -> f64 {
        match self {
            Self::Unit => raw.clamp(0.0, 1.0),
            Self::Signed => raw.clamp(-1.0, 1.0),
        }
    }

    /// Map a raw score onto `[0, 1]`.
    pub fn to_unit(self, raw: f64) -> f64 {
        match self {
            Self::Unit => raw.clamp(0.0, 1.0),
            Self::Signed => (raw.clamp(-1.0, 1.0) + 1.0) / 2.0,
        }
    }

    /// Map a raw score onto `[-1, 1]` around its neutral point.
    pub fn to_centered(self, raw: f64) -> f64 {
        self.to_unit(raw) * 2.0 - 1.0
    }
}

/// Final action attached to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
    /// Suppressed by the crisis override regardless of the aggregate.
    Pass,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
            Self::Pass => write!(f, "PASS"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_scores_map_onto_unit_scale() {
        assert!((ScoreRange::Signed.to_unit(-1.0) - 0.0).abs() < 1e-12);
        assert!((ScoreRange::Signed.to_unit(0.0) - 0.5).abs() < 1e-12);
        assert!((ScoreRange::Signed.to_unit(1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert!((ScoreRange::Unit.clamp(1.7) - 1.0).abs() < 1e-12);
        assert!((ScoreRange::Signed.clamp(-3.0) + 1.0).abs() < 1e-12);
        assert!((ScoreRange::Unit.to_centered(0.75) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn regime_serialises_snake_case() {
        let json = serde_json::to_string(&Regime::StressedTrend).unwrap();
        assert_eq!(json, "\"stressed_trend\"");
        assert_eq!(format!("{}", Regime::CalmRange), "CALM_RANGE");
    }
}
