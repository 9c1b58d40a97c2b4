// =============================================================================
// Regime Features: Volatility, trend and breadth proxies
// =============================================================================
//
// Computed from a rolling window of market-wide observations:
//
//   volatility = sample std-dev of returns (percent)
//   trend      = Σ r / Σ |r|           (signed efficiency ratio, [-1, 1])
//   breadth    = mean (adv - dec) / (adv + dec)                  ([-1, 1])
//
// A strongly directional tape has |trend| near 1; a choppy tape sits near 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One market-wide observation supplied by the data collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketObservation {
    pub at: DateTime<Utc>,
    /// Market index return over the observation period, in percent.
    pub return_pct: f64,
    #[serde(default)]
    pub advancers: u32,
    #[serde(default)]
    pub decliners: u32,
}

impl MarketObservation {
    pub fn new(at: DateTime<Utc>, return_pct: f64, advancers: u32, decliners: u32) -> Self {
        Self {
            at,
            return_pct,
            advancers,
            decliners,
        }
    }
}

/// Feature vector fed to the regime classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeFeatures {
    pub volatility: f64,
    pub trend: f64,
    pub breadth: f64,
}

/// Compute features over `window`. Returns `None` for fewer than two
/// observations or a window without finite returns.
pub fn compute_features(window: &[MarketObservation]) -> Option<RegimeFeatures> {
    let returns: Vec<f64> = window
        .iter()
        .map(|o| o.return_pct)
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let volatility = variance.sqrt();

    let net: f64 = returns.iter().sum();
    let gross: f64 = returns.iter().map(|r| r.abs()).sum();
    let trend = if gross > f64::EPSILON { net / gross } else { 0.0 };

    let balances: Vec<f64> = window
        .iter()
        .filter_map(|o| {
            let adv = f64::from(o.advancers);
            let dec = f64::from(o.decliners);
            (adv + dec > 0.0).then(|| (adv - dec) / (adv + dec))
        })
        .collect();
    let breadth = if balances.is_empty() {
        0.0
    } else {
        balances.iter().sum::<f64>() / balances.len() as f64
    };

    Some(RegimeFeatures {
        volatility,
        trend,
        breadth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(r: f64, adv: u32, dec: u32) -> MarketObservation {
        MarketObservation::new(Utc::now(), r, adv, dec)
    }

    #[test]
    fn too_few_observations() {
        assert!(compute_features(&[]).is_none());
        assert!(compute_features(&[obs(0.5, 10, 10)]).is_none());
    }

    #[test]
    fn steady_uptrend_has_full_efficiency() {
        let window: Vec<_> = (0..10).map(|i| obs(0.2 + i as f64 * 0.01, 300, 100)).collect();
        let f = compute_features(&window).unwrap();
        assert!((f.trend - 1.0).abs() < 1e-12);
        assert!((f.breadth - 0.5).abs() < 1e-12);
        assert!(f.volatility > 0.0);
    }

    #[test]
    fn extreme_breadth_counts_do_not_overflow() {
        let window = [obs(0.1, u32::MAX, 1), obs(-0.1, u32::MAX, u32::MAX), obs(0.2, 0, 0)];
        let f = compute_features(&window).unwrap();
        // (1 + 0) / 2 over the two observations with any breadth.
        assert!((f.breadth - 0.5).abs() < 1e-6);
        assert!(f.breadth.is_finite());
    }

    #[test]
    fn alternating_tape_has_no_trend() {
        let window: Vec<_> = (0..10)
            .map(|i| obs(if i % 2 == 0 { 1.0 } else { -1.0 }, 50, 50))
            .collect();
        let f = compute_features(&window).unwrap();
        assert!(f.trend.abs() < 1e-12);
        assert!(f.breadth.abs() < 1e-12);
        assert!(f.volatility > 1.0);
    }

    #[test]
    fn missing_breadth_counts_are_neutral() {
        let window = vec![obs(1.0, 0, 0), obs(-0.5, 0, 0), obs(0.3, 0, 0)];
        let f = compute_features(&window).unwrap();
        assert_eq!(f.breadth, 0.0);
    }
}
