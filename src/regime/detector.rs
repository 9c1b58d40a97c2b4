// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the market into one of four regimes by nearest reference
// profile over a rolling window of market-wide observations.
//
// Features (see `features.rs`): volatility, trend (efficiency ratio) and
// breadth. Distance is Euclidean with volatility divided by a configured
// scale so that the three axes are comparable.
//
// Hysteresis: if the previously active regime is within `hysteresis_margin`
// of the best distance it is kept, which stops flapping between neighbours.
//
// With fewer than `min_observations` in the window the detector keeps its last
// regime and raises the low-confidence flag instead of failing.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::regime::features::{compute_features, MarketObservation, RegimeFeatures};
use crate::runtime_config::{RegimeConfig, RegimeProfile};
use crate::types::Regime;

/// Maximum number of transitions retained for the audit trail.
const MAX_TRANSITIONS: usize = 100;

// =============================================================================
// Types
// =============================================================================

/// Consistent read-side view of the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    /// The currently active regime.
    pub regime: Regime,

    /// Set while the window is too thin to trust a classification.
    pub low_confidence: bool,

    /// Separation between the chosen profile and the runner-up, [0, 1].
    pub confidence: f64,

    /// Features from the last successful classification.
    pub features: Option<RegimeFeatures>,

    /// Observations in the window at the last update.
    pub observations: usize,

    /// When the current regime became active.
    pub since: DateTime<Utc>,

    /// When `update` last ran.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A recorded regime change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: Regime,
    pub to: Regime,
    pub at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub observations: usize,
    pub features: RegimeFeatures,
}

// =============================================================================
// RegimeDetector
// =============================================================================

/// Stateful regime detector. Written by the background regime loop, read by
/// the decision path through [`RegimeDetector::current`].
pub struct RegimeDetector {
    config: RegimeConfig,
    window: RwLock<VecDeque<MarketObservation>>,
    state: RwLock<RegimeSnapshot>,
    transitions: RwLock<VecDeque<RegimeTransition>>,
}

impl RegimeDetector {
    /// Create a detector sitting in the configured default regime.
    pub fn new(config: RegimeConfig) -> Self {
        let state = RegimeSnapshot {
            regime: config.default_regime,
            low_confidence: true,
            confidence: 0.0,
            features: None,
            observations: 0,
            since: Utc::now(),
            updated_at: None,
        };
        Self {
            window: RwLock::new(VecDeque::with_capacity(config.window_size.max(1))),
            state: RwLock::new(state),
            transitions: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Append an observation to the rolling window.
    pub fn observe(&self, observation: MarketObservation) {
        let mut window = self.window.write();
        window.push_back(observation);
        while window.len() > self.config.window_size.max(1) {
            window.pop_front();
        }
    }

    /// Append a batch of observations.
    pub fn observe_batch(&self, observations: impl IntoIterator<Item = MarketObservation>) {
        for o in observations {
            self.observe(o);
        }
    }

    /// Re-classify from the current window.
    pub fn update(&self) -> RegimeSnapshot {
        self.update_at(Utc::now())
    }

    /// Re-classify from the current window as of `now`.
    pub fn update_at(&self, now: DateTime<Utc>) -> RegimeSnapshot {
        let window: Vec<MarketObservation> = self.window.read().iter().cloned().collect();
        let previous = self.state.read().regime;

        let features = if window.len() >= self.config.min_observations {
            compute_features(&window)
        } else {
            None
        };

        let classified = features.and_then(|f| {
            classify(
                &f,
                &self.config.profiles,
                self.config.volatility_scale,
                previous,
                self.config.hysteresis_margin,
            )
            .map(|(regime, confidence)| (f, regime, confidence))
        });

        let mut state = self.state.write();
        state.observations = window.len();
        state.updated_at = Some(now);

        let Some((features, regime, confidence)) = classified else {
            // Thin window: hold the last regime, flag it.
            state.low_confidence = true;
            trace!(
                observations = window.len(),
                required = self.config.min_observations,
                regime = %state.regime,
                "Regime: insufficient data, holding last state (low confidence)"
            );
            return state.clone();
        };

        if regime != state.regime {
            let transition = RegimeTransition {
                from: state.regime,
                to: regime,
                at: now,
                window_start: window.first().map(|o| o.at).unwrap_or(now),
                window_end: window.last().map(|o| o.at).unwrap_or(now),
                observations: window.len(),
                features,
            };
            info!(
                from = %transition.from,
                to = %transition.to,
                observations = transition.observations,
                volatility = format!("{:.3}", features.volatility),
                trend = format!("{:.3}", features.trend),
                breadth = format!("{:.3}", features.breadth),
                "Regime transition"
            );

            let mut transitions = self.transitions.write();
            transitions.push_back(transition);
            while transitions.len() > MAX_TRANSITIONS {
                transitions.pop_front();
            }

            state.regime = regime;
            state.since = now;
        }

        state.low_confidence = false;
        state.confidence = confidence;
        state.features = Some(features);

        debug!(
            regime = %state.regime,
            confidence = format!("{:.2}", confidence),
            observations = window.len(),
            "Regime detected"
        );

        state.clone()
    }

    /// Return the current regime snapshot without recomputing.
    pub fn current(&self) -> RegimeSnapshot {
        self.state.read().clone()
    }

    /// Recorded transitions, oldest first.
    pub fn transitions(&self) -> Vec<RegimeTransition> {
        self.transitions.read().iter().cloned().collect()
    }

    pub fn window_len(&self) -> usize {
        self.window.read().len()
    }

    pub fn update_interval_secs(&self) -> u64 {
        self.config.update_interval_secs
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

impl std::fmt::Debug for RegimeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegimeDetector")
            .field("regime", &self.state.read().regime)
            .field("window", &self.window_len())
            .finish()
    }
}

/// Re-classify on the configured cadence forever. Spawn as a background task.
pub async fn run_regime_updater(detector: Arc<RegimeDetector>) {
    let secs = detector.update_interval_secs().max(1);
    info!(interval_secs = secs, "Regime updater started");

    let mut ticker = interval(Duration::from_secs(secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        detector.update();
    }
}

// =============================================================================
// Classification logic
// =============================================================================

/// Distance between a feature vector and a reference profile.
fn distance(f: &RegimeFeatures, p: &RegimeProfile, volatility_scale: f64) -> f64 {
    let scale = if volatility_scale.abs() < f64::EPSILON {
        1.0
    } else {
        volatility_scale
    };
    let dv = (f.volatility - p.volatility) / scale;
    let dt = f.trend - p.trend;
    let db = f.breadth - p.breadth;
    (dv * dv + dt * dt + db * db).sqrt()
}

/// Pick the nearest profile, preferring `previous` when it is within
/// `margin` of the best. Returns `None` when no profiles are configured.
fn classify(
    features: &RegimeFeatures,
    profiles: &[RegimeProfile],
    volatility_scale: f64,
    previous: Regime,
    margin: f64,
) -> Option<(Regime, f64)> {
    let mut scored: Vec<(Regime, f64)> = profiles
        .iter()
        .map(|p| (p.regime, distance(features, p, volatility_scale)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));

    let &(best, best_d) = scored.first()?;

    let chosen = match scored.iter().find(|(r, _)| *r == previous) {
        Some(&(_, prev_d)) if prev_d <= best_d + margin.max(0.0) => (previous, prev_d),
        _ => (best, best_d),
    };

    let runner_up = scored
        .iter()
        .filter(|(r, _)| *r != chosen.0)
        .map(|(_, d)| *d)
        .fold(f64::INFINITY, f64::min);

    let confidence = if runner_up.is_finite() && runner_up + chosen.1 > f64::EPSILON {
        ((runner_up - chosen.1) / (runner_up + chosen.1)).clamp(0.0, 1.0)
    } else {
        1.0
    };

    Some((chosen.0, confidence))
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn features(volatility: f64, trend: f64, breadth: f64) -> RegimeFeatures {
        RegimeFeatures {
            volatility,
            trend,
            breadth,
        }
    }

    fn small_config() -> RegimeConfig {
        RegimeConfig {
            window_size: 20,
            min_observations: 10,
            ..RegimeConfig::default()
        }
    }

    fn feed(detector: &RegimeDetector, returns: &[f64], adv: u32, dec: u32) {
        let start = Utc::now() - Duration::days(returns.len() as i64);
        for (i, r) in returns.iter().enumerate() {
            detector.observe(MarketObservation::new(
                start + Duration::days(i as i64),
                *r,
                adv,
                dec,
            ));
        }
    }

    #[test]
    fn test_classify_calm_trend() {
        let profiles = RegimeConfig::default().profiles;
        let (regime, conf) =
            classify(&features(0.3, 0.9, 0.4), &profiles, 1.0, Regime::CalmRange, 0.05).unwrap();
        assert_eq!(regime, Regime::CalmTrend);
        assert!(conf > 0.0);
    }

    #[test]
    fn test_classify_crisis() {
        let profiles = RegimeConfig::default().profiles;
        let (regime, _) =
            classify(&features(4.5, -0.5, -0.8), &profiles, 1.0, Regime::CalmRange, 0.05).unwrap();
        assert_eq!(regime, Regime::Crisis);
    }

    #[test]
    fn test_hysteresis_prefers_previous() {
        let profiles = vec![
            RegimeProfile::new(Regime::CalmRange, 1.0, 0.0, 0.0),
            RegimeProfile::new(Regime::CalmTrend, 1.0, 0.5, 0.0),
        ];
        // Marginally closer to CalmTrend.
        let f = features(1.0, 0.26, 0.0);
        let (fresh, _) = classify(&f, &profiles, 1.0, Regime::Crisis, 0.05).unwrap();
        assert_eq!(fresh, Regime::CalmTrend);

        let (kept, conf) = classify(&f, &profiles, 1.0, Regime::CalmRange, 0.05).unwrap();
        assert_eq!(kept, Regime::CalmRange);
        assert_eq!(conf, 0.0);
    }

    #[test]
    fn test_exact_tie_keeps_previous() {
        let profiles = vec![
            RegimeProfile::new(Regime::CalmRange, 1.0, -0.5, 0.0),
            RegimeProfile::new(Regime::CalmTrend, 1.0, 0.5, 0.0),
        ];
        let f = features(1.0, 0.0, 0.0);
        let (regime, _) = classify(&f, &profiles, 1.0, Regime::CalmTrend, 0.0).unwrap();
        assert_eq!(regime, Regime::CalmTrend);
    }

    #[test]
    fn test_no_profiles() {
        assert!(classify(&features(1.0, 0.0, 0.0), &[], 1.0, Regime::Crisis, 0.05).is_none());
    }

    #[test]
    fn starts_in_default_regime_with_low_confidence() {
        let d = RegimeDetector::new(small_config());
        let snap = d.current();
        assert_eq!(snap.regime, Regime::CalmRange);
        assert!(snap.low_confidence);
    }

    #[test]
    fn insufficient_data_holds_state() {
        let d = RegimeDetector::new(small_config());
        feed(&d, &[-5.0, 2.0, -4.0], 50, 450);
        let snap = d.update();
        assert_eq!(snap.regime, Regime::CalmRange);
        assert!(snap.low_confidence);
        assert_eq!(snap.observations, 3);
        assert!(d.transitions().is_empty());
    }

    #[test]
    fn calm_uptrend_then_crash_records_transition() {
        let d = RegimeDetector::new(small_config());
        let calm: Vec<f64> = (0..20).map(|i| 0.3 + (i % 3) as f64 * 0.05).collect();
        feed(&d, &calm, 300, 100);
        let snap = d.update();
        assert_eq!(snap.regime, Regime::CalmTrend);
        assert!(!snap.low_confidence);

        let crash: Vec<f64> = [-5.0, 2.0, -4.0, 1.0, -6.0, 3.0, -3.0]
            .iter()
            .cycle()
            .take(20)
            .copied()
            .collect();
        feed(&d, &crash, 50, 450);
        let snap = d.update();
        assert_eq!(snap.regime, Regime::Crisis);

        let transitions = d.transitions();
        assert_eq!(transitions.len(), 2);
        assert_eq!(transitions[0].from, Regime::CalmRange);
        assert_eq!(transitions[1].from, Regime::CalmTrend);
        assert_eq!(transitions[1].to, Regime::Crisis);
        assert_eq!(transitions[1].observations, 20);
    }

    #[test]
    fn window_is_bounded() {
        let d = RegimeDetector::new(small_config());
        feed(&d, &[0.1; 50], 10, 10);
        assert_eq!(d.window_len(), 20);
    }
}
