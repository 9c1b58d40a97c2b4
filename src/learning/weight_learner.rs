// =============================================================================
// Weight Learner: Online regime-conditioned weight updates
// =============================================================================
//
// For every (component, regime) pair:
//
//   η_n = η₀ / (1 + n / τ)          n = prior observations of the pair
//   w  ← clip(w + η_n · reward)     reward ∈ [-1, 1]
//
// A regime-independent global estimate per component is updated alongside
// with its own observation count.
//
// Cold start: a pair that was not seeded at registration only publishes its
// weight into the registry after `cold_start_min_observations` updates. Until
// then the registry keeps answering with the global weight, which itself is
// only published once the global estimate has enough observations.
//
// The learner has a single caller (the feedback worker), so each pair is
// updated in submission order.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::components::ComponentRegistry;
use crate::runtime_config::LearnerParams;
use crate::types::Regime;

#[derive(Debug, Error, PartialEq)]
pub enum LearningError {
    #[error("unknown component '{0}'")]
    UnknownComponent(String),

    #[error("reward must be finite, got {0}")]
    InvalidReward(f64),
}

/// Running estimate for one weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightEstimate {
    pub weight: f64,
    pub observations: u64,
    /// Whether the registry carried an explicit weight when learning began.
    pub seeded: bool,
}

impl WeightEstimate {
    fn new(weight: f64, seeded: bool) -> Self {
        Self {
            weight,
            observations: 0,
            seeded,
        }
    }

    /// Apply one reward and return the step size used.
    fn apply(&mut self, reward: f64, params: &LearnerParams) -> f64 {
        let eta = learning_rate(params, self.observations);
        let (lo, hi) = params.clip_bounds();
        self.weight = (self.weight + eta * reward).clamp(lo, hi);
        self.observations += 1;
        eta
    }
}

/// Learned state for one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentLearning {
    pub global: WeightEstimate,
    pub regimes: BTreeMap<Regime, WeightEstimate>,
}

/// Result of a single update, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightUpdate {
    pub previous: f64,
    pub weight: f64,
    pub learning_rate: f64,
    pub observations: u64,
    /// Whether the new regime weight was written to the registry.
    pub published: bool,
}

/// Decayed step size for the `n`-th observation.
fn learning_rate(params: &LearnerParams, n: u64) -> f64 {
    if params.decay_horizon <= 0.0 {
        return params.base_learning_rate;
    }
    params.base_learning_rate / (1.0 + n as f64 / params.decay_horizon)
}

pub struct WeightLearner {
    registry: Arc<ComponentRegistry>,
    params: LearnerParams,
    state: RwLock<HashMap<String, ComponentLearning>>,
}

impl WeightLearner {
    pub fn new(registry: Arc<ComponentRegistry>, params: LearnerParams) -> Self {
        Self {
            registry,
            params,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Move the weight of `(component_id, regime)` by `reward`.
    pub fn update(
        &self,
        component_id: &str,
        regime: Regime,
        reward: f64,
    ) -> Result<WeightUpdate, LearningError> {
        if !reward.is_finite() {
            return Err(LearningError::InvalidReward(reward));
        }
        let component = self
            .registry
            .get(component_id)
            .ok_or_else(|| LearningError::UnknownComponent(component_id.to_string()))?;
        let reward = reward.clamp(-1.0, 1.0);
        let (lo, hi) = self.params.clip_bounds();

        let (update, publish_global) = {
            let mut state = self.state.write();
            let learning = state
                .entry(component_id.to_string())
                .or_insert_with(|| ComponentLearning {
                    global: WeightEstimate::new(component.global_weight.clamp(lo, hi), true),
                    regimes: BTreeMap::new(),
                });

            let pair = learning.regimes.entry(regime).or_insert_with(|| {
                match component.regime_weights.get(&regime) {
                    Some(w) => WeightEstimate::new(w.clamp(lo, hi), true),
                    None => WeightEstimate::new(component.global_weight.clamp(lo, hi), false),
                }
            });

            let previous = pair.weight;
            let eta = pair.apply(reward, &self.params);
            let published =
                pair.seeded || pair.observations >= self.params.cold_start_min_observations;
            let update = WeightUpdate {
                previous,
                weight: pair.weight,
                learning_rate: eta,
                observations: pair.observations,
                published,
            };

            learning.global.apply(reward, &self.params);
            let publish_global = (learning.global.observations
                >= self.params.cold_start_min_observations)
                .then_some(learning.global.weight);

            (update, publish_global)
        };

        if update.published {
            self.registry
                .set_regime_weight(component_id, regime, update.weight)
                .map_err(|_| LearningError::UnknownComponent(component_id.to_string()))?;
        }
        if let Some(global) = publish_global {
            self.registry
                .set_global_weight(component_id, global)
                .map_err(|_| LearningError::UnknownComponent(component_id.to_string()))?;
        }

        if update.published && update.observations == self.params.cold_start_min_observations {
            info!(
                id = component_id,
                regime = %regime,
                weight = format!("{:.4}", update.weight),
                "pair reached warm-up observation count"
            );
        }

        debug!(
            id = component_id,
            regime = %regime,
            reward = format!("{:+.3}", reward),
            eta = format!("{:.4}", update.learning_rate),
            from = format!("{:.4}", update.previous),
            to = format!("{:.4}", update.weight),
            n = update.observations,
            "weight updated"
        );

        Ok(update)
    }

    /// Learned state for one component, `None` before its first update.
    pub fn stats(&self, component_id: &str) -> Option<ComponentLearning> {
        self.state.read().get(component_id).cloned()
    }

    /// Observations recorded for a pair.
    pub fn observations(&self, component_id: &str, regime: Regime) -> u64 {
        self.state
            .read()
            .get(component_id)
            .and_then(|l| l.regimes.get(&regime))
            .map(|p| p.observations)
            .unwrap_or(0)
    }

    pub fn params(&self) -> &LearnerParams {
        &self.params
    }
}

impl std::fmt::Debug for WeightLearner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightLearner")
            .field("params", &self.params)
            .field("components", &self.state.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentSpec;
    use crate::runtime_config::RegistryParams;

    fn setup(params: LearnerParams) -> (Arc<ComponentRegistry>, WeightLearner) {
        let reg = Arc::new(ComponentRegistry::new(RegistryParams::default()));
        reg.register(ComponentSpec::director("technical", "technical desk"))
            .unwrap();
        reg.register(
            ComponentSpec::specialist("momentum", "technical", "price momentum")
                .with_weight(0.2)
                .with_regime_weight(Regime::CalmTrend, 0.4),
        )
        .unwrap();
        let learner = WeightLearner::new(reg.clone(), params);
        (reg, learner)
    }

    #[test]
    fn learning_rate_decays() {
        let p = LearnerParams::default();
        assert!((learning_rate(&p, 0) - p.base_learning_rate).abs() < 1e-12);
        let tau = p.decay_horizon as u64;
        assert!((learning_rate(&p, tau) - p.base_learning_rate / 2.0).abs() < 1e-12);
        assert!(learning_rate(&p, 1000) < learning_rate(&p, 10));
    }

    #[test]
    fn first_update_starts_from_seeded_weight() {
        let (reg, learner) = setup(LearnerParams::default());
        let u = learner.update("momentum", Regime::CalmTrend, 1.0).unwrap();
        assert!((u.previous - 0.4).abs() < 1e-12);
        assert!((u.weight - 0.45).abs() < 1e-12);
        assert!(u.published);
        assert_eq!(reg.get_weight("momentum", Regime::CalmTrend), Some(u.weight));
    }

    #[test]
    fn repeated_positive_reward_is_monotone_increasing() {
        let (_, learner) = setup(LearnerParams::default());
        let mut last = f64::MIN;
        for _ in 0..200 {
            let u = learner.update("momentum", Regime::CalmTrend, 0.8).unwrap();
            assert!(u.weight >= last);
            assert!(u.weight >= u.previous);
            last = u.weight;
        }
    }

    #[test]
    fn repeated_negative_reward_is_monotone_decreasing() {
        let (_, learner) = setup(LearnerParams::default());
        let mut last = f64::MAX;
        for _ in 0..200 {
            let u = learner.update("momentum", Regime::CalmTrend, -1.0).unwrap();
            assert!(u.weight <= last);
            last = u.weight;
        }
        // Signed weights allowed: the signal ends up inverted.
        assert!(last < 0.0);
    }

    #[test]
    fn weights_stay_within_clip_bounds() {
        let params = LearnerParams {
            base_learning_rate: 0.9,
            decay_horizon: 1000.0,
            ..LearnerParams::default()
        };
        let (lo, hi) = params.clip_bounds();
        let (_, learner) = setup(params);
        for i in 0..500 {
            let reward = if (i / 50) % 2 == 0 { 1.0 } else { -1.0 };
            let u = learner.update("momentum", Regime::Crisis, reward).unwrap();
            assert!(u.weight >= lo && u.weight <= hi);
        }
    }

    #[test]
    fn negative_weights_can_be_disabled() {
        let params = LearnerParams {
            allow_negative_weights: false,
            ..LearnerParams::default()
        };
        let (_, learner) = setup(params);
        for _ in 0..300 {
            let u = learner.update("momentum", Regime::CalmTrend, -1.0).unwrap();
            assert!(u.weight >= 0.0);
        }
    }

    #[test]
    fn rewards_are_clamped() {
        let (_, learner) = setup(LearnerParams::default());
        let u = learner.update("momentum", Regime::CalmTrend, 50.0).unwrap();
        assert!((u.weight - 0.45).abs() < 1e-12);
    }

    #[test]
    fn sparse_pair_falls_back_to_global_until_warm() {
        let params = LearnerParams::default();
        let min = params.cold_start_min_observations;
        let (reg, learner) = setup(params);

        for _ in 0..(min - 1) {
            let u = learner.update("momentum", Regime::StressedTrend, 1.0).unwrap();
            assert!(!u.published);
        }
        assert!(!reg.has_regime_weight("momentum", Regime::StressedTrend));
        assert_eq!(reg.get_weight("momentum", Regime::StressedTrend), Some(0.2));

        let u = learner.update("momentum", Regime::StressedTrend, 1.0).unwrap();
        assert!(u.published);
        assert_eq!(u.observations, min);
        assert_eq!(
            reg.get_weight("momentum", Regime::StressedTrend),
            Some(u.weight)
        );
        // The global estimate also reached the threshold and was published.
        assert!(reg.get("momentum").unwrap().global_weight > 0.2);
    }

    #[test]
    fn unknown_component_and_bad_reward_are_rejected() {
        let (_, learner) = setup(LearnerParams::default());
        assert_eq!(
            learner.update("ghost", Regime::Crisis, 1.0),
            Err(LearningError::UnknownComponent("ghost".into()))
        );
        assert!(matches!(
            learner.update("momentum", Regime::Crisis, f64::NAN),
            Err(LearningError::InvalidReward(_))
        ));
        assert!(learner.stats("momentum").is_none());
    }

    #[test]
    fn stats_track_pair_counts() {
        let (_, learner) = setup(LearnerParams::default());
        learner.update("momentum", Regime::CalmTrend, 0.5).unwrap();
        learner.update("momentum", Regime::CalmTrend, 0.5).unwrap();
        learner.update("momentum", Regime::Crisis, -0.5).unwrap();
        let stats = learner.stats("momentum").unwrap();
        assert_eq!(stats.global.observations, 3);
        assert_eq!(stats.regimes[&Regime::CalmTrend].observations, 2);
        assert_eq!(learner.observations("momentum", Regime::Crisis), 1);
    }
}
