// =============================================================================
// Component Registry: Flat catalog of signal components and their trust
// =============================================================================
//
// Holds metadata, outcome statistics, trust and regime-conditioned weights for
// every signal component. Directors and specialists live side by side in one
// map keyed by id; the hierarchy is an explicit `parent_id` plus a children
// index, so there are no back-references between parent and child.
//
// The registry performs bookkeeping only. Learned weights are written here by
// the weight learner; trust is recomputed on every recorded outcome as an
// exponentially weighted accuracy.
//
// Thread safety:
//   - One parking_lot::RwLock around the whole table. Writers (registration,
//     feedback worker) take the write lock; the decision path resolves all
//     of its weights under a single read lock so it never sees a torn update.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::runtime_config::RegistryParams;
use crate::types::{Regime, ScoreRange};

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component '{0}' is already registered")]
    DuplicateComponent(String),

    #[error("component '{id}' names unknown parent '{parent}'")]
    UnknownParent { id: String, parent: String },

    #[error("unknown component '{0}'")]
    UnknownComponent(String),
}

// =============================================================================
// Types
// =============================================================================

/// Position of a component in the two-level hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentKind {
    Director,
    Specialist,
}

/// Outcome counters for a component, lifetime or per regime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub participated: u64,
    pub correct: u64,
    pub incorrect: u64,
}

impl OutcomeCounts {
    fn record(&mut self, correct: bool) {
        self.participated += 1;
        if correct {
            self.correct += 1;
        } else {
            self.incorrect += 1;
        }
    }

    /// Raw hit rate, `None` before the first outcome.
    pub fn accuracy(&self) -> Option<f64> {
        if self.participated == 0 {
            None
        } else {
            Some(self.correct as f64 / self.participated as f64)
        }
    }
}

/// Registration request for a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    pub parent_id: Option<String>,
    pub description: String,
    pub score_range: ScoreRange,
    /// Regime-independent seed weight; the registry default when `None`.
    pub global_weight: Option<f64>,
    /// Explicit per-regime seed weights.
    pub regime_weights: BTreeMap<Regime, f64>,
    pub enabled: bool,
}

impl ComponentSpec {
    /// A top-level grouping component.
    pub fn director(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            description: description.into(),
            score_range: ScoreRange::Unit,
            global_weight: None,
            regime_weights: BTreeMap::new(),
            enabled: true,
        }
    }

    /// A component reporting to `parent`.
    pub fn specialist(
        id: impl Into<String>,
        parent: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: Some(parent.into()),
            ..Self::director(id, description)
        }
    }

    pub fn with_range(mut self, range: ScoreRange) -> Self {
        self.score_range = range;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.global_weight = Some(weight);
        self
    }

    pub fn with_regime_weight(mut self, regime: Regime, weight: f64) -> Self {
        self.regime_weights.insert(regime, weight);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A registered signal component with its live statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalComponent {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: ComponentKind,
    pub description: String,
    pub score_range: ScoreRange,
    pub enabled: bool,
    pub global_weight: f64,
    pub regime_weights: BTreeMap<Regime, f64>,
    /// Smoothed accuracy in [0, 1].
    pub trust_score: f64,
    pub lifetime: OutcomeCounts,
    pub regime_accuracy: BTreeMap<Regime, OutcomeCounts>,
    /// Forced to zero weight after being consistently wrong.
    pub deactivated: bool,
}

impl SignalComponent {
    /// Whether the component currently contributes to aggregation.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.deactivated
    }

    /// Effective weight for `regime` and whether it fell back to the
    /// global weight.
    fn effective_weight(&self, regime: Regime) -> (f64, bool) {
        if !self.is_active() {
            return (0.0, !self.regime_weights.contains_key(&regime));
        }
        match self.regime_weights.get(&regime) {
            Some(w) => (*w, false),
            None => (self.global_weight, true),
        }
    }
}

/// Read-side view of one component's weight under a regime.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightLookup {
    pub score_range: ScoreRange,
    pub weight: f64,
    /// True when no regime-specific weight exists and the global weight
    /// was used instead.
    pub cold_start: bool,
    pub enabled: bool,
    pub deactivated: bool,
    pub trust: f64,
}

// =============================================================================
// ComponentRegistry
// =============================================================================

#[derive(Default)]
struct Inner {
    components: HashMap<String, SignalComponent>,
    children: HashMap<String, Vec<String>>,
    order: Vec<String>,
}

/// Process-wide component catalog. Built once at startup and shared via `Arc`.
pub struct ComponentRegistry {
    inner: RwLock<Inner>,
    params: RegistryParams,
}

impl ComponentRegistry {
    pub fn new(params: RegistryParams) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            params,
        }
    }

    /// Register a component. Directors must be registered before their
    /// specialists.
    pub fn register(&self, spec: ComponentSpec) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        if inner.components.contains_key(&spec.id) {
            return Err(RegistryError::DuplicateComponent(spec.id));
        }
        if let Some(parent) = &spec.parent_id {
            if !inner.components.contains_key(parent) {
                return Err(RegistryError::UnknownParent {
                    id: spec.id,
                    parent: parent.clone(),
                });
            }
        }

        let kind = if spec.parent_id.is_some() {
            ComponentKind::Specialist
        } else {
            ComponentKind::Director
        };

        let component = SignalComponent {
            id: spec.id.clone(),
            parent_id: spec.parent_id.clone(),
            kind,
            description: spec.description,
            score_range: spec.score_range,
            enabled: spec.enabled,
            global_weight: spec.global_weight.unwrap_or(self.params.default_weight),
            regime_weights: spec.regime_weights,
            trust_score: self.params.initial_trust.clamp(0.0, 1.0),
            lifetime: OutcomeCounts::default(),
            regime_accuracy: BTreeMap::new(),
            deactivated: false,
        };

        if let Some(parent) = &spec.parent_id {
            inner
                .children
                .entry(parent.clone())
                .or_default()
                .push(spec.id.clone());
        }
        inner.order.push(spec.id.clone());
        inner.components.insert(spec.id.clone(), component);

        debug!(id = %spec.id, kind = ?kind, "component registered");
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().components.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone of a single component.
    pub fn get(&self, id: &str) -> Option<SignalComponent> {
        self.inner.read().components.get(id).cloned()
    }

    /// All components in registration order.
    pub fn list(&self) -> Vec<SignalComponent> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.components.get(id).cloned())
            .collect()
    }

    /// Ids of the specialists registered under `parent`.
    pub fn children(&self, parent: &str) -> Vec<String> {
        self.inner
            .read()
            .children
            .get(parent)
            .cloned()
            .unwrap_or_default()
    }

    /// Regime-specific weight, falling back to the global weight. Zero for
    /// disabled or deactivated components, `None` for unknown ids.
    pub fn get_weight(&self, id: &str, regime: Regime) -> Option<f64> {
        self.inner
            .read()
            .components
            .get(id)
            .map(|c| c.effective_weight(regime).0)
    }

    /// Resolve weights for a batch of ids under a single read lock.
    /// Unknown ids are absent from the result.
    pub fn lookup_weights<'a, I>(&self, ids: I, regime: Regime) -> HashMap<String, WeightLookup>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let inner = self.inner.read();
        ids.into_iter()
            .filter_map(|id| {
                let c = inner.components.get(id)?;
                let (weight, cold_start) = c.effective_weight(regime);
                Some((
                    id.to_string(),
                    WeightLookup {
                        score_range: c.score_range,
                        weight,
                        cold_start,
                        enabled: c.enabled,
                        deactivated: c.deactivated,
                        trust: c.trust_score,
                    },
                ))
            })
            .collect()
    }

    /// Record whether a component's call was correct under `regime` and
    /// recompute its trust. Returns the new trust score.
    pub fn record_outcome(
        &self,
        id: &str,
        correct: bool,
        regime: Regime,
    ) -> Result<f64, RegistryError> {
        let mut inner = self.inner.write();
        let c = inner
            .components
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownComponent(id.to_string()))?;

        c.lifetime.record(correct);
        c.regime_accuracy.entry(regime).or_default().record(correct);

        let alpha = self.params.trust_smoothing.clamp(0.0, 1.0);
        let hit = if correct { 1.0 } else { 0.0 };
        c.trust_score = ((1.0 - alpha) * c.trust_score + alpha * hit).clamp(0.0, 1.0);

        if !c.deactivated
            && c.lifetime.participated >= self.params.deactivate_min_samples
            && c.trust_score < self.params.deactivate_trust_floor
        {
            c.deactivated = true;
            warn!(
                id = %c.id,
                trust = format!("{:.3}", c.trust_score),
                participated = c.lifetime.participated,
                "component consistently wrong; deactivated (weight forced to 0)"
            );
        }

        debug!(
            id = %c.id,
            regime = %regime,
            correct,
            trust = format!("{:.4}", c.trust_score),
            "outcome recorded"
        );
        Ok(c.trust_score)
    }

    /// Publish a learned regime-specific weight.
    pub fn set_regime_weight(
        &self,
        id: &str,
        regime: Regime,
        weight: f64,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let c = inner
            .components
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownComponent(id.to_string()))?;
        c.regime_weights.insert(regime, weight);
        Ok(())
    }

    /// Publish a learned regime-independent weight.
    pub fn set_global_weight(&self, id: &str, weight: f64) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let c = inner
            .components
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownComponent(id.to_string()))?;
        c.global_weight = weight;
        Ok(())
    }

    /// Whether an explicit regime weight exists for the pair.
    pub fn has_regime_weight(&self, id: &str, regime: Regime) -> bool {
        self.inner
            .read()
            .components
            .get(id)
            .map(|c| c.regime_weights.contains_key(&regime))
            .unwrap_or(false)
    }

    /// Registry-level feature toggle.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let c = inner
            .components
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownComponent(id.to_string()))?;
        c.enabled = enabled;
        info!(id, enabled, "component toggled");
        Ok(())
    }

    /// Manually lift a deactivation. Trust restarts from the initial value so
    /// the component is not deactivated again by its next miss; the outcome
    /// counters are kept.
    pub fn reactivate(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        let c = inner
            .components
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownComponent(id.to_string()))?;
        let previous_trust = c.trust_score;
        c.deactivated = false;
        c.trust_score = self.params.initial_trust.clamp(0.0, 1.0);
        info!(
            id,
            previous_trust = format!("{previous_trust:.3}"),
            trust = c.trust_score,
            "component reactivated"
        );
        Ok(())
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.len())
            .field("params", &self.params)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
