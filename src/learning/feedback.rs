// =============================================================================
// Feedback Pipeline: Outcomes back into the learner and registry
// =============================================================================
//
// `report_outcome` only enqueues. A single worker drains the queue so that
// updates to a (component, regime) pair are applied in submission order and
// the request path never touches the write locks.
//
// Per component the decision reward is multiplied by the component's
// alignment with the direction the decision leaned:
//
//   alignment = sign(centered raw score) · sign(aggregate - 0.5)
//
// Components sitting exactly at their neutral point took no stance and are
// skipped. A component is "correct" when its aligned reward is positive.
// =============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::components::ComponentRegistry;
use crate::decision::Decision;
use crate::learning::weight_learner::WeightLearner;
use crate::types::Regime;

/// Sender half handed to the application state.
pub type FeedbackSender = mpsc::UnboundedSender<OutcomeReport>;

/// A decision outcome queued for learning.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub decision_id: Uuid,
    pub reward: f64,
    pub regime: Regime,
    /// +1, -1 or 0.
    pub direction: f64,
    /// `(component id, raw score)` as recorded in the decision.
    pub scores: Vec<(String, f64)>,
}

impl OutcomeReport {
    pub fn from_decision(decision: &Decision, reward: f64) -> Self {
        Self {
            decision_id: decision.id,
            reward,
            regime: decision.verdict.regime,
            direction: decision.direction(),
            scores: decision
                .verdict
                .entries
                .iter()
                .map(|e| (e.component_id.clone(), e.raw_score))
                .collect(),
        }
    }
}

/// Counters returned by [`apply_outcome`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackSummary {
    pub applied: usize,
    pub neutral: usize,
    pub dropped: usize,
}

/// Apply one outcome synchronously.
pub fn apply_outcome(
    registry: &ComponentRegistry,
    learner: &WeightLearner,
    report: &OutcomeReport,
) -> FeedbackSummary {
    let mut summary = FeedbackSummary::default();

    if report.direction == 0.0 {
        debug!(decision = %report.decision_id, "neutral decision, nothing to learn");
        summary.neutral = report.scores.len();
        return summary;
    }

    let ids = report.scores.iter().map(|(id, _)| id.as_str());
    let views = registry.lookup_weights(ids, report.regime);

    for (id, raw) in &report.scores {
        let Some(view) = views.get(id) else {
            warn!(decision = %report.decision_id, component = %id, "feedback for unknown component dropped");
            summary.dropped += 1;
            continue;
        };

        let stance = view.score_range.to_centered(*raw);
        if stance.abs() < 1e-12 {
            summary.neutral += 1;
            continue;
        }

        let component_reward = report.reward * stance.signum() * report.direction;

        if let Err(e) = learner.update(id, report.regime, component_reward) {
            warn!(decision = %report.decision_id, component = %id, error = %e, "weight update dropped");
            summary.dropped += 1;
            continue;
        }
        if let Err(e) = registry.record_outcome(id, component_reward > 0.0, report.regime) {
            warn!(decision = %report.decision_id, component = %id, error = %e, "outcome record dropped");
            summary.dropped += 1;
            continue;
        }
        summary.applied += 1;
    }

    debug!(
        decision = %report.decision_id,
        reward = format!("{:+.3}", report.reward),
        applied = summary.applied,
        neutral = summary.neutral,
        dropped = summary.dropped,
        "outcome applied"
    );
    summary
}

/// Create the feedback queue.
pub fn feedback_channel() -> (FeedbackSender, mpsc::UnboundedReceiver<OutcomeReport>) {
    mpsc::unbounded_channel()
}

/// Drain the feedback queue until every sender is dropped.
pub async fn run_feedback_worker(
    mut rx: mpsc::UnboundedReceiver<OutcomeReport>,
    registry: Arc<ComponentRegistry>,
    learner: Arc<WeightLearner>,
) {
    info!("Feedback worker started");
    let mut processed: u64 = 0;
    while let Some(report) = rx.recv().await {
        apply_outcome(&registry, &learner, &report);
        processed += 1;
    }
    info!(processed, "Feedback worker stopped (queue closed)");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentSpec;
    use crate::runtime_config::{LearnerParams, RegistryParams};
    use crate::types::ScoreRange;

    fn setup() -> (Arc<ComponentRegistry>, Arc<WeightLearner>) {
        let reg = Arc::new(ComponentRegistry::new(RegistryParams::default()));
        reg.register(ComponentSpec::director("sentiment", "sentiment desk"))
            .unwrap();
        reg.register(
            ComponentSpec::specialist("news", "sentiment", "news tone")
                .with_range(ScoreRange::Signed)
                .with_weight(0.3)
                .with_regime_weight(Regime::CalmTrend, 0.3),
        )
        .unwrap();
        reg.register(
            ComponentSpec::specialist("social", "sentiment", "social tone")
                .with_weight(0.3)
                .with_regime_weight(Regime::CalmTrend, 0.3),
        )
        .unwrap();
        let learner = Arc::new(WeightLearner::new(reg.clone(), LearnerParams::default()));
        (reg, learner)
    }

    fn report(direction: f64, reward: f64, scores: &[(&str, f64)]) -> OutcomeReport {
        OutcomeReport {
            decision_id: Uuid::new_v4(),
            reward,
            regime: Regime::CalmTrend,
            direction,
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
        }
    }

    #[test]
    fn aligned_components_gain_and_opposed_lose() {
        let (reg, learner) = setup();
        // Bullish decision that paid off: news agreed (+0.8), social disagreed (0.2).
        let s = apply_outcome(
            &reg,
            &learner,
            &report(1.0, 1.0, &[("news", 0.8), ("social", 0.2)]),
        );
        assert_eq!(s.applied, 2);
        assert!(reg.get_weight("news", Regime::CalmTrend).unwrap() > 0.3);
        assert!(reg.get_weight("social", Regime::CalmTrend).unwrap() < 0.3);
        assert_eq!(reg.get("news").unwrap().lifetime.correct, 1);
        assert_eq!(reg.get("social").unwrap().lifetime.incorrect, 1);
    }

    #[test]
    fn bad_outcome_penalises_the_components_that_agreed() {
        let (reg, learner) = setup();
        apply_outcome(&reg, &learner, &report(-1.0, -1.0, &[("news", -0.6)]));
        assert!(reg.get_weight("news", Regime::CalmTrend).unwrap() < 0.3);
        assert_eq!(reg.get("news").unwrap().lifetime.incorrect, 1);
    }

    #[test]
    fn neutral_components_and_decisions_are_skipped() {
        let (reg, learner) = setup();
        let s = apply_outcome(&reg, &learner, &report(1.0, 1.0, &[("news", 0.0), ("social", 0.5)]));
        assert_eq!(s.neutral, 2);
        assert_eq!(s.applied, 0);

        let s = apply_outcome(&reg, &learner, &report(0.0, 1.0, &[("news", 0.9)]));
        assert_eq!(s.neutral, 1);
        assert_eq!(reg.get("news").unwrap().lifetime.participated, 0);
    }

    #[test]
    fn unknown_components_are_dropped() {
        let (reg, learner) = setup();
        let s = apply_outcome(&reg, &learner, &report(1.0, 0.5, &[("ghost", 0.9), ("news", 0.9)]));
        assert_eq!(s.dropped, 1);
        assert_eq!(s.applied, 1);
    }

    #[tokio::test]
    async fn worker_applies_in_submission_order() {
        let (reg, learner) = setup();
        let (tx, rx) = feedback_channel();
        let worker = tokio::spawn(run_feedback_worker(rx, reg.clone(), learner.clone()));

        for _ in 0..5 {
            tx.send(report(1.0, 1.0, &[("news", 0.9)])).unwrap();
        }
        tx.send(report(1.0, -1.0, &[("news", 0.9)])).unwrap();
        drop(tx);
        worker.await.unwrap();

        let c = reg.get("news").unwrap();
        assert_eq!(c.lifetime.participated, 6);
        assert_eq!(c.lifetime.correct, 5);
        assert_eq!(learner.observations("news", Regime::CalmTrend), 6);
    }
}
