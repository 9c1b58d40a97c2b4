// =============================================================================
// Central Application State: Signal Council
// =============================================================================
//
// Every engine is constructed exactly once here and wired by explicit
// dependency injection: the aggregator receives `Arc`s to the registry, regime
// detector and crisis monitor; the learner receives the registry. Nothing is
// a global.
//
// AppState also owns the decision ledger used to resolve `report_outcome`
// ids, the feedback queue sender and the status snapshot.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for the ledgers.
//   - The runtime config is fixed at startup and shared read-only.
//   - Engines manage their own interior mutability behind `Arc`.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::components::ComponentRegistry;
use crate::crisis::{
    Acknowledgement, BudgetSnapshot, CrisisMonitor, EventDetector, MonitorError, MonitorMode,
    OverrideState, OverrideStatus, SchedulerSnapshot, SchedulerState,
};
use crate::decision::{ComponentScore, Decision, DecisionAggregator};
use crate::learning::{feedback_channel, FeedbackSender, OutcomeReport, WeightLearner};
use crate::regime::{MarketObservation, RegimeDetector};
use crate::runtime_config::RuntimeConfig;
use crate::types::Regime;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the status error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Decisions retained for outcome lookup and auditing.
const MAX_RECENT_DECISIONS: usize = 1000;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every decision, outcome and override change.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    /// Effective configuration, immutable after startup.
    pub runtime_config: Arc<RuntimeConfig>,

    // ── Engines ─────────────────────────────────────────────────────────
    pub registry: Arc<ComponentRegistry>,
    pub learner: Arc<WeightLearner>,
    pub regime_detector: Arc<RegimeDetector>,
    pub crisis_monitor: Arc<CrisisMonitor>,
    pub scheduler: Arc<SchedulerState>,
    pub aggregator: DecisionAggregator,

    // ── Feedback ────────────────────────────────────────────────────────
    feedback: FeedbackSender,

    // ── Decision ledger ─────────────────────────────────────────────────
    pub recent_decisions: RwLock<VecDeque<Decision>>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Build every engine from `config`. The returned receiver must be handed
    /// to the feedback worker.
    pub fn new(
        config: RuntimeConfig,
        detector: Arc<dyn EventDetector>,
    ) -> (Self, mpsc::UnboundedReceiver<OutcomeReport>) {
        let registry = Arc::new(ComponentRegistry::new(config.registry.clone()));
        let learner = Arc::new(WeightLearner::new(
            Arc::clone(&registry),
            config.learner.clone(),
        ));
        let regime_detector = Arc::new(RegimeDetector::new(config.regime.clone()));
        let crisis_monitor = Arc::new(CrisisMonitor::new(config.monitor.clone(), detector));
        let aggregator = DecisionAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&regime_detector),
            Arc::clone(&crisis_monitor),
            config.aggregator.clone(),
            &config.sectors,
        );
        let (feedback, rx) = feedback_channel();

        let state = Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(config),
            registry,
            learner,
            regime_detector,
            crisis_monitor,
            scheduler: Arc::new(SchedulerState::new()),
            aggregator,
            feedback,
            recent_decisions: RwLock::new(VecDeque::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        };
        (state, rx)
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // ── Operations ──────────────────────────────────────────────────────

    /// Evaluate `scores` for `ticker` and record the decision.
    pub fn decide(&self, ticker: &str, scores: &[ComponentScore]) -> Decision {
        let decision = self.aggregator.decide(ticker, scores);

        info!(
            id = %decision.id,
            ticker = %decision.verdict.ticker,
            action = %decision.verdict.action,
            aggregate = format!("{:.3}", decision.verdict.aggregate),
            confidence = format!("{:.3}", decision.verdict.confidence),
            regime = %decision.verdict.regime,
            override_status = %decision.verdict.override_status,
            "Decision recorded"
        );

        let mut ledger = self.recent_decisions.write();
        ledger.push_back(decision.clone());
        while ledger.len() > MAX_RECENT_DECISIONS {
            ledger.pop_front();
        }
        drop(ledger);

        self.increment_version();
        decision
    }

    /// Queue an outcome for the decision `decision_id`. Returns false (with a
    /// warning) when the decision is unknown or the reward unusable.
    pub fn report_outcome(&self, decision_id: Uuid, reward: f64) -> bool {
        if !reward.is_finite() {
            warn!(decision = %decision_id, reward, "outcome with non-finite reward dropped");
            return false;
        }
        let Some(decision) = self.find_decision(decision_id) else {
            warn!(decision = %decision_id, "outcome for unknown decision dropped");
            return false;
        };

        let report = OutcomeReport::from_decision(&decision, reward);
        if self.feedback.send(report).is_err() {
            self.push_error_with_code(
                format!("feedback worker unavailable, outcome for {decision_id} dropped"),
                Some("FEEDBACK_CLOSED".to_string()),
            );
            warn!(decision = %decision_id, "feedback queue closed; outcome dropped");
            return false;
        }

        self.increment_version();
        true
    }

    /// Manual override clear. Visible to the next `decide`.
    pub fn clear_override(&self, ack: &Acknowledgement) -> Result<OverrideState, MonitorError> {
        let previous = self.crisis_monitor.clear_override(ack)?;
        self.increment_version();
        Ok(previous)
    }

    /// Feed a market-wide observation to the regime detector.
    pub fn observe_market(&self, observation: MarketObservation) {
        self.regime_detector.observe(observation);
    }

    pub fn find_decision(&self, id: Uuid) -> Option<Decision> {
        self.recent_decisions
            .read()
            .iter()
            .rev()
            .find(|d| d.id == id)
            .cloned()
    }

    /// Most recent decisions, newest first.
    pub fn recent_decisions(&self, limit: usize) -> Vec<Decision> {
        self.recent_decisions
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    // ── Status ──────────────────────────────────────────────────────────

    pub fn get_status(&self) -> StatusSnapshot {
        let regime = self.regime_detector.current();
        let monitor = self.crisis_monitor.status();
        let components = self.registry.list();

        StatusSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            mode: monitor.mode,
            poll_interval_secs: monitor.interval_secs,
            override_state: monitor.override_state.status,
            override_alert_id: monitor.override_state.alert_id.clone(),
            override_since: monitor.override_state.since,
            blacklisted_sectors: monitor.override_state.blacklisted_sectors.into_iter().collect(),
            budget_remaining: monitor.budget.remaining,
            budget: monitor.budget,
            active_alerts: monitor.active_alerts,
            current_regime: regime.regime,
            low_confidence: regime.low_confidence,
            regime_confidence: regime.confidence,
            regime_since: regime.since,
            components: components.len(),
            active_components: components.iter().filter(|c| c.is_active()).count(),
            deactivated_components: components
                .iter()
                .filter(|c| c.deactivated)
                .map(|c| c.id.clone())
                .collect(),
            decisions_recorded: self.recent_decisions.read().len(),
            scheduler: self.scheduler.snapshot(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("state_version", &self.current_state_version())
            .field("registry", &self.registry)
            .field("crisis_monitor", &self.crisis_monitor)
            .finish()
    }
}

// =============================================================================
// Serialisable status snapshot
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,

    // ── Crisis monitor ──────────────────────────────────────────────────
    pub mode: MonitorMode,
    pub poll_interval_secs: u64,
    pub override_state: OverrideStatus,
    pub override_alert_id: Option<String>,
    pub override_since: DateTime<Utc>,
    pub blacklisted_sectors: Vec<String>,
    pub budget_remaining: u32,
    pub budget: BudgetSnapshot,
    pub active_alerts: usize,
    pub scheduler: SchedulerSnapshot,

    // ── Regime ──────────────────────────────────────────────────────────
    pub current_regime: Regime,
    pub low_confidence: bool,
    pub regime_confidence: f64,
    pub regime_since: DateTime<Utc>,

    // ── Components ──────────────────────────────────────────────────────
    pub components: usize,
    pub active_components: usize,
    pub deactivated_components: Vec<String>,

    pub decisions_recorded: usize,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// Tests
// =============================================================================
