// =============================================================================
// Crisis Monitor: Budgeted event detection and the process-wide override
// =============================================================================
//
// One poll:
//   1. Prune expired alerts and stale cache entries.
//   2. Fail fast if the budget cannot cover even one scan.
//   3. Cheap scan. Provider failure = no new evidence.
//   4. Per candidate: cache hit costs nothing, miss charges the scan cost.
//   5. Borderline candidates tighten the polling mode; strong candidates are
//      claimed in the cache, charged the verify cost and deep-verified.
//   6. Verified results become alerts and pass through the severity policy.
//   7. Enough calm polls in a row relax the mode one step, never below what
//      the override implies.
//
// The override is published as an `Arc<OverrideState>` snapshot. Readers
// clone the Arc and never block the monitor. It only moves towards stricter
// states on its own; going back to NORMAL takes an acknowledged manual clear.
// =============================================================================

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crisis::alert::{AlertCategory, CrisisAlert};
use crate::crisis::budget::{BudgetExceeded, BudgetLedger, BudgetSnapshot};
use crate::crisis::cache::{normalize_topic, CacheLookup, EntryKind, TopicCache};
use crate::crisis::detector::{DetectorError, EventDetector};
use crate::runtime_config::MonitorParams;

/// Alerts retained for the audit trail, acted on or not.
const MAX_ALERT_HISTORY: usize = 200;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    BudgetExceeded(#[from] BudgetExceeded),

    #[error("verification of '{topic}' failed: {reason}")]
    VerificationFailure { topic: String, reason: String },

    #[error("clearing the override requires an acknowledgement naming the operator")]
    AcknowledgementRequired,

    #[error(transparent)]
    Detector(#[from] DetectorError),
}

// =============================================================================
// Modes and override state
// =============================================================================

/// Polling cadence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MonitorMode {
    Normal,
    Elevated,
    Crisis,
}

impl MonitorMode {
    fn step_down(self) -> Self {
        match self {
            Self::Crisis => Self::Elevated,
            Self::Elevated | Self::Normal => Self::Normal,
        }
    }
}

impl std::fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::Crisis => write!(f, "CRISIS"),
        }
    }
}

/// How far normal decision flow is restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OverrideStatus {
    Normal,
    /// Blacklisted sectors are suppressed.
    Elevated,
    /// Every decision is suppressed.
    CrisisBlocked,
}

impl OverrideStatus {
    /// Lowest polling mode compatible with this override.
    fn mode_floor(self) -> MonitorMode {
        match self {
            Self::Normal => MonitorMode::Normal,
            Self::Elevated => MonitorMode::Elevated,
            Self::CrisisBlocked => MonitorMode::Crisis,
        }
    }
}

impl Default for OverrideStatus {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for OverrideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::CrisisBlocked => write!(f, "CRISIS_BLOCKED"),
        }
    }
}

/// Immutable published override snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideState {
    pub status: OverrideStatus,
    pub blacklisted_sectors: BTreeSet<String>,
    /// Alert that caused the current state.
    pub alert_id: Option<String>,
    pub since: DateTime<Utc>,
}

impl OverrideState {
    pub fn normal(since: DateTime<Utc>) -> Self {
        Self {
            status: OverrideStatus::Normal,
            blacklisted_sectors: BTreeSet::new(),
            alert_id: None,
            since,
        }
    }

    /// Whether a decision for a ticker in `sector` must be suppressed.
    pub fn blocks(&self, sector: Option<&str>) -> bool {
        match self.status {
            OverrideStatus::CrisisBlocked => true,
            OverrideStatus::Elevated => sector
                .map(|s| self.blacklisted_sectors.contains(&s.to_lowercase()))
                .unwrap_or(false),
            OverrideStatus::Normal => false,
        }
    }
}

/// Manual clear request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub operator: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What the severity policy did with an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertAction {
    Recorded,
    ModeRaised,
    SectorsBlacklisted,
    Blocked,
}

/// Summary of a successful poll.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollReport {
    pub candidates: usize,
    pub cache_hits: usize,
    pub scans_charged: usize,
    pub verifications: usize,
    pub verification_failures: usize,
    pub alerts: Vec<String>,
    pub calm: bool,
}

/// Read-side view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub mode: MonitorMode,
    pub interval_secs: u64,
    pub override_state: OverrideState,
    pub budget: BudgetSnapshot,
    pub active_alerts: usize,
    pub cached_topics: usize,
    pub polls: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

// =============================================================================
// CrisisMonitor
// =============================================================================

struct Inner {
    mode: MonitorMode,
    calm_polls: u32,
    active: BTreeMap<AlertCategory, CrisisAlert>,
    history: VecDeque<CrisisAlert>,
    polls: u64,
    last_poll: Option<DateTime<Utc>>,
}

pub struct CrisisMonitor {
    params: MonitorParams,
    detector: Arc<dyn EventDetector>,
    budget: BudgetLedger,
    cache: TopicCache,
    inner: RwLock<Inner>,
    published: RwLock<Arc<OverrideState>>,
}

impl CrisisMonitor {
    pub fn new(params: MonitorParams, detector: Arc<dyn EventDetector>) -> Self {
        Self::starting_at(params, detector, Utc::now())
    }

    pub fn starting_at(
        params: MonitorParams,
        detector: Arc<dyn EventDetector>,
        now: DateTime<Utc>,
    ) -> Self {
        info!(
            detector = detector.name(),
            daily_budget = params.daily_budget,
            "Crisis monitor initialised"
        );
        Self {
            budget: BudgetLedger::starting_at(params.daily_budget, now),
            cache: TopicCache::new(Duration::seconds(params.cache_ttl_secs.max(1))),
            inner: RwLock::new(Inner {
                mode: MonitorMode::Normal,
                calm_polls: 0,
                active: BTreeMap::new(),
                history: VecDeque::new(),
                polls: 0,
                last_poll: None,
            }),
            published: RwLock::new(Arc::new(OverrideState::normal(now))),
            detector,
            params,
        }
    }

    // -------------------------------------------------------------------------
    // Read side
    // -------------------------------------------------------------------------

    /// Current published override. Never blocks on a running poll.
    pub fn override_snapshot(&self) -> Arc<OverrideState> {
        self.published.read().clone()
    }

    pub fn mode(&self) -> MonitorMode {
        self.inner.read().mode
    }

    /// Polling interval implied by the current mode.
    pub fn interval_secs(&self) -> u64 {
        match self.mode() {
            MonitorMode::Normal => self.params.normal_interval_secs,
            MonitorMode::Elevated => self.params.elevated_interval_secs,
            MonitorMode::Crisis => self.params.crisis_interval_secs,
        }
    }

    pub fn budget_remaining(&self) -> u32 {
        self.budget.remaining()
    }

    pub fn budget_snapshot(&self) -> BudgetSnapshot {
        self.budget.snapshot()
    }

    /// Unexpired alerts, one per category (latest wins).
    pub fn active_alerts(&self) -> Vec<CrisisAlert> {
        let now = Utc::now();
        self.inner
            .read()
            .active
            .values()
            .filter(|a| !a.is_expired(now))
            .cloned()
            .collect()
    }

    /// Recent alerts, newest first, including those that were only recorded.
    pub fn recent_alerts(&self, limit: usize) -> Vec<CrisisAlert> {
        self.inner
            .read()
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn status(&self) -> MonitorStatus {
        let (mode, active, polls, last_poll) = {
            let inner = self.inner.read();
            (inner.mode, inner.active.len(), inner.polls, inner.last_poll)
        };
        MonitorStatus {
            mode,
            interval_secs: self.interval_secs(),
            override_state: (*self.override_snapshot()).clone(),
            budget: self.budget.snapshot(),
            active_alerts: active,
            cached_topics: self.cache.len(),
            polls,
            last_poll,
        }
    }

    // -------------------------------------------------------------------------
    // Poll
    // -------------------------------------------------------------------------

    pub async fn poll_once(&self) -> Result<PollReport, MonitorError> {
        self.poll_once_at(Utc::now()).await
    }

    pub async fn poll_once_at(&self, now: DateTime<Utc>) -> Result<PollReport, MonitorError> {
        self.prune(now);
        {
            let mut inner = self.inner.write();
            inner.polls += 1;
            inner.last_poll = Some(now);
        }

        let remaining = self.budget.remaining_at(now);
        if remaining < self.params.scan_cost {
            warn!(
                remaining,
                scan_cost = self.params.scan_cost,
                "Crisis poll skipped; budget cannot cover a scan"
            );
            return Err(BudgetExceeded {
                requested: self.params.scan_cost,
                remaining,
                ceiling: self.budget.ceiling(),
            }
            .into());
        }

        let candidates = match self.detector.cheap_scan().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, detector = self.detector.name(), "Cheap scan failed; treating as no new evidence");
                Vec::new()
            }
        };

        let mut report = PollReport {
            candidates: candidates.len(),
            ..PollReport::default()
        };
        let mut borderline = false;
        let mut escalate: Vec<(String, String)> = Vec::new();

        for candidate in &candidates {
            let key = normalize_topic(&candidate.topic);
            if key.is_empty() {
                continue;
            }
            let confidence = if candidate.raw_confidence.is_finite() {
                candidate.raw_confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };

            match self.cache.lookup_at(&key, now) {
                CacheLookup::Hit(EntryKind::Scanned { confidence: cached }) => {
                    report.cache_hits += 1;
                    borderline |= cached >= self.params.borderline_threshold;
                    continue;
                }
                CacheLookup::Hit(_) => {
                    report.cache_hits += 1;
                    continue;
                }
                CacheLookup::InFlight => {
                    report.cache_hits += 1;
                    continue;
                }
                CacheLookup::Miss | CacheLookup::Stale => {}
            }

            if let Err(e) = self.budget.try_charge_at(self.params.scan_cost, now) {
                warn!(
                    topic = %key,
                    evaluated = report.scans_charged,
                    unverified = escalate.len(),
                    "Crisis scan stopped; daily budget exhausted, mode kept"
                );
                // Strong candidates must be scanned again once budget returns.
                for (pending, _) in &escalate {
                    self.cache.forget_scan(pending);
                }
                return Err(e.into());
            }
            report.scans_charged += 1;
            self.cache.record_scan(&key, confidence, now);

            if confidence >= self.params.borderline_threshold {
                borderline = true;
            }
            if confidence >= self.params.escalation_threshold {
                escalate.push((key, candidate.topic.clone()));
            }
        }

        if borderline {
            self.raise_mode(MonitorMode::Elevated);
        }

        // Claim and pay for verifications up front, then run them together.
        let mut refused: Option<BudgetExceeded> = None;
        let mut claimed: Vec<(String, String)> = Vec::new();
        for (i, (key, topic)) in escalate.iter().enumerate() {
            if !self.cache.claim(key, now) {
                debug!(topic = %key, "Verification already in flight; skipped");
                continue;
            }
            if let Err(e) = self.budget.try_charge_at(self.params.verify_cost, now) {
                self.cache.release(key);
                for (pending, _) in &escalate[i + 1..] {
                    self.cache.forget_scan(pending);
                }
                refused = Some(e);
                break;
            }
            claimed.push((key.clone(), topic.clone()));
        }

        let results = join_all(
            claimed
                .iter()
                .map(|(_, topic)| self.detector.deep_verify(topic)),
        )
        .await;

        let mut acted = false;
        for ((key, topic), result) in claimed.into_iter().zip(results) {
            report.verifications += 1;
            match result {
                Ok(verification) => {
                    let ttl = Duration::seconds(self.params.alert_ttl_secs.max(1));
                    let alert = CrisisAlert::from_verification(&topic, verification, now, ttl);
                    self.cache.complete(&key, &alert.id, alert.severity, now);
                    report.alerts.push(alert.id.clone());
                    if self.apply_alert(alert, now) != AlertAction::Recorded {
                        acted = true;
                    }
                }
                Err(e) => {
                    self.cache.release(&key);
                    report.verification_failures += 1;
                    let failure = MonitorError::VerificationFailure {
                        topic: key,
                        reason: e.to_string(),
                    };
                    warn!(error = %failure, "Verification failed; no state change");
                }
            }
        }

        report.calm = !borderline && !acted;
        self.track_calm(report.calm);

        debug!(
            candidates = report.candidates,
            cache_hits = report.cache_hits,
            scans = report.scans_charged,
            verifications = report.verifications,
            mode = %self.mode(),
            budget_remaining = self.budget.remaining_at(now),
            "Crisis poll complete"
        );

        match refused {
            Some(e) => {
                warn!(error = %e, "Verification refused; daily budget exhausted");
                Err(e.into())
            }
            None => Ok(report),
        }
    }

    // -------------------------------------------------------------------------
    // Severity policy
    // -------------------------------------------------------------------------

    /// Record `alert` and apply the severity policy to mode and override.
    pub fn apply_alert(&self, alert: CrisisAlert, now: DateTime<Utc>) -> AlertAction {
        let policy = &self.params.severity;

        let action = if alert.credibility < self.params.min_credibility
            || alert.severity <= policy.record_max
        {
            AlertAction::Recorded
        } else if alert.severity <= policy.elevate_max {
            AlertAction::ModeRaised
        } else if alert.severity <= policy.blacklist_max {
            AlertAction::SectorsBlacklisted
        } else {
            AlertAction::Blocked
        };

        {
            let mut inner = self.inner.write();
            inner.history.push_back(alert.clone());
            while inner.history.len() > MAX_ALERT_HISTORY {
                inner.history.pop_front();
            }
            if alert.credibility >= self.params.min_credibility {
                inner.active.insert(alert.category, alert.clone());
            }
        }

        match action {
            AlertAction::Recorded => {
                info!(
                    alert = %alert.id,
                    category = %alert.category,
                    severity = alert.severity,
                    credibility = format!("{:.2}", alert.credibility),
                    "Crisis alert recorded (no action)"
                );
            }
            AlertAction::ModeRaised => {
                self.raise_mode(MonitorMode::Elevated);
                info!(
                    alert = %alert.id,
                    category = %alert.category,
                    severity = alert.severity,
                    "Crisis alert; polling tightened"
                );
            }
            AlertAction::SectorsBlacklisted => {
                self.escalate_override(&alert, OverrideStatus::Elevated, now);
                self.raise_mode(MonitorMode::Elevated);
            }
            AlertAction::Blocked => {
                self.escalate_override(&alert, OverrideStatus::CrisisBlocked, now);
                self.raise_mode(MonitorMode::Crisis);
            }
        }
        action
    }

    fn escalate_override(&self, alert: &CrisisAlert, status: OverrideStatus, now: DateTime<Utc>) {
        let mut published = self.published.write();
        let current = published.as_ref();

        let next_status = current.status.max(status);
        let mut sectors = current.blacklisted_sectors.clone();
        sectors.extend(alert.affected_sectors.iter().cloned());
        let since = if next_status != current.status {
            now
        } else {
            current.since
        };
        // A milder alert widens the blacklist but keeps the causing alert.
        let alert_id = if status >= current.status {
            Some(alert.id.clone())
        } else {
            current.alert_id.clone()
        };

        let next = OverrideState {
            status: next_status,
            blacklisted_sectors: sectors,
            alert_id,
            since,
        };

        warn!(
            from = %current.status,
            to = %next.status,
            alert = %alert.id,
            category = %alert.category,
            severity = alert.severity,
            sectors = ?next.blacklisted_sectors,
            "Override escalated"
        );
        *published = Arc::new(next);
    }

    fn raise_mode(&self, at_least: MonitorMode) {
        let mut inner = self.inner.write();
        if inner.mode < at_least {
            info!(from = %inner.mode, to = %at_least, "Crisis polling mode raised");
            inner.mode = at_least;
        }
        inner.calm_polls = 0;
    }

    fn track_calm(&self, calm: bool) {
        let floor = self.override_snapshot().status.mode_floor();
        let mut inner = self.inner.write();
        if !calm {
            inner.calm_polls = 0;
            return;
        }
        inner.calm_polls += 1;
        if inner.calm_polls >= self.params.calm_polls_to_relax.max(1) {
            inner.calm_polls = 0;
            let relaxed = inner.mode.step_down().max(floor);
            if relaxed != inner.mode {
                info!(from = %inner.mode, to = %relaxed, "Crisis polling mode relaxed");
                inner.mode = relaxed;
            }
        }
    }

    fn prune(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        let before = inner.active.len();
        inner.active.retain(|_, a| !a.is_expired(now));
        let expired = before - inner.active.len();
        drop(inner);

        let evicted = self.cache.prune_at(now);
        if expired > 0 || evicted > 0 {
            debug!(expired, evicted, "Crisis state pruned");
        }
    }

    // -------------------------------------------------------------------------
    // Manual control
    // -------------------------------------------------------------------------

    /// Reset the override to NORMAL. Returns the state that was cleared.
    pub fn clear_override(&self, ack: &Acknowledgement) -> Result<OverrideState, MonitorError> {
        if ack.operator.trim().is_empty() {
            return Err(MonitorError::AcknowledgementRequired);
        }
        let now = Utc::now();
        let previous = {
            let mut published = self.published.write();
            let previous = (**published).clone();
            *published = Arc::new(OverrideState::normal(now));
            previous
        };
        {
            let mut inner = self.inner.write();
            inner.mode = MonitorMode::Normal;
            inner.calm_polls = 0;
        }
        warn!(
            operator = %ack.operator.trim(),
            reason = ack.reason.as_deref().unwrap_or(""),
            previous = %previous.status,
            previous_alert = previous.alert_id.as_deref().unwrap_or("-"),
            "Override cleared manually"
        );
        Ok(previous)
    }
}

impl std::fmt::Debug for CrisisMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrisisMonitor")
            .field("detector", &self.detector.name())
            .field("mode", &self.mode())
            .field("override", &self.override_snapshot().status)
            .field("budget", &self.budget)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crisis::alert::Verification;
    use crate::crisis::detector::ScanCandidate;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Detector replaying canned scans and verifications.
    #[derive(Default)]
    pub(crate) struct ScriptedDetector {
        pub scan: Mutex<Vec<ScanCandidate>>,
        pub verdicts: Mutex<HashMap<String, Verification>>,
        pub fail_scan: Mutex<bool>,
        pub scan_calls: AtomicUsize,
        pub verify_calls: AtomicUsize,
    }

    impl ScriptedDetector {
        pub fn with_scan(topics: &[(&str, f64)]) -> Self {
            let d = Self::default();
            *d.scan.lock() = topics
                .iter()
                .map(|(t, c)| ScanCandidate {
                    topic: t.to_string(),
                    raw_confidence: *c,
                })
                .collect();
            d
        }

        pub fn verdict(self, topic: &str, v: Verification) -> Self {
            self.verdicts.lock().insert(topic.to_string(), v);
            self
        }
    }

    #[async_trait]
    impl EventDetector for ScriptedDetector {
        async fn cheap_scan(&self) -> Result<Vec<ScanCandidate>, DetectorError> {
            self.scan_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail_scan.lock() {
                return Err(DetectorError::Http("connection reset".into()));
            }
            Ok(self.scan.lock().clone())
        }

        async fn deep_verify(&self, topic: &str) -> Result<Verification, DetectorError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.verdicts
                .lock()
                .get(topic)
                .cloned()
                .ok_or_else(|| DetectorError::Status {
                    status: 503,
                    body: "overloaded".into(),
                })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn bank_failure(severity: i64) -> Verification {
        Verification {
            severity,
            credibility: 0.9,
            category: AlertCategory::BankFailure,
            affected_sectors: vec!["financials".into()],
            summary: "regional lender halted withdrawals".into(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap()
    }

    fn monitor(params: MonitorParams, detector: Arc<ScriptedDetector>) -> CrisisMonitor {
        CrisisMonitor::starting_at(params, detector, t0())
    }

    #[tokio::test]
    async fn ceiling_ten_with_eleven_scans() {
        let topics: Vec<String> = (0..11).map(|i| format!("quiet topic {i}")).collect();
        let refs: Vec<(&str, f64)> = topics.iter().map(|t| (t.as_str(), 0.1)).collect();
        let det = Arc::new(ScriptedDetector::with_scan(&refs));
        let params = MonitorParams {
            daily_budget: 10,
            scan_cost: 1,
            ..MonitorParams::default()
        };
        let m = monitor(params, det.clone());

        let err = m.poll_once_at(t0()).await.unwrap_err();
        assert!(matches!(err, MonitorError::BudgetExceeded(_)));
        let budget = m.budget.snapshot_at(t0());
        assert_eq!(budget.spent, 10);
        assert_eq!(budget.remaining, 0);
        assert_eq!(m.mode(), MonitorMode::Normal);

        // Fails fast afterwards without calling the provider again.
        let calls = det.scan_calls.load(Ordering::SeqCst);
        assert!(m.poll_once_at(t0()).await.is_err());
        assert_eq!(det.scan_calls.load(Ordering::SeqCst), calls);
        assert_eq!(m.budget.snapshot_at(t0()).spent, 10);
    }

    #[tokio::test]
    async fn cache_hit_consumes_budget_once() {
        let det = Arc::new(ScriptedDetector::with_scan(&[
            ("Port strike in Rotterdam", 0.1),
            ("port strike in rotterdam!", 0.1),
        ]));
        let m = monitor(MonitorParams::default(), det);

        let report = m.poll_once_at(t0()).await.unwrap();
        assert_eq!(report.scans_charged, 1);
        assert_eq!(report.cache_hits, 1);

        let report = m.poll_once_at(t0() + Duration::minutes(15)).await.unwrap();
        assert_eq!(report.scans_charged, 0);
        assert_eq!(m.budget.snapshot_at(t0()).spent, 1);

        // After the TTL the entry is stale and is charged again.
        let later = t0() + Duration::seconds(MonitorParams::default().cache_ttl_secs + 1);
        let report = m.poll_once_at(later).await.unwrap();
        assert_eq!(report.scans_charged, 1);
    }

    #[tokio::test]
    async fn budget_is_never_exceeded() {
        let topics: Vec<String> = (0..40).map(|i| format!("event {i}")).collect();
        let refs: Vec<(&str, f64)> = topics.iter().map(|t| (t.as_str(), 0.9)).collect();
        let mut det = ScriptedDetector::with_scan(&refs);
        for t in &topics {
            det = det.verdict(t, bank_failure(2));
        }
        let det = Arc::new(det);
        let params = MonitorParams {
            daily_budget: 23,
            scan_cost: 1,
            verify_cost: 5,
            ..MonitorParams::default()
        };
        let m = monitor(params, det);
        for i in 0..10 {
            let _ = m.poll_once_at(t0() + Duration::minutes(i)).await;
            let b = m.budget.snapshot_at(t0());
            assert!(b.spent <= b.ceiling);
        }
    }

    #[tokio::test]
    async fn severity_nine_blocks_and_clear_restores() {
        let det = Arc::new(
            ScriptedDetector::with_scan(&[("Bank failure at regional lender", 0.8)])
                .verdict("Bank failure at regional lender", bank_failure(9)),
        );
        let m = monitor(MonitorParams::default(), det.clone());

        let report = m.poll_once_at(t0()).await.unwrap();
        assert_eq!(report.verifications, 1);
        assert_eq!(report.alerts.len(), 1);

        let snap = m.override_snapshot();
        assert_eq!(snap.status, OverrideStatus::CrisisBlocked);
        assert_eq!(snap.alert_id.as_deref(), Some(report.alerts[0].as_str()));
        assert!(snap.blacklisted_sectors.contains("financials"));
        assert!(snap.blocks(Some("technology")));
        assert_eq!(m.mode(), MonitorMode::Crisis);
        assert_eq!(m.interval_secs(), 60);
        assert_eq!(m.budget.snapshot_at(t0()).spent, 1 + 5);

        // Calm polls never relax a blocked override or its mode floor.
        *det.scan.lock() = Vec::new();
        for i in 1..10 {
            m.poll_once_at(t0() + Duration::minutes(i)).await.unwrap();
        }
        assert_eq!(m.override_snapshot().status, OverrideStatus::CrisisBlocked);
        assert_eq!(m.mode(), MonitorMode::Crisis);

        let previous = m
            .clear_override(&Acknowledgement {
                operator: "ops-oncall".into(),
                reason: Some("deposits guaranteed".into()),
            })
            .unwrap();
        assert_eq!(previous.status, OverrideStatus::CrisisBlocked);
        assert_eq!(m.override_snapshot().status, OverrideStatus::Normal);
        assert!(m.override_snapshot().blacklisted_sectors.is_empty());
        assert_eq!(m.mode(), MonitorMode::Normal);
    }

    #[tokio::test]
    async fn clear_requires_operator() {
        let m = monitor(MonitorParams::default(), Arc::new(ScriptedDetector::default()));
        let err = m
            .clear_override(&Acknowledgement {
                operator: "  ".into(),
                reason: None,
            })
            .unwrap_err();
        assert!(matches!(err, MonitorError::AcknowledgementRequired));
    }

    #[tokio::test]
    async fn severity_bands_follow_policy() {
        let m = monitor(MonitorParams::default(), Arc::new(ScriptedDetector::default()));
        let ttl = Duration::hours(6);

        let a = CrisisAlert::from_verification("minor", bank_failure(3), t0(), ttl);
        assert_eq!(m.apply_alert(a, t0()), AlertAction::Recorded);
        assert_eq!(m.mode(), MonitorMode::Normal);

        let a = CrisisAlert::from_verification("watch", bank_failure(5), t0(), ttl);
        assert_eq!(m.apply_alert(a, t0()), AlertAction::ModeRaised);
        assert_eq!(m.mode(), MonitorMode::Elevated);
        assert_eq!(m.override_snapshot().status, OverrideStatus::Normal);

        let a = CrisisAlert::from_verification("serious", bank_failure(8), t0(), ttl);
        assert_eq!(m.apply_alert(a, t0()), AlertAction::SectorsBlacklisted);
        let snap = m.override_snapshot();
        assert_eq!(snap.status, OverrideStatus::Elevated);
        assert!(snap.blocks(Some("Financials")));
        assert!(!snap.blocks(Some("energy")));
        assert!(!snap.blocks(None));
    }

    #[tokio::test]
    async fn milder_alert_keeps_blocking_alert_id() {
        let m = monitor(MonitorParams::default(), Arc::new(ScriptedDetector::default()));
        let ttl = Duration::hours(6);

        let block = CrisisAlert::from_verification("bank run", bank_failure(9), t0(), ttl);
        let block_id = block.id.clone();
        m.apply_alert(block, t0());

        let later = t0() + Duration::minutes(5);
        let border = CrisisAlert::from_verification(
            "border closure",
            Verification {
                severity: 7,
                credibility: 0.9,
                category: AlertCategory::Geopolitical,
                affected_sectors: vec!["energy".into()],
                summary: "pipeline route closed".into(),
            },
            later,
            ttl,
        );
        assert_eq!(m.apply_alert(border, later), AlertAction::SectorsBlacklisted);

        let snap = m.override_snapshot();
        assert_eq!(snap.status, OverrideStatus::CrisisBlocked);
        assert_eq!(snap.alert_id.as_deref(), Some(block_id.as_str()));
        assert_eq!(snap.since, t0());
        assert!(snap.blacklisted_sectors.contains("energy"));

        // An equally strict alert may take over the citation.
        let second = CrisisAlert::from_verification("default", bank_failure(10), later, ttl);
        let second_id = second.id.clone();
        m.apply_alert(second, later);
        assert_eq!(m.override_snapshot().alert_id.as_deref(), Some(second_id.as_str()));
    }

    #[tokio::test]
    async fn low_credibility_alert_is_only_recorded() {
        let m = monitor(MonitorParams::default(), Arc::new(ScriptedDetector::default()));
        let mut v = bank_failure(10);
        v.credibility = 0.2;
        let a = CrisisAlert::from_verification("rumour", v, t0(), Duration::hours(6));
        assert_eq!(m.apply_alert(a, t0()), AlertAction::Recorded);
        assert_eq!(m.override_snapshot().status, OverrideStatus::Normal);
        assert_eq!(m.recent_alerts(10).len(), 1);
    }

    #[tokio::test]
    async fn borderline_scan_elevates_then_relaxes() {
        let det = Arc::new(ScriptedDetector::with_scan(&[("Unusual repo market stress", 0.35)]));
        let m = monitor(MonitorParams::default(), det.clone());

        m.poll_once_at(t0()).await.unwrap();
        assert_eq!(m.mode(), MonitorMode::Elevated);
        assert_eq!(m.interval_secs(), 300);
        // Below the escalation threshold: never verified.
        assert_eq!(det.verify_calls.load(Ordering::SeqCst), 0);

        *det.scan.lock() = Vec::new();
        for i in 1..=3 {
            m.poll_once_at(t0() + Duration::minutes(i)).await.unwrap();
        }
        assert_eq!(m.mode(), MonitorMode::Normal);
    }

    #[tokio::test]
    async fn verification_failure_changes_nothing_and_releases_claim() {
        let det = Arc::new(ScriptedDetector::with_scan(&[("Exchange outage", 0.9)]));
        let m = monitor(MonitorParams::default(), det.clone());

        let report = m.poll_once_at(t0()).await.unwrap();
        assert_eq!(report.verification_failures, 1);
        assert_eq!(m.override_snapshot().status, OverrideStatus::Normal);
        assert_eq!(m.cache.lookup_at("exchange outage", t0()), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn scan_failure_is_no_evidence() {
        let det = Arc::new(ScriptedDetector::default());
        *det.fail_scan.lock() = true;
        let m = monitor(MonitorParams::default(), det);
        let report = m.poll_once_at(t0()).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert!(report.calm);
        assert_eq!(m.mode(), MonitorMode::Normal);
    }

    #[tokio::test]
    async fn unaffordable_verification_is_refused() {
        let det = Arc::new(
            ScriptedDetector::with_scan(&[("Sovereign default risk", 0.9)])
                .verdict("Sovereign default risk", bank_failure(9)),
        );
        let params = MonitorParams {
            daily_budget: 3,
            scan_cost: 1,
            verify_cost: 5,
            ..MonitorParams::default()
        };
        let m = monitor(params, det.clone());
        let err = m.poll_once_at(t0()).await.unwrap_err();
        assert!(matches!(err, MonitorError::BudgetExceeded(_)));
        assert_eq!(det.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(m.budget.snapshot_at(t0()).spent, 1);
        assert_eq!(m.override_snapshot().status, OverrideStatus::Normal);
        // Claim released; the scanned result was replaced by the claim.
        assert_eq!(m.cache.lookup_at("sovereign default risk", t0()), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn strong_candidate_cut_off_by_budget_is_verified_after_reset() {
        let topic = "Bank failure at clearing house";
        let det = Arc::new(
            ScriptedDetector::with_scan(&[
                (topic, 0.9),
                ("Port congestion", 0.1),
                ("Chip export rules", 0.1),
                ("Grain harvest", 0.1),
            ])
            .verdict(topic, bank_failure(9)),
        );
        let params = MonitorParams {
            daily_budget: 3,
            scan_cost: 1,
            verify_cost: 1,
            ..MonitorParams::default()
        };
        let late = Utc.with_ymd_and_hms(2026, 3, 9, 23, 55, 0).unwrap();
        let m = CrisisMonitor::starting_at(params, det.clone(), late);

        let err = m.poll_once_at(late).await.unwrap_err();
        assert!(matches!(err, MonitorError::BudgetExceeded(_)));
        assert_eq!(det.verify_calls.load(Ordering::SeqCst), 0);
        let key = normalize_topic(topic);
        assert_eq!(m.cache.lookup_at(&key, late), CacheLookup::Miss);
        assert!(matches!(
            m.cache.lookup_at("port congestion", late),
            CacheLookup::Hit(EntryKind::Scanned { .. })
        ));

        let next_day = late + Duration::minutes(10);
        let report = m.poll_once_at(next_day).await.unwrap();
        assert_eq!(report.scans_charged, 2);
        assert_eq!(report.cache_hits, 2);
        assert_eq!(report.verifications, 1);
        assert_eq!(det.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.override_snapshot().status, OverrideStatus::CrisisBlocked);
        assert_eq!(m.budget.snapshot_at(next_day).spent, 3);
    }

    #[tokio::test]
    async fn refused_verifications_leave_no_scanned_entry_behind() {
        let det = Arc::new(ScriptedDetector::with_scan(&[
            ("Sovereign default risk", 0.9),
            ("Regional bank run", 0.8),
            ("Exchange outage", 0.7),
        ]));
        let params = MonitorParams {
            daily_budget: 8,
            scan_cost: 1,
            verify_cost: 5,
            ..MonitorParams::default()
        };
        let m = monitor(params, det.clone());
        let err = m.poll_once_at(t0()).await.unwrap_err();
        assert!(matches!(err, MonitorError::BudgetExceeded(_)));
        // Only the first verification was affordable.
        assert_eq!(det.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.cache.lookup_at("regional bank run", t0()), CacheLookup::Miss);
        assert_eq!(m.cache.lookup_at("exchange outage", t0()), CacheLookup::Miss);
    }

    #[tokio::test]
    async fn expired_alerts_are_pruned_without_state_change() {
        let det = Arc::new(ScriptedDetector::default());
        let params = MonitorParams {
            alert_ttl_secs: 60,
            ..MonitorParams::default()
        };
        let m = monitor(params, det);
        let a = CrisisAlert::from_verification("serious", bank_failure(8), t0(), Duration::seconds(60));
        m.apply_alert(a, t0());
        assert_eq!(m.inner.read().active.len(), 1);

        m.poll_once_at(t0() + Duration::minutes(5)).await.unwrap();
        assert!(m.inner.read().active.is_empty());
        assert_eq!(m.override_snapshot().status, OverrideStatus::Elevated);
    }
}
