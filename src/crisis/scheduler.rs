// =============================================================================
// Crisis Scheduler: Adaptive-cadence polling loop
// =============================================================================
//
// Wakes every second (missed ticks are skipped). When the interval implied by
// the monitor's current mode has elapsed since the last poll started, a poll
// is spawned, unless the previous one is still running, in which case the
// tick is skipped and counted.
//
// Spawned once at startup:
//
//   tokio::spawn(run_crisis_monitor(Arc::clone(&monitor), Arc::clone(&sched)));
//
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::crisis::monitor::{CrisisMonitor, MonitorError};

const TICK_SECS: u64 = 1;

/// Shared scheduler bookkeeping.
#[derive(Debug, Default)]
pub struct SchedulerState {
    in_flight: Arc<AtomicBool>,
    started: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub in_flight: bool,
    pub polls_started: u64,
    pub polls_skipped: u64,
    pub polls_failed: u64,
}

/// Clears the in-flight flag when the poll task ends, however it ends.
pub struct PollGuard(Arc<AtomicBool>);

impl Drop for PollGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a poll as running. `None` (and a skip counted) if one already is.
    pub fn try_start(&self) -> Option<PollGuard> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.started.fetch_add(1, Ordering::Relaxed);
        Some(PollGuard(Arc::clone(&self.in_flight)))
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            in_flight: self.in_flight.load(Ordering::Acquire),
            polls_started: self.started.load(Ordering::Relaxed),
            polls_skipped: self.skipped.load(Ordering::Relaxed),
            polls_failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Run the crisis polling loop forever. Spawn as a background task.
pub async fn run_crisis_monitor(monitor: Arc<CrisisMonitor>, state: Arc<SchedulerState>) {
    info!(
        interval_secs = monitor.interval_secs(),
        mode = %monitor.mode(),
        "Crisis scheduler started"
    );

    let mut ticker = interval(Duration::from_secs(TICK_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_started: Option<Instant> = None;

    loop {
        ticker.tick().await;

        let due_after = Duration::from_secs(monitor.interval_secs());
        let due = last_started.map_or(true, |t| t.elapsed() >= due_after);
        if !due {
            continue;
        }

        let Some(guard) = state.try_start() else {
            trace!("Crisis poll still running; tick skipped");
            continue;
        };
        last_started = Some(Instant::now());

        let monitor = Arc::clone(&monitor);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _guard = guard;
            match monitor.poll_once().await {
                Ok(report) => debug!(
                    candidates = report.candidates,
                    scans = report.scans_charged,
                    verifications = report.verifications,
                    calm = report.calm,
                    "Crisis poll finished"
                ),
                Err(MonitorError::BudgetExceeded(e)) => {
                    state.record_failure();
                    warn!(error = %e, mode = %monitor.mode(), "Crisis poll stopped by budget (mode kept)");
                }
                Err(e) => {
                    state.record_failure();
                    warn!(error = %e, "Crisis poll failed");
                }
            }
        });
    }
}
