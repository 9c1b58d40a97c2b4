// =============================================================================
// Crisis Module
// =============================================================================
//
// Background detection of external shocks under a daily cost budget:
// - Alert taxonomy and verified alerts
// - Daily budget ledger and topic cache
// - Event-detector capability (HTTP provider, idle fallback)
// - Monitor with severity policy and the published override snapshot
// - Adaptive-cadence scheduler

pub mod alert;
pub mod budget;
pub mod cache;
pub mod detector;
pub mod monitor;
pub mod scheduler;

pub use alert::{AlertCategory, CrisisAlert, Verification};
pub use budget::{BudgetExceeded, BudgetLedger, BudgetSnapshot};
pub use detector::{DetectorError, EventDetector, HttpEventDetector, IdleDetector, ScanCandidate};
pub use monitor::{
    Acknowledgement, AlertAction, CrisisMonitor, MonitorError, MonitorMode, MonitorStatus,
    OverrideState, OverrideStatus, PollReport,
};
pub use scheduler::{run_crisis_monitor, SchedulerSnapshot, SchedulerState};
