// =============================================================================
// Decision Module
// =============================================================================
//
// - Aggregator combining weighted component scores under regime and override
// - Immutable decision records

pub mod aggregator;
pub mod record;

pub use aggregator::{combine, ComponentScore, DecisionAggregator};
pub use record::{Decision, DecisionEntry, Verdict};
