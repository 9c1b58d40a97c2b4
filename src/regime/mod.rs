// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Market regime classification from a rolling window of market-wide
// observations:
// - Volatility (std-dev of index returns)
// - Trend (signed efficiency ratio)
// - Breadth (advance/decline balance)

pub mod detector;
pub mod features;

pub use detector::{run_regime_updater, RegimeDetector, RegimeSnapshot, RegimeTransition};
pub use features::{compute_features, MarketObservation, RegimeFeatures};
