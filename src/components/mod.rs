// =============================================================================
// Components Module
// =============================================================================
//
// Signal component bookkeeping:
// - Flat registry of directors and specialists with trust and weights
// - Default catalog registered once at startup

pub mod catalog;
pub mod registry;

pub use catalog::{default_catalog, register_catalog};
pub use registry::{
    ComponentKind, ComponentRegistry, ComponentSpec, OutcomeCounts, RegistryError,
    SignalComponent, WeightLookup,
};
