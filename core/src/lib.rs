//! Core types and the reconciliation engine shared by the easm crates.

pub mod collab;
pub mod dedup;
pub mod ratelimiter;
pub mod reconcile;
pub mod store;

pub use collab::{DiscoverySource, Expander, Failure, LiveHost, LivenessProbe, Notifier, ProbeOutput, StageOutput};
pub use dedup::{canonicalize, dedup};
pub use reconcile::{AxisDelta, Delta, Reconciler, ViolationPolicy};
pub use store::{DomainRecord, StateStore, StoreError};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
