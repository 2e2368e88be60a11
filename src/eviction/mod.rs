//! Node drain for a terminating node
//!
//! Discovers the pods bound to the node, splits them into regular and
//! system tiers, and deletes them tier by tier.

mod api;
mod coordinator;
#[cfg(test)]
mod fake;
pub mod metrics;
mod plan;
mod selector;

pub use api::{delete_params, KubePodApi, PodApi};
pub use coordinator::{EvictionCoordinator, EvictionPhase, EvictionReport};
pub use plan::{EvictionPlan, ExclusionSet, Tier, WorkloadInstance};
pub use selector::{Field, FieldSelector};
