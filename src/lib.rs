//! Drains the pods of a Kubernetes node that is about to terminate.
//!
//! The entry point is [`eviction::EvictionCoordinator`], which lists the pods
//! bound to a node and deletes them in two tiers, regular workloads first
//! and system pods last.

pub mod config;
pub mod error;
pub mod eviction;

pub use config::EvictionConfig;
pub use error::{DeletionFailure, Error, Result};
pub use eviction::{EvictionCoordinator, EvictionReport, ExclusionSet, WorkloadInstance};
