//! Errors returned by an eviction pass
//!
//! Discovery failures are fatal, delete failures are collected per pod and
//! reported together once both tiers have been attempted.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::eviction::{EvictionPhase, Tier, WorkloadInstance};

#[derive(Error, Debug)]
pub enum Error {
    /// Listing the pods bound to the node failed; nothing was deleted
    #[error("Failed to discover pods on node {node}: {source}")]
    DiscoveryFailed {
        node: String,
        #[source]
        source: kube::Error,
    },

    /// One or more pods could not be deleted
    #[error("Failed to evict {} pod(s): {}", .failures.len(), DeletionFailures(.failures))]
    DeletionFailed { failures: Vec<DeletionFailure> },

    /// The eviction pass did not finish in time
    #[error("Eviction timed out after {timeout:?} while {}", .phase.as_str())]
    Timeout {
        phase: EvictionPhase,
        timeout: Duration,
    },

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for eviction operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A single pod that could not be deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionFailure {
    pub instance: WorkloadInstance,
    pub tier: Tier,
    pub message: String,
}

impl fmt::Display for DeletionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} tier): {}",
            self.instance,
            self.tier.as_str(),
            self.message
        )
    }
}

struct DeletionFailures<'a>(&'a [DeletionFailure]);

impl fmt::Display for DeletionFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl Error {
    /// Check if running the eviction pass again could succeed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::DiscoveryFailed { .. }
                | Error::DeletionFailed { .. }
                | Error::Timeout { .. }
        )
    }

    /// Pods that could not be evicted, empty for non-deletion errors
    pub fn failed_instances(&self) -> Vec<&WorkloadInstance> {
        match self {
            Error::DeletionFailed { failures } => failures.iter().map(|f| &f.instance).collect(),
            _ => Vec::new(),
        }
    }

    /// Convert to a human-readable one-line message
    pub fn status_message(&self) -> String {
        match self {
            Error::DiscoveryFailed { node, .. } => {
                format!("Could not list pods on node {}", node)
            }
            Error::DeletionFailed { failures } => format!(
                "{} pod(s) could not be evicted, node may not be safe to terminate",
                failures.len()
            ),
            Error::Timeout { phase, .. } => {
                format!("Timed out while {}", phase.as_str())
            }
            Error::ConfigError(msg) => format!("Invalid configuration: {}", msg),
        }
    }
}
