//! Eviction settings
//!
//! Loaded from an optional YAML file and overridden by command line flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Namespace holding cluster infrastructure pods
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "kube-system";

/// Grace period for regular workloads, long enough for in-flight work to finish.
/// Fixed; only the system tier's grace period is configurable.
pub const REGULAR_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Whole seconds for the apiserver, rounding any fraction up.
///
/// A zero grace period means "kill now", so 500ms must not become 0.
pub fn grace_period_seconds(grace_period: Duration) -> u64 {
    grace_period.as_secs() + u64::from(grace_period.subsec_nanos() > 0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EvictionConfig {
    /// Pods in this namespace are evicted last
    #[serde(default = "default_system_namespace")]
    pub system_namespace: String,
    /// Grace period for system pods, e.g. log shippers flushing what the
    /// regular pods wrote
    #[serde(default = "default_system_grace_period_seconds")]
    pub system_grace_period_seconds: u64,
    /// Maximum number of delete requests in flight
    #[serde(default = "default_max_concurrent_deletes")]
    pub max_concurrent_deletes: usize,
    /// Bound on the whole eviction pass (optional)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_system_namespace() -> String {
    DEFAULT_SYSTEM_NAMESPACE.to_string()
}

fn default_system_grace_period_seconds() -> u64 {
    300
}

fn default_max_concurrent_deletes() -> usize {
    16
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            system_namespace: default_system_namespace(),
            system_grace_period_seconds: default_system_grace_period_seconds(),
            max_concurrent_deletes: default_max_concurrent_deletes(),
            timeout_seconds: None,
        }
    }
}

impl EvictionConfig {
    /// Default settings with the given system pod grace period
    pub fn with_system_grace_period(grace_period: Duration) -> Self {
        Self {
            system_grace_period_seconds: grace_period_seconds(grace_period),
            ..Self::default()
        }
    }

    pub fn regular_grace_period(&self) -> Duration {
        REGULAR_GRACE_PERIOD
    }

    pub fn system_grace_period(&self) -> Duration {
        Duration::from_secs(self.system_grace_period_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.system_namespace.trim().is_empty() {
            return Err("systemNamespace must not be empty".to_string());
        }
        if self.system_grace_period() < REGULAR_GRACE_PERIOD {
            return Err(format!(
                "systemGracePeriodSeconds must be at least {}, the regular pod grace period",
                REGULAR_GRACE_PERIOD.as_secs()
            ));
        }
        if self.max_concurrent_deletes == 0 {
            return Err("maxConcurrentDeletes must be at least 1".to_string());
        }
        if self.timeout_seconds == Some(0) {
            return Err("timeoutSeconds must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::ConfigError(format!("YAML parse error: {}", e)))?;
        config.validate().map_err(Error::ConfigError)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&yaml)
    }
}
