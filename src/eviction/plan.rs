//! Pods discovered on a node and the eviction plan derived from them

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::selector::{Field, FieldSelector};
use crate::error::{Error, Result};

/// Snapshot of a pod bound to a node, taken at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInstance {
    pub namespace: String,
    pub name: String,
    pub node_name: String,
}

impl WorkloadInstance {
    pub fn new(name: &str, namespace: &str, node_name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            node_name: node_name.to_string(),
        }
    }

    /// Build from a pod returned by the apiserver.
    ///
    /// Returns `None` for pods that are not scheduled yet or lack a name.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let name = pod.metadata.name.clone()?;
        let node_name = pod.spec.as_ref().and_then(|s| s.node_name.clone())?;
        Some(Self {
            namespace: pod.namespace().unwrap_or_else(|| "default".to_string()),
            name,
            node_name,
        })
    }
}

impl fmt::Display for WorkloadInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Eviction priority of a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Ordinary workloads, evicted first
    Regular,
    /// Pods in the system namespace, evicted last with a longer grace period
    System,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Regular => "regular",
            Tier::System => "system",
        }
    }
}

/// Pods that must survive eviction, keyed by (namespace, name)
///
/// Pod names are only unique within a namespace, so a name alone never
/// excludes anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    entries: BTreeSet<(String, String)>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, namespace: &str) -> bool {
        self.entries
            .insert((namespace.to_string(), name.to_string()))
    }

    pub fn contains(&self, name: &str, namespace: &str) -> bool {
        self.entries
            .contains(&(namespace.to_string(), name.to_string()))
    }

    pub fn excludes(&self, instance: &WorkloadInstance) -> bool {
        self.contains(&instance.name, &instance.namespace)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate as (name, namespace) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(namespace, name)| (name.as_str(), namespace.as_str()))
    }
}

impl<N: AsRef<str>, S: AsRef<str>> FromIterator<(N, S)> for ExclusionSet {
    /// Collect from (name, namespace) pairs
    fn from_iter<I: IntoIterator<Item = (N, S)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (name, namespace) in iter {
            set.insert(name.as_ref(), namespace.as_ref());
        }
        set
    }
}

impl From<HashMap<String, String>> for ExclusionSet {
    /// Build from a pod-name to namespace mapping
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl FromStr for ExclusionSet {
    type Err = Error;

    /// Parse a comma separated list of `name:namespace` entries
    fn from_str(s: &str) -> Result<Self> {
        let mut set = Self::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((name, namespace)) if !name.is_empty() && !namespace.is_empty() => {
                    set.insert(name.trim(), namespace.trim());
                }
                _ => {
                    return Err(Error::ConfigError(format!(
                        "invalid pod exclusion {:?}, expected name:namespace",
                        entry
                    )))
                }
            }
        }
        Ok(set)
    }
}

/// Grouping of the pods found on a node into eviction tiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionPlan {
    pub node: String,
    pub regular: Vec<WorkloadInstance>,
    pub system: Vec<WorkloadInstance>,
    pub excluded: Vec<WorkloadInstance>,
}

impl EvictionPlan {
    /// Classify discovered pods.
    ///
    /// Pods bound to another node are dropped; every tier is sorted so the
    /// plan is deterministic for a given cluster state.
    pub fn build(
        node: &str,
        system_namespace: &str,
        instances: impl IntoIterator<Item = WorkloadInstance>,
        exclusions: &ExclusionSet,
    ) -> Self {
        let mut plan = EvictionPlan {
            node: node.to_string(),
            ..Default::default()
        };
        let on_node = FieldSelector::on_node(node);
        let regular = on_node
            .clone()
            .not_equals(Field::Namespace, system_namespace);

        for instance in instances {
            if !on_node.matches(&instance) {
                debug!(
                    "Ignoring pod {} bound to node {}, not {}",
                    instance, instance.node_name, node
                );
                continue;
            }

            if exclusions.excludes(&instance) {
                plan.excluded.push(instance);
            } else if regular.matches(&instance) {
                plan.regular.push(instance);
            } else {
                plan.system.push(instance);
            }
        }

        plan.regular.sort();
        plan.system.sort();
        plan.excluded.sort();
        plan
    }

    pub fn tier(&self, tier: Tier) -> &[WorkloadInstance] {
        match tier {
            Tier::Regular => &self.regular,
            Tier::System => &self.system,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regular.is_empty() && self.system.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} regular, {} system, {} excluded pod(s) on node {}",
            self.regular.len(),
            self.system.len(),
            self.excluded.len(),
            self.node
        )
    }
}
