//! Eviction coordinator
//!
//! Drains a node in two passes:
//! 1. Regular pods, with a short grace period
//! 2. Pods in the system namespace, with a longer grace period so that
//!    agents like log shippers can flush what the regular pods produced
//!
//! Every delete runs as its own task and reports back to a collector, so a
//! pass finishes with a complete list of the pods that could not be removed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::Client;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::api::{KubePodApi, PodApi};
use super::metrics;
use super::plan::{EvictionPlan, ExclusionSet, Tier, WorkloadInstance};
use super::selector::FieldSelector;
use crate::config::EvictionConfig;
use crate::error::{DeletionFailure, Error, Result};

/// Progress of a single eviction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvictionPhase {
    Discovering,
    Filtering,
    EvictingRegular,
    EvictingSystem,
    Done,
}

impl EvictionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPhase::Discovering => "discovering pods",
            EvictionPhase::Filtering => "filtering pods",
            EvictionPhase::EvictingRegular => "evicting regular pods",
            EvictionPhase::EvictingSystem => "evicting system pods",
            EvictionPhase::Done => "done",
        }
    }
}

/// Outcome of a fully successful eviction pass
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    pub node: String,
    pub regular: Vec<WorkloadInstance>,
    pub system: Vec<WorkloadInstance>,
    pub excluded: Vec<WorkloadInstance>,
    pub started_at: String,
    pub finished_at: String,
}

impl EvictionReport {
    pub fn evicted_count(&self) -> usize {
        self.regular.len() + self.system.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Evicted {} regular and {} system pod(s) from node {}, kept {}",
            self.regular.len(),
            self.system.len(),
            self.node,
            self.excluded.len()
        )
    }
}

#[derive(Debug, Default)]
struct TierOutcome {
    evicted: Vec<WorkloadInstance>,
    failures: Vec<DeletionFailure>,
}

/// Removes the pods bound to one node
///
/// Holds no state between passes; running it again after a partial failure
/// re-lists the node and retries whatever is left.
pub struct EvictionCoordinator<A: PodApi + 'static = KubePodApi> {
    node: String,
    api: Arc<A>,
    config: EvictionConfig,
}

impl EvictionCoordinator<KubePodApi> {
    /// Coordinator talking to the cluster through `client`
    pub fn for_client(
        node: impl Into<String>,
        client: Client,
        system_grace_period: Duration,
    ) -> Self {
        Self::new(node, Arc::new(KubePodApi::new(client)), system_grace_period)
    }
}

impl<A: PodApi + 'static> EvictionCoordinator<A> {
    /// Create a coordinator with default settings. Performs no I/O.
    pub fn new(node: impl Into<String>, api: Arc<A>, system_grace_period: Duration) -> Self {
        Self::with_config(
            node,
            api,
            EvictionConfig::with_system_grace_period(system_grace_period),
        )
    }

    pub fn with_config(node: impl Into<String>, api: Arc<A>, config: EvictionConfig) -> Self {
        Self {
            node: node.into(),
            api,
            config,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    fn grace_period(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Regular => self.config.regular_grace_period(),
            Tier::System => self.config.system_grace_period(),
        }
    }

    /// Discover and classify the pods on the node without deleting anything
    pub async fn plan(&self, exclusions: &ExclusionSet) -> Result<EvictionPlan> {
        let instances = self.discover().await?;
        Ok(EvictionPlan::build(
            &self.node,
            &self.config.system_namespace,
            instances,
            exclusions,
        ))
    }

    /// Evict every pod on the node except `exclusions`.
    ///
    /// Applies the configured timeout, if any.
    pub async fn evict_workloads(&self, exclusions: &ExclusionSet) -> Result<EvictionReport> {
        match self.config.timeout() {
            Some(timeout) => self.evict_workloads_with_timeout(exclusions, timeout).await,
            None => {
                let (phase, _) = watch::channel(EvictionPhase::Discovering);
                self.run(exclusions, &phase).await
            }
        }
    }

    /// Evict every pod on the node except `exclusions`, giving up after `timeout`.
    ///
    /// Deletes still in flight when the timeout expires are cancelled.
    pub async fn evict_workloads_with_timeout(
        &self,
        exclusions: &ExclusionSet,
        timeout: Duration,
    ) -> Result<EvictionReport> {
        let (phase, _) = watch::channel(EvictionPhase::Discovering);

        match tokio::time::timeout(timeout, self.run(exclusions, &phase)).await {
            Ok(result) => result,
            Err(_) => {
                let phase = *phase.borrow();
                warn!(
                    "Eviction on node {} timed out after {:?} while {}",
                    self.node,
                    timeout,
                    phase.as_str()
                );
                metrics::record_pass("timeout");
                Err(Error::Timeout { phase, timeout })
            }
        }
    }

    #[instrument(skip(self, exclusions, phase), fields(node = %self.node))]
    async fn run(
        &self,
        exclusions: &ExclusionSet,
        phase: &watch::Sender<EvictionPhase>,
    ) -> Result<EvictionReport> {
        let started_at = Utc::now().to_rfc3339();

        phase.send_replace(EvictionPhase::Discovering);
        let instances = match self.discover().await {
            Ok(instances) => instances,
            Err(e) => {
                metrics::record_pass("discovery_failed");
                return Err(e);
            }
        };

        phase.send_replace(EvictionPhase::Filtering);
        let plan = EvictionPlan::build(
            &self.node,
            &self.config.system_namespace,
            instances,
            exclusions,
        );
        info!("Eviction plan: {}", plan.summary());

        // The regular tier is joined before any system pod is touched
        phase.send_replace(EvictionPhase::EvictingRegular);
        let regular = self.evict_tier(Tier::Regular, &plan.regular).await;

        phase.send_replace(EvictionPhase::EvictingSystem);
        let system = self.evict_tier(Tier::System, &plan.system).await;

        phase.send_replace(EvictionPhase::Done);

        let mut failures = regular.failures;
        failures.extend(system.failures);
        if !failures.is_empty() {
            warn!(
                "{} pod(s) could not be evicted from node {}",
                failures.len(),
                self.node
            );
            metrics::record_pass("partial");
            return Err(Error::DeletionFailed { failures });
        }

        metrics::record_pass("success");
        info!("Successfully evicted all pods from node {}", self.node);

        Ok(EvictionReport {
            node: self.node.clone(),
            regular: regular.evicted,
            system: system.evicted,
            excluded: plan.excluded,
            started_at,
            finished_at: Utc::now().to_rfc3339(),
        })
    }

    async fn discover(&self) -> Result<Vec<WorkloadInstance>> {
        let selector = FieldSelector::on_node(&self.node);

        match self.api.list(&selector).await {
            Ok(instances) => {
                debug!("Found {} pod(s) on node {}", instances.len(), self.node);
                Ok(instances)
            }
            Err(source) => {
                error!("Failed to list pods on node {}: {}", self.node, source);
                Err(Error::DiscoveryFailed {
                    node: self.node.clone(),
                    source,
                })
            }
        }
    }

    /// Delete every pod of one tier concurrently and wait for all of them
    async fn evict_tier(&self, tier: Tier, instances: &[WorkloadInstance]) -> TierOutcome {
        let mut outcome = TierOutcome::default();
        if instances.is_empty() {
            debug!("No {} pods to evict on node {}", tier.as_str(), self.node);
            return outcome;
        }

        let grace_period = self.grace_period(tier);
        info!(
            "Evicting {} {} pod(s) from node {} with grace period {:?}",
            instances.len(),
            tier.as_str(),
            self.node,
            grace_period
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_deletes.max(1)));
        let (tx, mut rx) = mpsc::channel(instances.len());
        let mut tasks = JoinSet::new();

        for instance in instances.iter().cloned() {
            let api = self.api.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => api
                        .delete(&instance, grace_period)
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(format!("delete not dispatched: {}", e)),
                };
                let _ = tx.send((instance, result)).await;
            });
        }
        drop(tx);

        let mut reported = HashSet::new();
        while let Some((instance, result)) = rx.recv().await {
            reported.insert(instance.clone());
            match result {
                Ok(()) => {
                    metrics::record_eviction(tier);
                    outcome.evicted.push(instance);
                }
                Err(message) => {
                    warn!("Failed to evict pod {}: {}", instance, message);
                    metrics::record_failure(tier);
                    outcome.failures.push(DeletionFailure {
                        instance,
                        tier,
                        message,
                    });
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Delete task on node {} failed: {}", self.node, e);
            }
        }

        // A task that panicked never reported back
        for instance in instances.iter().filter(|i| !reported.contains(*i)) {
            metrics::record_failure(tier);
            outcome.failures.push(DeletionFailure {
                instance: instance.clone(),
                tier,
                message: "delete task ended without reporting a result".to_string(),
            });
        }

        outcome.evicted.sort();
        outcome
            .failures
            .sort_by(|a, b| a.instance.cmp(&b.instance));
        outcome
    }
}
