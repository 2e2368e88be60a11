//! Access to the pods of the cluster
//!
//! [`PodApi`] is the only way the coordinator talks to the control plane.
//! [`KubePodApi`] backs it with a kube-rs client.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, DeleteParams, ListParams},
    Client,
};
use tracing::{debug, info, warn};

use super::plan::WorkloadInstance;
use super::selector::FieldSelector;
use crate::config::grace_period_seconds;

#[async_trait]
pub trait PodApi: Send + Sync {
    /// List pods across all namespaces matching `selector`, filtered by the apiserver
    async fn list(&self, selector: &FieldSelector) -> Result<Vec<WorkloadInstance>, kube::Error>;

    /// Delete a pod, giving it `grace_period` to shut down.
    ///
    /// Deleting a pod that no longer exists succeeds.
    async fn delete(
        &self,
        instance: &WorkloadInstance,
        grace_period: Duration,
    ) -> Result<(), kube::Error>;
}

/// [`PodApi`] over the Kubernetes API
#[derive(Clone)]
pub struct KubePodApi {
    client: Client,
}

impl KubePodApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Delete parameters carrying a grace period in whole seconds, rounded up
pub fn delete_params(grace_period: Duration) -> DeleteParams {
    let seconds = grace_period_seconds(grace_period).min(u64::from(u32::MAX));
    DeleteParams {
        grace_period_seconds: Some(seconds as u32),
        ..DeleteParams::default()
    }
}

/// Map the apiserver's answer to a delete; a pod that is already gone counts as deleted
fn delete_outcome<T>(
    result: Result<T, kube::Error>,
    instance: &WorkloadInstance,
    grace_period: Duration,
) -> Result<(), kube::Error> {
    match result {
        Ok(_) => info!(
            "Deleted pod {} with grace period {:?}",
            instance, grace_period
        ),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!("Pod {} not found, already deleted", instance);
        }
        Err(e) => return Err(e),
    }

    Ok(())
}

#[async_trait]
impl PodApi for KubePodApi {
    async fn list(&self, selector: &FieldSelector) -> Result<Vec<WorkloadInstance>, kube::Error> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let fields = selector.to_string();
        debug!("Listing pods with field selector {}", fields);

        let pods = api.list(&ListParams::default().fields(&fields)).await?;
        Ok(pods
            .items
            .iter()
            .filter_map(WorkloadInstance::from_pod)
            .collect())
    }

    async fn delete(
        &self,
        instance: &WorkloadInstance,
        grace_period: Duration,
    ) -> Result<(), kube::Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &instance.namespace);
        let result = api
            .delete(&instance.name, &delete_params(grace_period))
            .await;
        delete_outcome(result, instance, grace_period)
    }
}
