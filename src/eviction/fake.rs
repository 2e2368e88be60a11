//! In-memory cluster used by the eviction tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kube::error::ErrorResponse;

use super::api::PodApi;
use super::plan::WorkloadInstance;
use super::selector::FieldSelector;

pub fn api_error(code: u16, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "InternalError".to_string(),
        code,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteEvent {
    Dispatched(WorkloadInstance, Duration),
    Completed(WorkloadInstance),
}

#[derive(Default)]
pub struct FakeCluster {
    pods: Mutex<Vec<WorkloadInstance>>,
    events: Mutex<Vec<DeleteEvent>>,
    selectors: Mutex<Vec<String>>,
    failing: Mutex<HashSet<WorkloadInstance>>,
    latency: Mutex<HashMap<WorkloadInstance, Duration>>,
    list_calls: AtomicUsize,
    fail_list: AtomicBool,
    ignore_selector: AtomicBool,
}

impl FakeCluster {
    pub fn new(pods: impl IntoIterator<Item = WorkloadInstance>) -> Self {
        Self {
            pods: Mutex::new(pods.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Make every list call fail as if the apiserver were unreachable
    pub fn fail_list(self) -> Self {
        self.fail_list.store(true, Ordering::SeqCst);
        self
    }

    /// Return every pod from list calls, whatever the selector says
    pub fn ignore_selector(self) -> Self {
        self.ignore_selector.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_delete(self, name: &str, namespace: &str) -> Self {
        self.failing
            .lock()
            .unwrap()
            .insert(self.find(name, namespace));
        self
    }

    pub fn delay_delete(self, name: &str, namespace: &str, delay: Duration) -> Self {
        let instance = self.find(name, namespace);
        self.latency.lock().unwrap().insert(instance, delay);
        self
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn find(&self, name: &str, namespace: &str) -> WorkloadInstance {
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name && p.namespace == namespace)
            .cloned()
            .unwrap_or_else(|| panic!("no pod {}/{} in fake cluster", namespace, name))
    }

    pub fn remaining(&self) -> Vec<WorkloadInstance> {
        let mut pods = self.pods.lock().unwrap().clone();
        pods.sort();
        pods
    }

    pub fn remaining_on(&self, node: &str) -> Vec<WorkloadInstance> {
        self.remaining()
            .into_iter()
            .filter(|p| p.node_name == node)
            .collect()
    }

    pub fn events(&self) -> Vec<DeleteEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Pods a delete was issued for, with the grace period used
    pub fn dispatched(&self) -> Vec<(WorkloadInstance, Duration)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DeleteEvent::Dispatched(instance, grace) => Some((instance, grace)),
                DeleteEvent::Completed(_) => None,
            })
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn selectors(&self) -> Vec<String> {
        self.selectors.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodApi for FakeCluster {
    async fn list(&self, selector: &FieldSelector) -> Result<Vec<WorkloadInstance>, kube::Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.selectors.lock().unwrap().push(selector.to_string());

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(api_error(503, "apiserver unavailable"));
        }

        let ignore_selector = self.ignore_selector.load(Ordering::SeqCst);
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| ignore_selector || selector.matches(p))
            .cloned()
            .collect())
    }

    async fn delete(
        &self,
        instance: &WorkloadInstance,
        grace_period: Duration,
    ) -> Result<(), kube::Error> {
        self.events
            .lock()
            .unwrap()
            .push(DeleteEvent::Dispatched(instance.clone(), grace_period));

        let delay = self.latency.lock().unwrap().get(instance).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(instance) {
            return Err(api_error(500, "delete rejected"));
        }

        // Missing pods are a no-op, like a 404 from the apiserver
        self.pods.lock().unwrap().retain(|p| p != instance);
        self.events
            .lock()
            .unwrap()
            .push(DeleteEvent::Completed(instance.clone()));
        Ok(())
    }
}
