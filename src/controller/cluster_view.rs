//! Kubernetes-side view of one RedisFailover's workloads.
//!
//! The inspector reads pod and workload state through `ClusterView` so the
//! orchestrator can be driven against an in-memory topology in tests.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Client;
use kube::api::{Api, ListParams};
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::resources::common::{REDIS_COMPONENT, SENTINEL_COMPONENT, selector_labels};

/// Declared and ready replica counts of a workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkloadCounts {
    /// Replicas configured on the StatefulSet or Deployment
    pub desired: i32,
    /// Replicas reporting ready
    pub ready: i32,
}

/// One pod of a workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    /// Pod IP, empty until assigned
    pub ip: String,
    /// Pod is in the `Running` phase
    pub running: bool,
    pub start_time: Option<jiff::Timestamp>,
}

impl PodInfo {
    /// A running pod with an IP
    pub fn is_reachable(&self) -> bool {
        self.running && !self.ip.is_empty()
    }
}

/// Read access to the workloads backing one RedisFailover.
pub trait ClusterView {
    /// Counts of the Redis StatefulSet.
    fn redis_counts(&self) -> impl std::future::Future<Output = Result<WorkloadCounts>> + Send;

    /// Counts of the Sentinel Deployment.
    fn sentinel_counts(&self) -> impl std::future::Future<Output = Result<WorkloadCounts>> + Send;

    /// Every Redis pod, running or not.
    fn redis_pods(&self) -> impl std::future::Future<Output = Result<Vec<PodInfo>>> + Send;

    /// Every Sentinel pod, running or not.
    fn sentinel_pods(&self) -> impl std::future::Future<Output = Result<Vec<PodInfo>>> + Send;
}

/// `ClusterView` backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterView {
    client: Client,
    namespace: String,
    name: String,
}

impl KubeClusterView {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    async fn list_pods(&self, component: &str) -> Result<Vec<PodInfo>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let selector = selector_labels(component, &self.name)
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let list = pods.list(&ListParams::default().labels(&selector)).await?;
        let infos: Vec<PodInfo> = list.items.iter().map(pod_info).collect();
        debug!(
            name = %self.name,
            component = %component,
            pods = infos.len(),
            "Listed pods"
        );
        Ok(infos)
    }
}

fn not_found_or(err: kube::Error, what: String) -> Error {
    match err {
        kube::Error::Api(ref e) if e.code == 404 => Error::NotFound(what),
        other => Error::Kube(other),
    }
}

/// Declared and ready replicas of a Deployment
pub async fn deployment_counts(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<WorkloadCounts> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deploy = api
        .get(name)
        .await
        .map_err(|e| not_found_or(e, format!("deployment {name}")))?;
    Ok(WorkloadCounts {
        desired: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
        ready: deploy
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
    })
}

/// Convert a k8s Time to a jiff Timestamp through its RFC 3339 form.
fn to_timestamp(time: &Time) -> Option<jiff::Timestamp> {
    serde_json::to_value(time).ok()?.as_str()?.parse().ok()
}

/// Extract what the inspector needs from a pod
pub fn pod_info(pod: &Pod) -> PodInfo {
    let status = pod.status.as_ref();
    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        ip: status.and_then(|s| s.pod_ip.clone()).unwrap_or_default(),
        running: status.and_then(|s| s.phase.as_deref()) == Some("Running"),
        start_time: status
            .and_then(|s| s.start_time.as_ref())
            .and_then(to_timestamp),
    }
}

impl ClusterView for KubeClusterView {
    async fn redis_counts(&self) -> Result<WorkloadCounts> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = format!("rfr-{}", self.name);
        let sts = api
            .get(&name)
            .await
            .map_err(|e| not_found_or(e, format!("statefulset {name}")))?;
        Ok(WorkloadCounts {
            desired: sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            ready: sts
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
        })
    }

    async fn sentinel_counts(&self) -> Result<WorkloadCounts> {
        deployment_counts(&self.client, &self.namespace, &format!("rfs-{}", self.name)).await
    }

    async fn redis_pods(&self) -> Result<Vec<PodInfo>> {
        self.list_pods(REDIS_COMPONENT).await
    }

    async fn sentinel_pods(&self) -> Result<Vec<PodInfo>> {
        self.list_pods(SENTINEL_COMPONENT).await
    }
}
