//! RedisProxy Custom Resource Definition.
//!
//! A RedisProxy runs predixy in front of an existing RedisFailover
//! (sentinel architecture) or a Redis cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{AuthSettings, Condition, PodSettings, ResourceRequirementsSpec};

/// RedisProxy is a custom resource for a predixy proxy deployment.
///
/// Example:
/// ```yaml
/// apiVersion: middle.alauda.cn/v1alpha1
/// kind: RedisProxy
/// metadata:
///   name: cache-proxy
/// spec:
///   proxyInfo:
///     architecture: sentinel
///     instanceName: cache
///   replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "middle.alauda.cn",
    version = "v1alpha1",
    kind = "RedisProxy",
    plural = "redisproxies",
    shortname = "rp",
    status = "RedisProxyStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Instance", "type":"string", "jsonPath":".spec.proxyInfo.instanceName"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisProxySpec {
    /// Upstream and proxy tuning.
    pub proxy_info: ProxyInfo,

    /// Proxy image (default: redis-proxy:v3.7.0).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    /// Number of proxy pods (default: 1).
    #[serde(default)]
    pub replicas: i32,

    /// Resource requests and limits (default: 500m/500Mi requests, 1/1Gi limits).
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Password of the upstream instance; also required from proxy clients.
    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default, flatten)]
    pub pod: PodSettings,
}

/// Upstream description and proxy tuning.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInfo {
    /// `cluster` (default) or `sentinel`.
    #[serde(default)]
    pub architecture: ProxyArchitecture,

    /// Name of the upstream RedisFailover or Redis cluster.
    pub instance_name: String,

    /// Worker threads (default: 4).
    #[serde(default)]
    pub work_threads: i32,

    /// Client idle timeout in seconds (default: 120).
    #[serde(default)]
    pub client_timeout: i32,
}

/// Upstream topology the proxy fronts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProxyArchitecture {
    #[default]
    Cluster,
    Sentinel,
}

impl std::fmt::Display for ProxyArchitecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyArchitecture::Cluster => write!(f, "cluster"),
            ProxyArchitecture::Sentinel => write!(f, "sentinel"),
        }
    }
}

/// Status of a RedisProxy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisProxyStatus {
    #[serde(default)]
    pub phase: ProxyPhase,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Ready proxy pods.
    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ProxyPhase {
    #[default]
    Pending,
    Ready,
    Fail,
}

impl std::fmt::Display for ProxyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyPhase::Pending => write!(f, "Pending"),
            ProxyPhase::Ready => write!(f, "Ready"),
            ProxyPhase::Fail => write!(f, "Fail"),
        }
    }
}
