//! Types shared by the RedisFailover, RedisProxy and RedisShake resources.

use std::collections::BTreeMap;

use jiff::Timestamp;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition records one observed fact about a resource.
///
/// Conditions are keyed by `type`: a resource holds at most one condition of
/// each type, and a repeated identical condition only refreshes
/// `last_update_time` (see `controller::status::ConditionHistory`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g. Healthy, Failed, Scaling).
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    #[serde(default)]
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    #[serde(default)]
    pub message: String,
    /// Last time the condition was observed (RFC 3339).
    #[serde(default)]
    pub last_update_time: String,
    /// Last time the condition transitioned from one status to another (RFC 3339).
    #[serde(default)]
    pub last_transition_time: String,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(condition_type: &str, status: bool, reason: &str, message: &str) -> Self {
        Self::new_at(condition_type, status, reason, message, Timestamp::now())
    }

    /// Create a new condition stamped with `now`.
    pub fn new_at(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        now: Timestamp,
    ) -> Self {
        let stamp = now.to_string();
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_update_time: stamp.clone(),
            last_transition_time: stamp,
        }
    }

    /// Parsed `last_update_time`, if it is a valid timestamp.
    pub fn updated_at(&self) -> Option<Timestamp> {
        self.last_update_time.parse().ok()
    }

    /// Whether two conditions carry the same observation (ignoring timestamps).
    pub fn same_observation(&self, other: &Condition) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Kinds of conditions written by the operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConditionType {
    /// Owned objects are being created.
    Creating,
    /// Waiting for pods to scale to the declared count.
    Scaling,
    /// Topology passed every check.
    Healthy,
    /// Last pass ended with an error.
    Failed,
    /// Spec change is being rolled out.
    Updating,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Creating => write!(f, "Creating"),
            ConditionType::Scaling => write!(f, "Scaling"),
            ConditionType::Healthy => write!(f, "Healthy"),
            ConditionType::Failed => write!(f, "Failed"),
            ConditionType::Updating => write!(f, "Updating"),
        }
    }
}

/// Reason attached to the waiting-for-pods condition.
pub const REASON_WAITING_POD: &str = "WaitingPod";

/// Authentication settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    /// Name of a Secret holding the password under key `password`.
    /// Empty disables authentication.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_path: String,
}

/// Key inside the auth Secret that holds the password.
pub const AUTH_SECRET_KEY: &str = "password";

/// Resource requests and limits for a container.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU and memory requests.
    #[serde(default)]
    pub requests: ResourceSpec,
    /// CPU and memory limits.
    #[serde(default)]
    pub limits: ResourceSpec,
}

impl ResourceRequirementsSpec {
    /// Build requirements from request and limit quantities.
    pub fn new(req_cpu: &str, req_mem: &str, lim_cpu: &str, lim_mem: &str) -> Self {
        Self {
            requests: ResourceSpec {
                cpu: req_cpu.to_string(),
                memory: req_mem.to_string(),
            },
            limits: ResourceSpec {
                cpu: lim_cpu.to_string(),
                memory: lim_mem.to_string(),
            },
        }
    }

    /// True when neither requests nor limits are set.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

/// CPU and memory quantities (Kubernetes quantity strings).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU quantity (e.g. "100m").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cpu: String,
    /// Memory quantity (e.g. "256Mi").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
}

impl ResourceSpec {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_empty() && self.memory.is_empty()
    }
}

/// Toleration for pod scheduling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Equal or Exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// NoSchedule, PreferNoSchedule or NoExecute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

/// Pod placement and metadata knobs shared by every workload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSettings {
    /// Node selector for pod placement.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations for pod scheduling.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    /// Extra annotations on the pods.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,
    /// Extra annotations on the services.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_annotations: BTreeMap<String, String>,
    /// Names of image pull secrets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

/// Metrics exporter sidecar.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExporterSpec {
    /// Run the exporter sidecar.
    #[serde(default)]
    pub enabled: bool,
    /// Exporter image (default: oliver006/redis_exporter:v1.43.0).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

/// Default exporter image.
pub const DEFAULT_EXPORTER_IMAGE: &str = "oliver006/redis_exporter:v1.43.0";

pub const DEFAULT_SENTINEL_EXPORTER_IMAGE: &str = "leominov/redis_sentinel_exporter:1.3.0";

/// Default image pull policy.
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
