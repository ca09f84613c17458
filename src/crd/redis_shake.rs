//! RedisShake Custom Resource Definition.
//!
//! A RedisShake runs one redis-shake migration between a source and a
//! target Redis deployment.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, PodSettings, ResourceRequirementsSpec};

/// RedisShake is a custom resource for a data migration job.
///
/// Example:
/// ```yaml
/// apiVersion: middle.alauda.cn/v1alpha1
/// kind: RedisShake
/// metadata:
///   name: move-cache
/// spec:
///   modelType: sync
///   source:
///     type: sentinel
///     clusterName: cache
///     passwordSecret: cache-auth
///   target:
///     type: cluster
///     address: ["10.0.0.20:6379"]
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "middle.alauda.cn",
    version = "v1alpha1",
    kind = "RedisShake",
    plural = "redisshakes",
    shortname = "rs",
    status = "RedisShakeStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Model", "type":"string", "jsonPath":".spec.modelType"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisShakeSpec {
    /// redis-shake mode.
    pub model_type: ModelType,

    /// Where data is read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,

    /// Where data is written to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetInfo>,

    #[serde(default)]
    pub filter: FilterInfo,

    /// Concurrent full-sync workers (default: 32).
    #[serde(default)]
    pub parallel: i32,

    /// Rate limit in commands per second (default: 200000).
    #[serde(default)]
    pub qbs: i64,

    /// Resume an interrupted sync from its checkpoint.
    #[serde(default)]
    pub resume_from_break_point: bool,

    /// Behaviour when a key already exists on the target (default: none).
    #[serde(default)]
    pub key_exists: KeyExists,

    /// Keys larger than this many bytes are sent in pieces (default: 524288000).
    #[serde(default)]
    pub big_key_threshold: i64,

    /// Number of pods (default: 1).
    #[serde(default)]
    pub replicas: i32,

    /// redis-shake image (default: redis-shake:v3.7.0).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    #[serde(default, flatten)]
    pub pod: PodSettings,
}

/// redis-shake run mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Decode,
    Restore,
    Sync,
    Rump,
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelType::Decode => write!(f, "decode"),
            ModelType::Restore => write!(f, "restore"),
            ModelType::Sync => write!(f, "sync"),
            ModelType::Rump => write!(f, "rump"),
        }
    }
}

/// Topology of a source or target endpoint.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    #[default]
    Standalone,
    Sentinel,
    Cluster,
    Proxy,
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointType::Standalone => write!(f, "standalone"),
            EndpointType::Sentinel => write!(f, "sentinel"),
            EndpointType::Cluster => write!(f, "cluster"),
            EndpointType::Proxy => write!(f, "proxy"),
        }
    }
}

/// Behaviour when a migrated key already exists on the target.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeyExists {
    Rewrite,
    #[default]
    None,
    Ignore,
}

impl std::fmt::Display for KeyExists {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyExists::Rewrite => write!(f, "rewrite"),
            KeyExists::None => write!(f, "none"),
            KeyExists::Ignore => write!(f, "ignore"),
        }
    }
}

/// Migration source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub r#type: EndpointType,
    /// Explicit `host:port` addresses; take precedence over `clusterName`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<String>,
    /// Secret holding the password under key `password`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_secret: String,
    /// Name of an operator-managed RedisFailover or Redis cluster.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(default)]
    pub tls_enable: bool,
    #[serde(default)]
    pub tls_skip_verify: bool,
}

/// Migration target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub r#type: EndpointType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(default)]
    pub tls_enable: bool,
    #[serde(default)]
    pub tls_skip_verify: bool,
    /// Target database; -1 keeps the source database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<i32>,
    /// Source db to target db mapping.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dbmap: BTreeMap<String, i32>,
}

/// Filters applied during migration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterInfo {
    #[serde(default)]
    pub db: FilterList,
    #[serde(default)]
    pub key: FilterList,
    #[serde(default)]
    pub command: FilterList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slot: Vec<String>,
    /// Migrate Lua scripts.
    #[serde(default)]
    pub lua: bool,
}

/// An allow list and a deny list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterList {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub white_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub black_list: Vec<String>,
}

/// Status of a RedisShake.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisShakeStatus {
    #[serde(default)]
    pub phase: ShakePhase,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ShakePhase {
    #[default]
    Pending,
    Running,
    Fail,
}

impl std::fmt::Display for ShakePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShakePhase::Pending => write!(f, "Pending"),
            ShakePhase::Running => write!(f, "Running"),
            ShakePhase::Fail => write!(f, "Fail"),
        }
    }
}
