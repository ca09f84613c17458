//! RedisFailover Custom Resource Definition.
//!
//! A RedisFailover declares one Redis master with N-1 replicas (a StatefulSet)
//! watched by M Sentinels (a Deployment). The operator keeps the live
//! replication topology and the sentinels' view of it consistent with the
//! declared counts.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{AuthSettings, Condition, ExporterSpec, PodSettings, ResourceRequirementsSpec};

/// RedisFailover is a custom resource for a sentinel-managed Redis deployment.
///
/// Example:
/// ```yaml
/// apiVersion: databases.spotahome.com/v1
/// kind: RedisFailover
/// metadata:
///   name: cache
/// spec:
///   redis:
///     replicas: 3
///     customConfig:
///       maxmemory: 100mb
///   sentinel:
///     replicas: 3
///   auth:
///     secretPath: cache-auth
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "databases.spotahome.com",
    version = "v1",
    kind = "RedisFailover",
    plural = "redisfailovers",
    shortname = "rf",
    status = "RedisFailoverStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Redis", "type":"integer", "jsonPath":".spec.redis.replicas"}"#,
    printcolumn = r#"{"name":"Sentinels", "type":"integer", "jsonPath":".spec.sentinel.replicas"}"#,
    printcolumn = r#"{"name":"Master", "type":"string", "jsonPath":".status.master.address"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverSpec {
    /// Redis data-node settings.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Sentinel settings.
    #[serde(default)]
    pub sentinel: SentinelSettings,

    /// Authentication shared by Redis and Sentinel.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Label keys (regular expressions) copied from this resource onto owned objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_whitelist: Vec<String>,
}

/// Redis data-node settings.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisSettings {
    /// Number of Redis pods, one master plus replicas (0 means default 3, minimum 3).
    #[serde(default)]
    pub replicas: i32,

    /// Redis image (default: redis:5.0.4-alpine).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    /// Resource requests and limits.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Runtime configuration applied with CONFIG SET, e.g. `maxmemory: 100mb`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_config: BTreeMap<String, String>,

    /// `rename-command` entries written into redis.conf.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_command_renames: Vec<RedisCommandRename>,

    /// Overrides the container command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Data volume settings.
    #[serde(default)]
    pub storage: RedisStorage,

    /// Metrics exporter sidecar.
    #[serde(default)]
    pub exporter: ExporterSpec,

    /// Scheduled backups.
    #[serde(default)]
    pub backup: RedisBackup,

    /// Restore data from a backup before Redis starts.
    #[serde(default)]
    pub restore: RedisRestore,

    /// Placement and metadata.
    #[serde(default, flatten)]
    pub pod: PodSettings,
}

/// A `rename-command` configuration entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisCommandRename {
    pub from: String,
    /// Empty disables the command.
    #[serde(default)]
    pub to: String,
}

/// Data volume for Redis pods.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStorage {
    /// Keep PersistentVolumeClaims when the RedisFailover is deleted.
    #[serde(default)]
    pub keep_after_deletion: bool,

    /// Claim template; an emptyDir is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimSpec>,
}

/// Minimal PersistentVolumeClaim template.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    /// Storage class; the cluster default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested size (default: 1Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Access modes (default: ReadWriteOnce).
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

/// Scheduled backup settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisBackup {
    /// Backup image (default: redis-backup:v3.7.0).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// One CronJob is generated per schedule.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule: Vec<BackupSchedule>,
}

/// A named backup schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupSchedule {
    pub name: String,
    /// Cron expression.
    pub schedule: String,
    /// Number of backups to keep.
    #[serde(default)]
    pub keep: i32,
    #[serde(default)]
    pub keep_after_deletion: bool,
    #[serde(default)]
    pub storage: BackupStorage,
}

/// Volume used by backup jobs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    /// Requested size (default: 1Gi).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
}

/// Restore-from-backup settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisRestore {
    /// Restore image (default: redis-backup:v3.7.0).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Name of the backup (claim) to restore from. Empty disables restore.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backup_name: String,
}

/// Sentinel settings.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelSettings {
    /// Number of sentinel pods (0 means default 3, minimum 3).
    #[serde(default)]
    pub replicas: i32,

    /// Sentinel image (default: redis:5.0.4-alpine).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_pull_policy: String,

    /// Resource requests and limits (default: 20m/16Mi requests, 100m/60Mi limits).
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Options applied with `SENTINEL SET mymaster <key> <value>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_config: BTreeMap<String, String>,

    /// Overrides the container command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Metrics exporter sidecar.
    #[serde(default)]
    pub exporter: ExporterSpec,

    /// Placement and metadata.
    #[serde(default, flatten)]
    pub pod: PodSettings,
}

/// Status of a RedisFailover.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisFailoverStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: FailoverPhase,

    /// Message of the last pass (error text when failed).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Condition history, one entry per condition type.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Pod counts per role.
    #[serde(default)]
    pub instance: RedisStatusInstance,

    /// Current master.
    #[serde(default)]
    pub master: RedisStatusMaster,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Pod counts per role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatusInstance {
    #[serde(default)]
    pub redis: RedisStatusInstanceRedis,
    #[serde(default)]
    pub sentinel: RedisStatusInstanceSentinel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatusInstanceRedis {
    pub size: i32,
    pub ready: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatusInstanceSentinel {
    pub size: i32,
    pub ready: i32,
    /// Sentinel service name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,
}

/// Current master as observed by the last pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatusMaster {
    /// Sentinel master group name.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: MasterStatus,
    /// Master pod IP.
    #[serde(default)]
    pub address: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MasterStatus {
    Ok,
    #[default]
    Down,
}

/// Lifecycle phase of a RedisFailover.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum FailoverPhase {
    /// Owned objects are being created.
    Creating,
    /// Accepted, not reconciled yet.
    #[default]
    Pending,
    /// Last pass failed; `message` carries the error.
    Fail,
    /// Every check passed.
    Ready,
    /// Pods are still starting up.
    WaitingPodReady,
}

impl std::fmt::Display for FailoverPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverPhase::Creating => write!(f, "Creating"),
            FailoverPhase::Pending => write!(f, "Pending"),
            FailoverPhase::Fail => write!(f, "Fail"),
            FailoverPhase::Ready => write!(f, "Ready"),
            FailoverPhase::WaitingPodReady => write!(f, "WaitingPodReady"),
        }
    }
}

/// Sentinel master group name.
pub const MASTER_GROUP: &str = "mymaster";

/// Redis client port.
pub const REDIS_PORT: u16 = 6379;

/// Sentinel port.
pub const SENTINEL_PORT: u16 = 26379;
