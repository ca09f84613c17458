//! Common resource generation utilities.
//!
//! Object names, labels, owner references and the pod-spec fragments shared
//! by the RedisFailover, RedisProxy and RedisShake generators.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, EnvVar, EnvVarSource, LocalObjectReference, PodAffinityTerm, PodAntiAffinity,
    ResourceRequirements, SecretKeySelector, Toleration, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use regex::Regex;
use tracing::warn;

use crate::crd::{AUTH_SECRET_KEY, PodSettings, RedisFailover, ResourceRequirementsSpec};

/// Value of `app.kubernetes.io/managed-by` on every owned object
pub const MANAGED_BY: &str = "redis-operator";
/// Value of `app.kubernetes.io/part-of` on every owned object
pub const PART_OF: &str = "redis-failover";
/// Label carrying the owning RedisFailover's name
pub const FAILOVER_NAME_LABEL: &str = "redisfailovers.databases.spotahome.com/name";

pub const REDIS_COMPONENT: &str = "redis";
pub const SENTINEL_COMPONENT: &str = "sentinel";
pub const PROXY_COMPONENT: &str = "proxy";
pub const SHAKE_COMPONENT: &str = "shake";

/// Environment variable the Redis containers read the password from
pub const REDIS_PASSWORD_ENV: &str = "REDIS_PASSWORD";

const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

// ============================================================================
// Names
// ============================================================================

/// StatefulSet, read-write Service and ConfigMap of the data nodes
pub fn redis_name(resource: &RedisFailover) -> String {
    format!("rfr-{}", resource.name_any())
}

/// Deployment, Service and ConfigMap of the sentinels
pub fn sentinel_name(resource: &RedisFailover) -> String {
    format!("rfs-{}", resource.name_any())
}

pub fn sentinel_headless_name(resource: &RedisFailover) -> String {
    format!("rfs-{}-hl", resource.name_any())
}

pub fn sentinel_readiness_configmap_name(resource: &RedisFailover) -> String {
    format!("rfs-r-{}", resource.name_any())
}

pub fn redis_shutdown_configmap_name(resource: &RedisFailover) -> String {
    format!("rfr-s-{}", resource.name_any())
}

pub fn backup_cronjob_name(resource: &RedisFailover, schedule: &str) -> String {
    format!("rfr-{}-{}", resource.name_any(), schedule)
}

/// Sentinel service name for a RedisFailover referenced by name only
pub fn sentinel_service_for(instance: &str) -> String {
    format!("rfs-{instance}")
}

// ============================================================================
// Labels
// ============================================================================

/// Selector labels for one component of one resource.
///
/// These are immutable once a workload exists, so nothing user-controlled
/// goes in here.
pub fn selector_labels(component: &str, name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/part-of".to_string(), PART_OF.to_string());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.to_string(),
    );
    labels.insert("app.kubernetes.io/name".to_string(), name.to_string());
    labels
}

/// Copy the labels allowed by `whitelist` from `source`.
///
/// An empty whitelist copies everything. Patterns that fail to compile are
/// skipped with a warning.
pub fn filter_labels(
    source: &BTreeMap<String, String>,
    whitelist: &[String],
) -> BTreeMap<String, String> {
    if whitelist.is_empty() {
        return source.clone();
    }

    let patterns: Vec<Regex> = whitelist
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Ignoring invalid labelWhitelist entry");
                None
            }
        })
        .collect();

    source
        .iter()
        .filter(|(key, _)| patterns.iter().any(|re| re.is_match(key)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Labels applied to every object owned by a RedisFailover
pub fn failover_labels(resource: &RedisFailover) -> BTreeMap<String, String> {
    let mut labels = filter_labels(resource.labels(), &resource.spec.label_whitelist);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(FAILOVER_NAME_LABEL.to_string(), resource.name_any());
    labels
}

/// Object labels for one RedisFailover component: common labels plus selector labels
pub fn failover_component_labels(
    resource: &RedisFailover,
    component: &str,
) -> BTreeMap<String, String> {
    let mut labels = failover_labels(resource);
    labels.extend(selector_labels(component, &resource.name_any()));
    labels
}

/// Object labels for a proxy or shake resource
pub fn standard_labels<K: Resource>(resource: &K, component: &str) -> BTreeMap<String, String> {
    let mut labels = resource.labels().clone();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.extend(selector_labels(component, &resource.name_any()));
    labels
}

// ============================================================================
// Metadata
// ============================================================================

/// Controller owner reference pointing at `resource`
pub fn owner_reference<K: Resource<DynamicType = ()>>(resource: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for an owned object
pub fn owned_metadata<K: Resource<DynamicType = ()>>(
    resource: &K,
    name: String,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: resource.namespace(),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(resource)]),
        ..Default::default()
    }
}

pub fn label_selector(labels: BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    }
}

pub fn non_empty_map(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

// ============================================================================
// Pod spec fragments
// ============================================================================

/// Container resources; empty quantities are left out.
pub fn resource_requirements(spec: &ResourceRequirementsSpec) -> Option<ResourceRequirements> {
    if spec.is_empty() {
        return None;
    }

    fn quantities(cpu: &str, memory: &str) -> Option<BTreeMap<String, Quantity>> {
        let mut map = BTreeMap::new();
        if !cpu.is_empty() {
            map.insert("cpu".to_string(), Quantity(cpu.to_string()));
        }
        if !memory.is_empty() {
            map.insert("memory".to_string(), Quantity(memory.to_string()));
        }
        if map.is_empty() { None } else { Some(map) }
    }

    Some(ResourceRequirements {
        requests: quantities(&spec.requests.cpu, &spec.requests.memory),
        limits: quantities(&spec.limits.cpu, &spec.limits.memory),
        ..Default::default()
    })
}

/// Fixed requests and limits for helper containers
pub fn fixed_resources(
    req_cpu: &str,
    req_mem: &str,
    lim_cpu: &str,
    lim_mem: &str,
) -> Option<ResourceRequirements> {
    resource_requirements(&ResourceRequirementsSpec::new(
        req_cpu, req_mem, lim_cpu, lim_mem,
    ))
}

/// Convert CRD tolerations to k8s-openapi Tolerations.
pub fn convert_tolerations(pod: &PodSettings) -> Option<Vec<Toleration>> {
    if pod.tolerations.is_empty() {
        return None;
    }

    Some(
        pod.tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
    )
}

/// Convert pull secret names to LocalObjectReference list.
pub fn convert_pull_secrets(pod: &PodSettings) -> Option<Vec<LocalObjectReference>> {
    if pod.image_pull_secrets.is_empty() {
        return None;
    }

    Some(
        pod.image_pull_secrets
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect(),
    )
}

/// Preferred anti-affinity spreading pods matching `labels` across nodes.
pub fn soft_anti_affinity(labels: BTreeMap<String, String>) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(label_selector(labels)),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment variable sourced from the `password` key of a Secret
pub fn secret_env(env_name: &str, secret_name: &str) -> EnvVar {
    EnvVar {
        name: env_name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: AUTH_SECRET_KEY.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Environment variable from the downward API
pub fn field_env(env_name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: env_name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(k8s_openapi::api::core::v1::ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn plain_env(env_name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: env_name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}
