//! StatefulSet generation for the Redis data nodes.
//!
//! Creates `rfr-<name>` with:
//! - Stable network identity via the headless redis service
//! - Persistent storage when a PVC is declared, emptyDir otherwise
//! - A config-copy init container rendering `redis.conf` into the data volume
//! - An optional restore init container and exporter sidecar
//! - Pod anti-affinity for high availability
//! - A preStop hook that saves and hands mastership over

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, ExecAction,
    Lifecycle, LifecycleHandler, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe, SecurityContext, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{DEFAULT_EXPORTER_IMAGE, REDIS_PORT, RedisFailover};
use crate::resources::common::{
    REDIS_COMPONENT, REDIS_PASSWORD_ENV, convert_pull_secrets, convert_tolerations, field_env,
    failover_component_labels, fixed_resources, label_selector, non_empty_map, owned_metadata,
    owner_reference, redis_name, redis_shutdown_configmap_name, resource_requirements,
    secret_env, selector_labels, soft_anti_affinity,
};
use crate::resources::configmaps::{REDIS_CONFIG_FILE, REDIS_INIT_SCRIPT, SHUTDOWN_SCRIPT};

/// Port the exporter sidecar serves metrics on
pub const EXPORTER_PORT: i32 = 9121;
/// Grace period covering the shutdown script's SAVE and failover
const TERMINATION_GRACE_PERIOD: i64 = 60;
/// Executable bit for the mounted scripts
const SCRIPT_MODE: i32 = 0o744;

const DATA_VOLUME: &str = "redis-data";
const CONFIG_VOLUME: &str = "redis-config";
const SHUTDOWN_VOLUME: &str = "redis-shutdown-config";
const BACKUP_VOLUME: &str = "backup-data";

/// Generate the StatefulSet for the data nodes of a RedisFailover.
pub fn generate_statefulset(resource: &RedisFailover) -> StatefulSet {
    let name = redis_name(resource);
    let labels = failover_component_labels(resource, REDIS_COMPONENT);
    let selector = selector_labels(REDIS_COMPONENT, &resource.name_any());

    StatefulSet {
        metadata: owned_metadata(resource, name.clone(), labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(resource.spec.redis.replicas),
            service_name: Some(name),
            selector: label_selector(selector.clone()),
            pod_management_policy: Some("OrderedReady".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..Default::default()
            }),
            template: generate_pod_template(resource, labels, selector),
            volume_claim_templates: generate_pvc_template(resource).map(|pvc| vec![pvc]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(
    resource: &RedisFailover,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
) -> PodTemplateSpec {
    let pod = &resource.spec.redis.pod;

    let mut init_containers = vec![generate_config_copy_container(resource)];
    if let Some(restore) = generate_restore_container(resource) {
        init_containers.push(restore);
    }

    let mut containers = vec![generate_redis_container(resource)];
    if resource.spec.redis.exporter.enabled {
        containers.push(generate_exporter_container(resource));
    }

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations: non_empty_map(&pod.pod_annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            affinity: Some(soft_anti_affinity(selector)),
            init_containers: Some(init_containers),
            containers,
            volumes: Some(generate_volumes(resource)),
            node_selector: non_empty_map(&pod.node_selector),
            tolerations: convert_tolerations(pod),
            image_pull_secrets: convert_pull_secrets(pod),
            ..Default::default()
        }),
    }
}

fn auth_secret(resource: &RedisFailover) -> Option<&str> {
    let secret = resource.spec.auth.secret_path.as_str();
    (!secret.is_empty()).then_some(secret)
}

fn password_env(resource: &RedisFailover) -> Vec<EnvVar> {
    auth_secret(resource)
        .map(|secret| vec![secret_env(REDIS_PASSWORD_ENV, secret)])
        .unwrap_or_default()
}

fn privileged() -> Option<SecurityContext> {
    Some(SecurityContext {
        privileged: Some(true),
        ..Default::default()
    })
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

/// Copies `redis.conf` into the data volume and substitutes the password
/// and announce IP.
fn generate_config_copy_container(resource: &RedisFailover) -> Container {
    let mut env = vec![field_env("POD_IP", "status.podIP")];
    env.extend(password_env(resource));

    Container {
        name: "config-copy".to_string(),
        image: Some(resource.spec.redis.image.clone()),
        image_pull_policy: Some(resource.spec.redis.image_pull_policy.clone()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("/redis/{REDIS_INIT_SCRIPT}"),
        ]),
        env: Some(env),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, "/redis"),
            mount(DATA_VOLUME, "/redis-writable"),
        ]),
        resources: fixed_resources("10m", "32Mi", "10m", "32Mi"),
        security_context: privileged(),
        ..Default::default()
    }
}

fn generate_restore_container(resource: &RedisFailover) -> Option<Container> {
    let restore = &resource.spec.redis.restore;
    if restore.backup_name.is_empty() {
        return None;
    }

    Some(Container {
        name: "redis-restore".to_string(),
        image: Some(restore.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-c".to_string(),
            "/restore.sh".to_string(),
        ]),
        volume_mounts: Some(vec![
            mount(BACKUP_VOLUME, "/backup"),
            mount(DATA_VOLUME, "/data"),
        ]),
        security_context: privileged(),
        ..Default::default()
    })
}

/// Default command: start as a replica of nothing so a restarted node never
/// comes back as a second master.
pub fn redis_command(resource: &RedisFailover) -> Vec<String> {
    if !resource.spec.redis.command.is_empty() {
        return resource.spec.redis.command.clone();
    }
    vec![
        "redis-server".to_string(),
        format!("/data/{REDIS_CONFIG_FILE}"),
        "--slaveof".to_string(),
        "127.0.0.1".to_string(),
        REDIS_PORT.to_string(),
    ]
}

fn ping_probe(resource: &RedisFailover) -> Probe {
    let auth = if auth_secret(resource).is_some() {
        format!(" -a ${{{REDIS_PASSWORD_ENV}}}")
    } else {
        String::new()
    };
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("redis-cli -h $(hostname){auth} ping"),
            ]),
        }),
        initial_delay_seconds: Some(30),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

fn generate_redis_container(resource: &RedisFailover) -> Container {
    let redis = &resource.spec.redis;
    Container {
        name: "redis".to_string(),
        image: Some(redis.image.clone()),
        image_pull_policy: Some(redis.image_pull_policy.clone()),
        command: Some(redis_command(resource)),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(REDIS_PORT),
            name: Some("redis".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(password_env(resource)),
        resources: resource_requirements(&redis.resources),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, "/redis"),
            mount(SHUTDOWN_VOLUME, "/redis-shutdown"),
            mount(DATA_VOLUME, "/data"),
        ]),
        readiness_probe: Some(ping_probe(resource)),
        liveness_probe: Some(ping_probe(resource)),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        format!("/redis-shutdown/{SHUTDOWN_SCRIPT}"),
                    ]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_exporter_container(resource: &RedisFailover) -> Container {
    let exporter = &resource.spec.redis.exporter;
    let image = if exporter.image.is_empty() {
        DEFAULT_EXPORTER_IMAGE.to_string()
    } else {
        exporter.image.clone()
    };

    let mut env = vec![field_env("REDIS_ALIAS", "metadata.name")];
    env.extend(password_env(resource));

    Container {
        name: "redis-exporter".to_string(),
        image: Some(image),
        image_pull_policy: Some(resource.spec.redis.image_pull_policy.clone()),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            container_port: EXPORTER_PORT,
            name: Some("http-metrics".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: fixed_resources("50m", "100Mi", "100m", "200Mi"),
        ..Default::default()
    }
}

fn configmap_volume(name: &str, configmap: String) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap,
            default_mode: Some(SCRIPT_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_volumes(resource: &RedisFailover) -> Vec<Volume> {
    let mut volumes = vec![
        configmap_volume(CONFIG_VOLUME, redis_name(resource)),
        configmap_volume(SHUTDOWN_VOLUME, redis_shutdown_configmap_name(resource)),
    ];

    // Without a claim template the data lives in an emptyDir
    if resource.spec.redis.storage.persistent_volume_claim.is_none() {
        volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    let backup_name = &resource.spec.redis.restore.backup_name;
    if !backup_name.is_empty() {
        volumes.push(Volume {
            name: BACKUP_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: backup_name.clone(),
                read_only: Some(true),
            }),
            ..Default::default()
        });
    }

    volumes
}

/// PVC template for the data volume.
///
/// Claims are owned by the RedisFailover unless `keepAfterDeletion` is set,
/// so they are garbage-collected with it.
fn generate_pvc_template(resource: &RedisFailover) -> Option<PersistentVolumeClaim> {
    let storage = &resource.spec.redis.storage;
    let claim = storage.persistent_volume_claim.as_ref()?;

    let access_modes = if claim.access_modes.is_empty() {
        vec!["ReadWriteOnce".to_string()]
    } else {
        claim.access_modes.clone()
    };

    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(failover_component_labels(resource, REDIS_COMPONENT)),
            owner_references: (!storage.keep_after_deletion)
                .then(|| vec![owner_reference(resource)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: claim.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(claim.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
