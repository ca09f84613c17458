//! Deployment generation for the Sentinel arbiters.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, ExecAction, PodSpec,
    PodTemplateSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{DEFAULT_SENTINEL_EXPORTER_IMAGE, RedisFailover, SENTINEL_PORT};
use crate::resources::common::{
    SENTINEL_COMPONENT, convert_pull_secrets, convert_tolerations, failover_component_labels,
    fixed_resources, label_selector, non_empty_map, owned_metadata, resource_requirements,
    selector_labels, sentinel_name, sentinel_readiness_configmap_name, soft_anti_affinity,
};
use crate::resources::configmaps::{READINESS_SCRIPT, SENTINEL_CONFIG_FILE};

/// Port the sentinel exporter sidecar serves metrics on
pub const SENTINEL_EXPORTER_PORT: i32 = 9355;

const CONFIG_VOLUME: &str = "sentinel-config";
const WRITABLE_VOLUME: &str = "sentinel-config-writable";
const READINESS_VOLUME: &str = "readiness-probe";

/// Sentinel rewrites its config file at runtime, so it runs from a writable
/// copy of the ConfigMap.
pub fn sentinel_command(resource: &RedisFailover) -> Vec<String> {
    if !resource.spec.sentinel.command.is_empty() {
        return resource.spec.sentinel.command.clone();
    }
    vec![
        "redis-server".to_string(),
        format!("/redis-writable/{SENTINEL_CONFIG_FILE}"),
        "--sentinel".to_string(),
    ]
}

pub fn generate_sentinel_deployment(resource: &RedisFailover) -> Deployment {
    let sentinel = &resource.spec.sentinel;
    let labels = failover_component_labels(resource, SENTINEL_COMPONENT);
    let selector = selector_labels(SENTINEL_COMPONENT, &resource.name_any());

    let mut containers = vec![generate_sentinel_container(resource)];
    if sentinel.exporter.enabled {
        containers.push(generate_exporter_container(resource));
    }

    Deployment {
        metadata: owned_metadata(resource, sentinel_name(resource), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(sentinel.replicas),
            selector: label_selector(selector.clone()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: non_empty_map(&sentinel.pod.pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(soft_anti_affinity(selector)),
                    init_containers: Some(vec![generate_config_copy_container(resource)]),
                    containers,
                    volumes: Some(generate_volumes(resource)),
                    node_selector: non_empty_map(&sentinel.pod.node_selector),
                    tolerations: convert_tolerations(&sentinel.pod),
                    image_pull_secrets: convert_pull_secrets(&sentinel.pod),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn generate_config_copy_container(resource: &RedisFailover) -> Container {
    Container {
        name: "sentinel-config-copy".to_string(),
        image: Some(resource.spec.sentinel.image.clone()),
        image_pull_policy: Some(resource.spec.sentinel.image_pull_policy.clone()),
        command: Some(vec![
            "cp".to_string(),
            format!("/redis/{SENTINEL_CONFIG_FILE}"),
            format!("/redis-writable/{SENTINEL_CONFIG_FILE}"),
        ]),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, "/redis"),
            mount(WRITABLE_VOLUME, "/redis-writable"),
        ]),
        resources: fixed_resources("10m", "32Mi", "10m", "32Mi"),
        ..Default::default()
    }
}

fn generate_sentinel_container(resource: &RedisFailover) -> Container {
    let sentinel = &resource.spec.sentinel;
    Container {
        name: "sentinel".to_string(),
        image: Some(sentinel.image.clone()),
        image_pull_policy: Some(sentinel.image_pull_policy.clone()),
        command: Some(sentinel_command(resource)),
        ports: Some(vec![ContainerPort {
            container_port: i32::from(SENTINEL_PORT),
            name: Some("sentinel".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: resource_requirements(&sentinel.resources),
        volume_mounts: Some(vec![
            mount(READINESS_VOLUME, "/redis-probe"),
            mount(WRITABLE_VOLUME, "/redis-writable"),
        ]),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "sh".to_string(),
                    format!("/redis-probe/{READINESS_SCRIPT}"),
                ]),
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(15),
            failure_threshold: Some(5),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("redis-cli -h $(hostname) -p {SENTINEL_PORT} ping"),
                ]),
            }),
            initial_delay_seconds: Some(30),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_exporter_container(resource: &RedisFailover) -> Container {
    let exporter = &resource.spec.sentinel.exporter;
    let image = if exporter.image.is_empty() {
        DEFAULT_SENTINEL_EXPORTER_IMAGE.to_string()
    } else {
        exporter.image.clone()
    };

    Container {
        name: "sentinel-exporter".to_string(),
        image: Some(image),
        image_pull_policy: Some(resource.spec.sentinel.image_pull_policy.clone()),
        ports: Some(vec![ContainerPort {
            container_port: SENTINEL_EXPORTER_PORT,
            name: Some("http-metrics".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: fixed_resources("10m", "20Mi", "50m", "50Mi"),
        ..Default::default()
    }
}

fn generate_volumes(resource: &RedisFailover) -> Vec<Volume> {
    vec![
        Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: sentinel_name(resource),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: READINESS_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: sentinel_readiness_configmap_name(resource),
                default_mode: Some(0o744),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: WRITABLE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    ]
}
