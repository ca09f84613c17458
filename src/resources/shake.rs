//! Object generation for RedisShake.
//!
//! Objects: ConfigMap `<name>-shake` with `redis-shake.conf`, ConfigMap
//! `<name>-shake-init` with the init script, a metrics Service and the
//! Deployment, all named `<name>-shake` except the init ConfigMap.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{
    EndpointType, FilterList, MASTER_GROUP, REDIS_PORT, RedisShake, SENTINEL_PORT, SourceInfo,
    TargetInfo,
};
use crate::resources::common::{
    SHAKE_COMPONENT, convert_pull_secrets, convert_tolerations, label_selector, non_empty_map,
    owned_metadata, resource_requirements, secret_env, selector_labels, sentinel_service_for,
    soft_anti_affinity, standard_labels,
};

pub const SHAKE_CONFIG_FILE: &str = "redis-shake.conf";
pub const SHAKE_INIT_SCRIPT: &str = "init.sh";
/// redis-shake's HTTP metrics port
pub const SHAKE_METRICS_PORT: i32 = 9320;

pub const SOURCE_PASSWORD_ENV: &str = "SOURCE_REDIS_PASSWORD";
pub const TARGET_PASSWORD_ENV: &str = "TARGET_REDIS_PASSWORD";

const INIT_IMAGE: &str = "redis:5.0-alpine";
const CONFIG_VOLUME: &str = "shake-config";
const DATA_VOLUME: &str = "shake-data";
const INIT_VOLUME: &str = "shake-init";

pub fn shake_name(resource: &RedisShake) -> String {
    format!("{}-shake", resource.name_any())
}

pub fn shake_init_name(resource: &RedisShake) -> String {
    format!("{}-shake-init", resource.name_any())
}

/// Data-node addresses of an operator-managed Redis cluster
fn cluster_nodes(cluster: &str) -> String {
    (0..3)
        .map(|ordinal| format!("{cluster}-{ordinal}:{REDIS_PORT}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn derived_address(
    address: &[String],
    kind: EndpointType,
    cluster_name: &str,
    is_source: bool,
) -> String {
    if !address.is_empty() {
        return address.join(";");
    }
    if cluster_name.is_empty() {
        return String::new();
    }
    match kind {
        EndpointType::Sentinel => format!(
            "{MASTER_GROUP}@{}:{SENTINEL_PORT}",
            sentinel_service_for(cluster_name)
        ),
        EndpointType::Cluster if is_source => format!("master@{}", cluster_nodes(cluster_name)),
        EndpointType::Cluster => cluster_nodes(cluster_name),
        _ => String::new(),
    }
}

/// `source.address` value.
///
/// An explicit address list wins over a cluster name.
pub fn source_address(source: &SourceInfo) -> String {
    derived_address(&source.address, source.r#type, &source.cluster_name, true)
}

pub fn target_address(target: &TargetInfo) -> String {
    derived_address(&target.address, target.r#type, &target.cluster_name, false)
}

fn list(values: &[String]) -> String {
    values.join(";")
}

fn filter_lines(name: &str, filter: &FilterList) -> String {
    format!(
        "filter.{name}.whitelist = {}\nfilter.{name}.blacklist = {}\n",
        list(&filter.white_list),
        list(&filter.black_list)
    )
}

/// Render `redis-shake.conf`. Passwords are placeholders filled by the init
/// container.
pub fn render_shake_config(resource: &RedisShake) -> String {
    let spec = &resource.spec;
    let source = spec.source.clone().unwrap_or_default();
    let target = spec.target.clone().unwrap_or_default();

    let dbmap = target
        .dbmap
        .iter()
        .map(|(from, to)| format!("{from}-{to}"))
        .collect::<Vec<_>>()
        .join(";");

    let mut conf = format!(
        "conf.version = 1\n\
         id = redis-shake\n\
         log.file =\n\
         log.level = info\n\
         system_profile = 9310\n\
         http_profile = {SHAKE_METRICS_PORT}\n\
         parallel = {parallel}\n\
         source.type = {source_type}\n\
         source.address = {source_address}\n\
         source.password_raw = {{source_passwd}}\n\
         source.auth_type = auth\n\
         source.tls_enable = {source_tls}\n\
         source.tls_skip_verify = {source_skip}\n\
         target.type = {target_type}\n\
         target.address = {target_address}\n\
         target.password_raw = {{target_passwd}}\n\
         target.db = {db}\n\
         target.dbmap = {dbmap}\n\
         target.tls_enable = {target_tls}\n\
         target.tls_skip_verify = {target_skip}\n\
         key_exists = {key_exists}\n",
        parallel = spec.parallel,
        source_type = source.r#type,
        source_address = source_address(&source),
        source_tls = source.tls_enable,
        source_skip = source.tls_skip_verify,
        target_type = target.r#type,
        target_address = target_address(&target),
        db = target.db.unwrap_or(-1),
        target_tls = target.tls_enable,
        target_skip = target.tls_skip_verify,
        key_exists = spec.key_exists,
    );

    conf.push_str(&filter_lines("db", &spec.filter.db));
    conf.push_str(&filter_lines("key", &spec.filter.key));
    conf.push_str(&format!("filter.slot = {}\n", list(&spec.filter.slot)));
    conf.push_str(&filter_lines("command", &spec.filter.command));
    conf.push_str(&format!("filter.lua = {}\n", spec.filter.lua));
    conf.push_str(&format!(
        "big_key_threshold = {}\n\
         metric = true\n\
         metric.print_log = false\n\
         sender.size = 104857600\n\
         sender.count = 4095\n\
         sender.delay_channel_size = 65535\n\
         keep_alive = 0\n\
         scan.key_number = 50\n\
         qps = {}\n\
         resume_from_break_point = {}\n\
         replace_hash_tag = false\n",
        spec.big_key_threshold, spec.qbs, spec.resume_from_break_point
    ));
    conf
}

/// Host and port checked for the stop flag before the migration starts
fn stop_flag_endpoint(target: &TargetInfo) -> (String, String) {
    if let Some((host, port)) = target.address.first().and_then(|a| a.split_once(':')) {
        return (host.to_string(), port.to_string());
    }
    let host = match target.r#type {
        EndpointType::Cluster if !target.cluster_name.is_empty() => {
            format!("{}-0", target.cluster_name)
        }
        EndpointType::Sentinel if !target.cluster_name.is_empty() => {
            format!("rfr-{}", target.cluster_name)
        }
        _ => "127.0.0.1".to_string(),
    };
    (host, REDIS_PORT.to_string())
}

/// Init script: render the config with passwords, then refuse to start
/// while the target carries `redisShakeStopFlag=true`.
pub fn render_shake_init_script(resource: &RedisShake) -> String {
    let target = resource.spec.target.clone().unwrap_or_default();
    let (host, port) = stop_flag_endpoint(&target);

    format!(
        r#"cp /config_tmp/{SHAKE_CONFIG_FILE} /config/{SHAKE_CONFIG_FILE}
sed -i "s/{{source_passwd}}/${{{SOURCE_PASSWORD_ENV}}}/g" /config/{SHAKE_CONFIG_FILE}
sed -i "s/{{target_passwd}}/${{{TARGET_PASSWORD_ENV}}}/g" /config/{SHAKE_CONFIG_FILE}
auth=""
if [ -n "${{{TARGET_PASSWORD_ENV}}}" ]; then
    auth="-a ${{{TARGET_PASSWORD_ENV}}}"
fi
if redis-cli -c -h {host} -p {port} $auth get redisShakeStopFlag | grep -q true; then
    echo "redis-shake blocked by redisShakeStopFlag"
    exit 1
fi
exit 0
"#
    )
}

pub fn generate_shake_configmap(resource: &RedisShake) -> ConfigMap {
    ConfigMap {
        metadata: owned_metadata(
            resource,
            shake_name(resource),
            standard_labels(resource, SHAKE_COMPONENT),
        ),
        data: Some(BTreeMap::from([(
            SHAKE_CONFIG_FILE.to_string(),
            render_shake_config(resource),
        )])),
        ..Default::default()
    }
}

pub fn generate_shake_init_configmap(resource: &RedisShake) -> ConfigMap {
    ConfigMap {
        metadata: owned_metadata(
            resource,
            shake_init_name(resource),
            standard_labels(resource, SHAKE_COMPONENT),
        ),
        data: Some(BTreeMap::from([(
            SHAKE_INIT_SCRIPT.to_string(),
            render_shake_init_script(resource),
        )])),
        ..Default::default()
    }
}

pub fn generate_shake_service(resource: &RedisShake) -> Service {
    Service {
        metadata: owned_metadata(
            resource,
            shake_name(resource),
            standard_labels(resource, SHAKE_COMPONENT),
        ),
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(SHAKE_COMPONENT, &resource.name_any())),
            ports: Some(vec![ServicePort {
                name: Some("metrics".to_string()),
                port: SHAKE_METRICS_PORT,
                target_port: Some(IntOrString::Int(SHAKE_METRICS_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `/redis-shake -conf /config/redis-shake.conf -type <model>`
pub fn shake_command(resource: &RedisShake) -> Vec<String> {
    vec![
        "/redis-shake".to_string(),
        "-conf".to_string(),
        format!("/config/{SHAKE_CONFIG_FILE}"),
        "-type".to_string(),
        resource.spec.model_type.to_string(),
    ]
}

fn password_env(resource: &RedisShake) -> Vec<EnvVar> {
    let source = resource.spec.source.as_ref().map(|s| s.password_secret.as_str());
    let target = resource.spec.target.as_ref().map(|t| t.password_secret.as_str());
    [(SOURCE_PASSWORD_ENV, source), (TARGET_PASSWORD_ENV, target)]
        .into_iter()
        .filter_map(|(env, secret)| match secret {
            Some(secret) if !secret.is_empty() => Some(secret_env(env, secret)),
            _ => None,
        })
        .collect()
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn configmap_volume(name: &str, configmap: String) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap,
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn generate_shake_deployment(resource: &RedisShake) -> Deployment {
    let spec = &resource.spec;
    let labels = standard_labels(resource, SHAKE_COMPONENT);
    let selector = selector_labels(SHAKE_COMPONENT, &resource.name_any());
    let resources = resource_requirements(&spec.resources);

    let init = Container {
        name: "shake-init".to_string(),
        image: Some(INIT_IMAGE.to_string()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        command: Some(vec![
            "sh".to_string(),
            format!("/script/{SHAKE_INIT_SCRIPT}"),
        ]),
        env: Some(password_env(resource)),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, "/config_tmp"),
            mount(DATA_VOLUME, "/config"),
            mount(INIT_VOLUME, "/script"),
        ]),
        resources: resources.clone(),
        ..Default::default()
    };

    let shake = Container {
        name: "redis-shake".to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        command: Some(shake_command(resource)),
        ports: Some(vec![ContainerPort {
            container_port: SHAKE_METRICS_PORT,
            name: Some("metrics".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            mount(CONFIG_VOLUME, "/config_tmp"),
            mount(DATA_VOLUME, "/config"),
        ]),
        resources,
        ..Default::default()
    };

    Deployment {
        metadata: owned_metadata(resource, shake_name(resource), labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: label_selector(selector.clone()),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: non_empty_map(&spec.pod.pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(soft_anti_affinity(selector)),
                    init_containers: Some(vec![init]),
                    containers: vec![shake],
                    volumes: Some(vec![
                        configmap_volume(CONFIG_VOLUME, shake_name(resource)),
                        Volume {
                            name: DATA_VOLUME.to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                        configmap_volume(INIT_VOLUME, shake_init_name(resource)),
                    ]),
                    node_selector: non_empty_map(&spec.pod.node_selector),
                    tolerations: convert_tolerations(&spec.pod),
                    image_pull_secrets: convert_pull_secrets(&spec.pod),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
