//! Object generation for RedisProxy (predixy).
//!
//! Everything is named `<name>-proxy`, except the NodePort service which is
//! `<name>-proxyn`.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Probe,
    Service, ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{
    MASTER_GROUP, ProxyArchitecture, REDIS_PORT, RedisProxy, SENTINEL_PORT,
};
use crate::resources::common::{
    PROXY_COMPONENT, REDIS_PASSWORD_ENV, convert_pull_secrets, convert_tolerations,
    label_selector, non_empty_map, owned_metadata, resource_requirements, secret_env,
    selector_labels, sentinel_service_for, soft_anti_affinity, standard_labels,
};
use crate::resources::pdb::generate_pod_disruption_budget;

pub const PROXY_CONFIG_FILE: &str = "proxy.conf";

const CONFIG_VOLUME: &str = "proxy-config";
const PASSWORD_PLACEHOLDER: &str = "{REDIS_PASSWORD}";

pub fn proxy_name(resource: &RedisProxy) -> String {
    format!("{}-proxy", resource.name_any())
}

pub fn proxy_nodeport_name(resource: &RedisProxy) -> String {
    format!("{}-proxyn", resource.name_any())
}

fn has_auth(resource: &RedisProxy) -> bool {
    !resource.spec.auth.secret_path.is_empty()
}

/// Render `proxy.conf`.
///
/// The password appears only as a placeholder; the container substitutes it
/// from its environment at start.
pub fn render_proxy_config(resource: &RedisProxy) -> String {
    let info = &resource.spec.proxy_info;
    let instance = &info.instance_name;
    let password_line = if has_auth(resource) {
        format!("    Password {PASSWORD_PLACEHOLDER}\n")
    } else {
        String::new()
    };

    let mut conf = format!(
        "Name {name}\n\
         Bind 0.0.0.0:{REDIS_PORT}\n\
         WorkerThreads {threads}\n\
         ClientTimeout {timeout}\n\
         \n\
         LogVerbSample 0\n\
         LogDebugSample 0\n\
         LogInfoSample 0\n\
         LogNoticeSample 0\n\
         LogWarnSample 1\n\
         LogErrorSample 1\n\
         \n",
        name = resource.name_any(),
        threads = info.work_threads,
        timeout = info.client_timeout,
    );

    if has_auth(resource) {
        conf.push_str(&format!(
            "Authority {{\n    Auth {PASSWORD_PLACEHOLDER} {{\n        Mode admin\n    }}\n}}\n\n"
        ));
    } else {
        conf.push_str("Authority {\n    Auth {\n        Mode write\n    }\n}\n\n");
    }

    match info.architecture {
        ProxyArchitecture::Cluster => {
            conf.push_str("ClusterServerPool {\n");
            conf.push_str(&password_line);
            conf.push_str("    Servers {\n");
            for ordinal in 0..3 {
                conf.push_str(&format!("        + {instance}-{ordinal}:{REDIS_PORT}\n"));
            }
            conf.push_str("    }\n}\n");
        }
        ProxyArchitecture::Sentinel => {
            conf.push_str("SentinelServerPool {\n");
            conf.push_str(&password_line);
            conf.push_str("    Sentinels {\n");
            conf.push_str(&format!(
                "        + {}:{SENTINEL_PORT}\n",
                sentinel_service_for(instance)
            ));
            conf.push_str("    }\n");
            conf.push_str(&format!("    Group {MASTER_GROUP} {{\n    }}\n}}\n"));
        }
    }
    conf
}

pub fn generate_proxy_configmap(resource: &RedisProxy) -> ConfigMap {
    ConfigMap {
        metadata: owned_metadata(
            resource,
            proxy_name(resource),
            standard_labels(resource, PROXY_COMPONENT),
        ),
        data: Some(BTreeMap::from([(
            PROXY_CONFIG_FILE.to_string(),
            render_proxy_config(resource),
        )])),
        ..Default::default()
    }
}

fn proxy_service(resource: &RedisProxy, name: String, type_: &str) -> Service {
    let mut metadata = owned_metadata(resource, name, standard_labels(resource, PROXY_COMPONENT));
    metadata.annotations = non_empty_map(&resource.spec.pod.service_annotations);

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(type_.to_string()),
            selector: Some(selector_labels(PROXY_COMPONENT, &resource.name_any())),
            ports: Some(vec![ServicePort {
                name: Some("redis".to_string()),
                port: i32::from(REDIS_PORT),
                target_port: Some(IntOrString::Int(i32::from(REDIS_PORT))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn generate_proxy_service(resource: &RedisProxy) -> Service {
    proxy_service(resource, proxy_name(resource), "ClusterIP")
}

pub fn generate_proxy_nodeport_service(resource: &RedisProxy) -> Service {
    proxy_service(resource, proxy_nodeport_name(resource), "NodePort")
}

pub fn generate_proxy_pdb(resource: &RedisProxy) -> PodDisruptionBudget {
    generate_pod_disruption_budget(
        owned_metadata(
            resource,
            proxy_name(resource),
            standard_labels(resource, PROXY_COMPONENT),
        ),
        selector_labels(PROXY_COMPONENT, &resource.name_any()),
        resource.spec.replicas,
    )
}

fn proxy_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            "sed \"s/{PASSWORD_PLACEHOLDER}/${{{REDIS_PASSWORD_ENV}}}/g\" /config/{PROXY_CONFIG_FILE} \
             > /tmp/{PROXY_CONFIG_FILE} && exec predixy /tmp/{PROXY_CONFIG_FILE}"
        ),
    ]
}

pub fn generate_proxy_deployment(resource: &RedisProxy) -> Deployment {
    let spec = &resource.spec;
    let labels = standard_labels(resource, PROXY_COMPONENT);
    let selector = selector_labels(PROXY_COMPONENT, &resource.name_any());
    let env = has_auth(resource)
        .then(|| vec![secret_env(REDIS_PASSWORD_ENV, &spec.auth.secret_path)]);

    let probe = Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(REDIS_PORT)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        ..Default::default()
    };

    let container = Container {
        name: "proxy".to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        command: Some(proxy_command()),
        env,
        ports: Some(vec![ContainerPort {
            container_port: i32::from(REDIS_PORT),
            name: Some("redis".to_string()),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: resource_requirements(&spec.resources),
        volume_mounts: Some(vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: "/config".to_string(),
            ..Default::default()
        }]),
        readiness_probe: Some(probe.clone()),
        liveness_probe: Some(probe),
        ..Default::default()
    };

    Deployment {
        metadata: owned_metadata(resource, proxy_name(resource), labels.clone()),
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
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: CONFIG_VOLUME.to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: proxy_name(resource),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
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
