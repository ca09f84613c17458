//! Service generation for RedisFailover.
//!
//! Creates three services:
//! - **Redis Service** `rfr-<name>`: headless, one DNS record per data node
//! - **Sentinel Service** `rfs-<name>`: load-balanced sentinel endpoint
//! - **Sentinel Headless Service** `rfs-<name>-hl`: per-sentinel DNS records

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{REDIS_PORT, RedisFailover, SENTINEL_PORT};
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, failover_component_labels, non_empty_map,
    owned_metadata, redis_name, selector_labels, sentinel_headless_name, sentinel_name,
};

fn port(name: &str, number: u16) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: i32::from(number),
        target_port: Some(IntOrString::Int(i32::from(number))),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn service(
    resource: &RedisFailover,
    name: String,
    component: &str,
    annotations: &BTreeMap<String, String>,
    spec: ServiceSpec,
) -> Service {
    let mut metadata = owned_metadata(
        resource,
        name,
        failover_component_labels(resource, component),
    );
    metadata.annotations = non_empty_map(annotations);

    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(component, &resource.name_any())),
            ..spec
        }),
        ..Default::default()
    }
}

/// Read-write service for the data nodes.
///
/// Headless, so clients and sentinels resolve individual pods.
pub fn generate_redis_service(resource: &RedisFailover) -> Service {
    service(
        resource,
        redis_name(resource),
        REDIS_COMPONENT,
        &resource.spec.redis.pod.service_annotations,
        ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![port("redis", REDIS_PORT)]),
            ..Default::default()
        },
    )
}

/// Sentinel service. Its port is named `sentinel` so the shutdown script
/// can find it through `RFS_<NAME>_SERVICE_PORT_SENTINEL`.
pub fn generate_sentinel_service(resource: &RedisFailover) -> Service {
    service(
        resource,
        sentinel_name(resource),
        SENTINEL_COMPONENT,
        &resource.spec.sentinel.pod.service_annotations,
        ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![port("sentinel", SENTINEL_PORT)]),
            ..Default::default()
        },
    )
}

pub fn generate_sentinel_headless_service(resource: &RedisFailover) -> Service {
    service(
        resource,
        sentinel_headless_name(resource),
        SENTINEL_COMPONENT,
        &resource.spec.sentinel.pod.service_annotations,
        ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            ports: Some(vec![port("sentinel", SENTINEL_PORT)]),
            ..Default::default()
        },
    )
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::RedisFailoverSpec;

    fn test_resource(name: &str) -> RedisFailover {
        let mut rf = RedisFailover::new(name, RedisFailoverSpec::default());
        rf.metadata.namespace = Some("default".to_string());
        rf.metadata.uid = Some("test-uid".to_string());
        rf
    }

    #[test]
    fn test_generate_redis_service() {
        let resource = test_resource("cache");
        let svc = generate_redis_service(&resource);

        assert_eq!(svc.metadata.name, Some("rfr-cache".to_string()));
        assert_eq!(svc.metadata.namespace, Some("default".to_string()));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports.first().unwrap().port, 6379);
        assert_eq!(ports.first().unwrap().name, Some("redis".to_string()));
    }

    #[test]
    fn test_generate_sentinel_service() {
        let resource = test_resource("cache");
        let svc = generate_sentinel_service(&resource);

        assert_eq!(svc.metadata.name, Some("rfs-cache".to_string()));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_, Some("ClusterIP".to_string()));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.first().unwrap().port, 26379);
        assert_eq!(ports.first().unwrap().name, Some("sentinel".to_string()));
        assert_eq!(
            spec.selector.unwrap().get("app.kubernetes.io/component"),
            Some(&"sentinel".to_string())
        );
    }

    #[test]
    fn test_generate_sentinel_headless_service() {
        let resource = test_resource("cache");
        let svc = generate_sentinel_headless_service(&resource);

        assert_eq!(svc.metadata.name, Some("rfs-cache-hl".to_string()));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip, Some("None".to_string()));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
    }

    #[test]
    fn test_service_annotations() {
        let mut resource = test_resource("cache");
        resource
            .spec
            .redis
            .pod
            .service_annotations
            .insert("prometheus.io/scrape".to_string(), "true".to_string());

        let svc = generate_redis_service(&resource);
        assert_eq!(
            svc.metadata.annotations.unwrap().get("prometheus.io/scrape"),
            Some(&"true".to_string())
        );
        assert!(generate_sentinel_service(&resource).metadata.annotations.is_none());
    }
}
