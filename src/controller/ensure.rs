//! Server-side apply of the objects owned by each custom resource.
//!
//! Every object is applied with [`FIELD_MANAGER`] and forced, so the operator
//! always wins conflicts on the fields it sets. Objects carry an owner
//! reference and are garbage-collected with their owner.

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{RedisFailover, RedisProxy, RedisShake};
use crate::resources::common::{
    REDIS_COMPONENT, SENTINEL_COMPONENT, failover_component_labels, owned_metadata, redis_name,
    selector_labels, sentinel_name,
};
use crate::resources::{backup, configmaps, pdb, proxy, sentinel, services, shake, statefulset};

/// Apply one namespaced object by the name in its metadata.
pub async fn apply<K>(client: &Client, namespace: &str, obj: &K) -> Result<()>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let name = obj
        .meta()
        .name
        .clone()
        .ok_or_else(|| Error::MissingField(format!("{}.metadata.name", K::kind(&()))))?;
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(obj),
    )
    .await?;
    debug!(kind = %K::kind(&()), name = %name, "Applied");
    Ok(())
}

/// Apply everything a RedisFailover owns.
///
/// Services and ConfigMaps come before the workloads that mount or resolve
/// them; the backup CronJobs come last.
pub async fn ensure_failover(client: &Client, namespace: &str, rf: &RedisFailover) -> Result<()> {
    apply(client, namespace, &services::generate_redis_service(rf)).await?;
    apply(client, namespace, &services::generate_sentinel_service(rf)).await?;
    apply(client, namespace, &services::generate_sentinel_headless_service(rf)).await?;

    apply(client, namespace, &configmaps::generate_sentinel_configmap(rf)).await?;
    apply(
        client,
        namespace,
        &configmaps::generate_sentinel_readiness_configmap(rf),
    )
    .await?;
    apply(client, namespace, &configmaps::generate_redis_configmap(rf)).await?;
    apply(
        client,
        namespace,
        &configmaps::generate_redis_shutdown_configmap(rf),
    )
    .await?;

    apply(client, namespace, &failover_pdb(rf, REDIS_COMPONENT)).await?;
    apply(client, namespace, &failover_pdb(rf, SENTINEL_COMPONENT)).await?;

    apply(client, namespace, &sentinel::generate_sentinel_deployment(rf)).await?;
    apply(client, namespace, &statefulset::generate_statefulset(rf)).await?;

    for cronjob in backup::generate_backup_cronjobs(rf) {
        apply(client, namespace, &cronjob).await?;
    }
    Ok(())
}

/// PodDisruptionBudget for the Redis or Sentinel pods of `rf`
pub fn failover_pdb(rf: &RedisFailover, component: &str) -> PodDisruptionBudget {
    let (name, replicas) = if component == SENTINEL_COMPONENT {
        (sentinel_name(rf), rf.spec.sentinel.replicas)
    } else {
        (redis_name(rf), rf.spec.redis.replicas)
    };
    pdb::generate_pod_disruption_budget(
        owned_metadata(rf, name, failover_component_labels(rf, component)),
        selector_labels(component, &rf.name_any()),
        replicas,
    )
}

/// Apply everything a RedisProxy owns.
pub async fn ensure_proxy(client: &Client, namespace: &str, rp: &RedisProxy) -> Result<()> {
    apply(client, namespace, &proxy::generate_proxy_configmap(rp)).await?;
    apply(client, namespace, &proxy::generate_proxy_service(rp)).await?;
    apply(client, namespace, &proxy::generate_proxy_nodeport_service(rp)).await?;
    apply(client, namespace, &proxy::generate_proxy_pdb(rp)).await?;
    apply(client, namespace, &proxy::generate_proxy_deployment(rp)).await?;
    Ok(())
}

/// Apply everything a RedisShake owns.
pub async fn ensure_shake(client: &Client, namespace: &str, rs: &RedisShake) -> Result<()> {
    apply(client, namespace, &shake::generate_shake_configmap(rs)).await?;
    apply(client, namespace, &shake::generate_shake_init_configmap(rs)).await?;
    apply(client, namespace, &shake::generate_shake_service(rs)).await?;
    apply(client, namespace, &shake::generate_shake_deployment(rs)).await?;
    Ok(())
}
