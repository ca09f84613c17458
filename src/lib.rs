//! redis-operator library crate
//!
//! This module exports the controllers, CRD definitions, resource generators
//! and the Redis client used by the failover check/heal pass.

pub mod client;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use health::HealthState;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::{self as kube_controller, Action, Config as ControllerConfig};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::context::Context;
use controller::error::Error;
use controller::{failover_reconciler, proxy_reconciler, shake_reconciler};
use crd::{FailoverPhase, ProxyPhase, RedisFailover, RedisProxy, RedisShake, ShakePhase};

/// Reconciliations each controller runs in parallel
pub const CONTROLLER_CONCURRENCY: u16 = 4;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all controllers.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

fn controller_config() -> ControllerConfig {
    ControllerConfig::default().concurrency(CONTROLLER_CONCURRENCY)
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// The stream is reflector-backed, retries with backoff and skips
/// status-only updates via the generation predicate. The returned store is
/// also read for the per-phase resource gauges.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Count cached objects per phase, listing every phase so gauges drop to zero.
pub fn count_by_phase<P: ToString>(
    all_phases: &[P],
    phases: impl Iterator<Item = P>,
) -> BTreeMap<String, i64> {
    let mut counts: BTreeMap<String, i64> =
        all_phases.iter().map(|p| (p.to_string(), 0)).collect();
    for phase in phases {
        *counts.entry(phase.to_string()).or_default() += 1;
    }
    counts
}

fn publish_phase_counts(
    health_state: Option<&Arc<HealthState>>,
    kind: &str,
    counts: BTreeMap<String, i64>,
) {
    if let Some(state) = health_state {
        for (phase, count) in counts {
            state.metrics.set_phase_count(kind, &phase, count);
        }
    }
}

/// Log one controller result; NotFound after deletion is expected noise.
fn log_result<K>(
    kind: &str,
    result: Result<(ObjectRef<K>, Action), kube_controller::Error<Error, watcher::Error>>,
) where
    K: Resource,
{
    match result {
        Ok((obj, _action)) => {
            debug!(kind = %kind, name = %obj.name, "Reconciled");
        }
        Err(e) => {
            let is_not_found = match &e {
                kube_controller::Error::ObjectNotFound(_) => true,
                kube_controller::Error::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!(kind = %kind, "Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!(kind = %kind, "Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Run the RedisFailover controller.
pub async fn run_failover_controller(ctx: Arc<Context>, namespace: Option<&str>) {
    let client = ctx.client.clone();
    let watcher_config = default_watcher_config();

    let failovers: Api<RedisFailover> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client.clone(), namespace);
    let pdbs: Api<PodDisruptionBudget> = scoped_api(client.clone(), namespace);
    let cronjobs: Api<CronJob> = scoped_api(client, namespace);

    let (reader, stream) = create_filtered_stream(failovers, watcher_config.clone());
    let store = reader.clone();
    let health_state = ctx.health_state.clone();

    // Workloads need full objects for their replica counts; the rest only
    // need to signal that something changed.
    Controller::for_stream(stream, reader)
        .with_config(controller_config())
        .owns(statefulsets, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(pdbs, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(cronjobs, watcher_config).touched_objects())
        .run(
            failover_reconciler::reconcile,
            failover_reconciler::error_policy,
            ctx,
        )
        .for_each(|result| {
            log_result("RedisFailover", result);
            let phases = store
                .state()
                .iter()
                .map(|rf| rf.status.as_ref().map(|s| s.phase).unwrap_or_default())
                .collect::<Vec<_>>();
            publish_phase_counts(
                health_state.as_ref(),
                "RedisFailover",
                count_by_phase(
                    &[
                        FailoverPhase::Creating,
                        FailoverPhase::Pending,
                        FailoverPhase::Fail,
                        FailoverPhase::Ready,
                        FailoverPhase::WaitingPodReady,
                    ],
                    phases.into_iter(),
                ),
            );
            futures::future::ready(())
        })
        .await;

    error!("RedisFailover controller stream ended unexpectedly");
}

/// Run the RedisProxy controller.
pub async fn run_proxy_controller(ctx: Arc<Context>, namespace: Option<&str>) {
    let client = ctx.client.clone();
    let watcher_config = default_watcher_config();

    let proxies: Api<RedisProxy> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client, namespace);

    let (reader, stream) = create_filtered_stream(proxies, watcher_config.clone());
    let store = reader.clone();
    let health_state = ctx.health_state.clone();

    Controller::for_stream(stream, reader)
        .with_config(controller_config())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(configmaps, watcher_config).touched_objects())
        .run(proxy_reconciler::reconcile, proxy_reconciler::error_policy, ctx)
        .for_each(|result| {
            log_result("RedisProxy", result);
            let phases = store
                .state()
                .iter()
                .map(|rp| rp.status.as_ref().map(|s| s.phase).unwrap_or_default())
                .collect::<Vec<_>>();
            publish_phase_counts(
                health_state.as_ref(),
                "RedisProxy",
                count_by_phase(
                    &[ProxyPhase::Pending, ProxyPhase::Ready, ProxyPhase::Fail],
                    phases.into_iter(),
                ),
            );
            futures::future::ready(())
        })
        .await;

    error!("RedisProxy controller stream ended unexpectedly");
}

/// Run the RedisShake controller.
pub async fn run_shake_controller(ctx: Arc<Context>, namespace: Option<&str>) {
    let client = ctx.client.clone();
    let watcher_config = default_watcher_config();

    let shakes: Api<RedisShake> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let configmaps: Api<ConfigMap> = scoped_api(client, namespace);

    let (reader, stream) = create_filtered_stream(shakes, watcher_config.clone());
    let store = reader.clone();
    let health_state = ctx.health_state.clone();

    Controller::for_stream(stream, reader)
        .with_config(controller_config())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(configmaps, watcher_config).touched_objects())
        .run(shake_reconciler::reconcile, shake_reconciler::error_policy, ctx)
        .for_each(|result| {
            log_result("RedisShake", result);
            let phases = store
                .state()
                .iter()
                .map(|rs| rs.status.as_ref().map(|s| s.phase).unwrap_or_default())
                .collect::<Vec<_>>();
            publish_phase_counts(
                health_state.as_ref(),
                "RedisShake",
                count_by_phase(
                    &[ShakePhase::Pending, ShakePhase::Running, ShakePhase::Fail],
                    phases.into_iter(),
                ),
            );
            futures::future::ready(())
        })
        .await;

    error!("RedisShake controller stream ended unexpectedly");
}

/// Run the RedisFailover, RedisProxy and RedisShake controllers until one
/// of their streams ends. `None` watches every namespace.
pub async fn run_controller_scoped(
    client: Client,
    health_state: Option<Arc<HealthState>>,
    namespace: Option<&str>,
) {
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting controllers"
    );

    if let Some(state) = &health_state {
        state.set_ready(true);
    }

    let ctx = Arc::new(Context::new(client, health_state));

    futures::join!(
        run_failover_controller(ctx.clone(), namespace),
        run_proxy_controller(ctx.clone(), namespace),
        run_shake_controller(ctx, namespace),
    );
}
