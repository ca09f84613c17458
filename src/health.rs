//! Probe and metrics server.
//!
//! `/healthz` answers as long as the process serves HTTP, `/readyz` only
//! while this replica holds the lease and runs the controllers, and
//! `/metrics` exposes the operator registry in the Prometheus text format.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use axum::{Router, extract::State, http::StatusCode, http::header, routing::get};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tracing::{error, info};

/// Port the probe server listens on
pub const HEALTH_PORT: u16 = 8080;

const METRICS_PREFIX: &str = "redis_operator";
const OPENMETRICS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Identifies one custom resource.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceLabels {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub kind: String,
    pub phase: String,
}

/// One corrective command issued against a RedisFailover.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealActionLabels {
    pub namespace: String,
    pub name: String,
    pub action: String,
}

/// Operator metrics, all registered under the `redis_operator_` prefix.
pub struct Metrics {
    reconciliations: Family<ResourceLabels, Counter>,
    reconciliation_errors: Family<ResourceLabels, Counter>,
    reconcile_duration: Family<ResourceLabels, Histogram>,
    resources: Family<PhaseLabels, Gauge>,
    heal_actions: Family<HealActionLabels, Counter>,
    redis_replicas_desired: Family<ResourceLabels, Gauge>,
    redis_replicas_ready: Family<ResourceLabels, Gauge>,
    cluster_ok: Family<ResourceLabels, Gauge>,
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRICS_PREFIX);

        let reconciliations = Family::default();
        registry.register(
            "reconciliations",
            "Reconcile passes that completed",
            reconciliations.clone(),
        );
        let reconciliation_errors = Family::default();
        registry.register(
            "reconciliation_errors",
            "Reconcile passes that returned an error",
            reconciliation_errors.clone(),
        );
        // 5ms up to roughly 80s; a check/heal pass may wait on sentinel resets
        let reconcile_duration = Family::<ResourceLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.005, 2.0, 15))
        });
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of one reconcile pass",
            reconcile_duration.clone(),
        );
        let resources = Family::default();
        registry.register(
            "resources",
            "Custom resources per kind and phase",
            resources.clone(),
        );
        let heal_actions = Family::default();
        registry.register(
            "heal_actions",
            "Corrective commands sent to Redis and Sentinel nodes",
            heal_actions.clone(),
        );
        let redis_replicas_desired = Family::default();
        registry.register(
            "redis_replicas_desired",
            "Redis data pods requested by a RedisFailover",
            redis_replicas_desired.clone(),
        );
        let redis_replicas_ready = Family::default();
        registry.register(
            "redis_replicas_ready",
            "Redis data pods reporting ready",
            redis_replicas_ready.clone(),
        );
        let cluster_ok = Family::default();
        registry.register(
            "cluster_ok",
            "1 when the last check/heal pass found a single master with consistent sentinels",
            cluster_ok.clone(),
        );

        Self {
            reconciliations,
            reconciliation_errors,
            reconcile_duration,
            resources,
            heal_actions,
            redis_replicas_desired,
            redis_replicas_ready,
            cluster_ok,
            registry,
        }
    }

    /// Count a finished pass and observe its duration.
    pub fn observe_reconcile(&self, labels: &ResourceLabels, started: Instant) {
        self.reconciliations.get_or_create(labels).inc();
        self.reconcile_duration
            .get_or_create(labels)
            .observe(started.elapsed().as_secs_f64());
    }

    pub fn observe_error(&self, labels: &ResourceLabels) {
        self.reconciliation_errors.get_or_create(labels).inc();
    }

    pub fn observe_heal_action(&self, namespace: &str, name: &str, action: &str) {
        self.heal_actions
            .get_or_create(&HealActionLabels {
                namespace: namespace.to_string(),
                name: name.to_string(),
                action: action.to_string(),
            })
            .inc();
    }

    pub fn set_phase_count(&self, kind: &str, phase: &str, count: i64) {
        self.resources
            .get_or_create(&PhaseLabels {
                kind: kind.to_string(),
                phase: phase.to_string(),
            })
            .set(count);
    }

    pub fn set_redis_replicas(&self, labels: &ResourceLabels, desired: i32, ready: i32) {
        self.redis_replicas_desired
            .get_or_create(labels)
            .set(i64::from(desired));
        self.redis_replicas_ready
            .get_or_create(labels)
            .set(i64::from(ready));
    }

    pub fn set_cluster_ok(&self, labels: &ResourceLabels, ok: bool) {
        self.cluster_ok.get_or_create(labels).set(i64::from(ok));
    }

    /// Render the registry; an encoder failure yields an empty body.
    pub fn render(&self) -> String {
        let mut body = String::new();
        if let Err(e) = encode(&mut body, &self.registry) {
            error!(error = %e, "Failed to encode metrics");
            body.clear();
        }
        body
    }
}

/// State shared between the controllers and the probe server.
#[derive(Default)]
pub struct HealthState {
    ready: AtomicBool,
    last_reconcile: AtomicI64,
    pub metrics: Metrics,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Record that some controller just finished a pass.
    pub fn touch(&self) {
        self.last_reconcile
            .store(jiff::Timestamp::now().as_second(), Ordering::Relaxed);
    }

    /// Unix seconds of the last finished pass, zero before the first one.
    pub fn last_reconcile(&self) -> i64 {
        self.last_reconcile.load(Ordering::Relaxed)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn metrics(
    State(state): State<Arc<HealthState>>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    ([(header::CONTENT_TYPE, OPENMETRICS_TEXT)], state.metrics.render())
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve probes and metrics on all interfaces until the listener fails.
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], HEALTH_PORT));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Probe server listening");
    axum::serve(listener, create_router(state)).await
}
