//! Reconciliation loop for RedisFailover.
//!
//! One pass validates the spec, applies the owned objects, resolves the
//! Redis password and runs the check/heal pass against the live topology.
//! The outcome is written back as status, events and metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::client::AuthConfig;
use crate::controller::cluster_view::{ClusterView, KubeClusterView, WorkloadCounts};
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::ensure::ensure_failover;
use crate::controller::error::{Error, Result, WAITING_REQUEUE};
use crate::controller::failover_orchestrator::{HealOutcome, HealReport, check_and_heal};
use crate::controller::failover_state_machine::HealStage;
use crate::controller::status::ConditionHistory;
use crate::controller::validation::validate_failover;
use crate::crd::{
    AUTH_SECRET_KEY, FailoverPhase, MASTER_GROUP, MasterStatus, RedisFailover, RedisFailoverStatus,
    RedisStatusInstance, RedisStatusInstanceRedis, RedisStatusInstanceSentinel, SENTINEL_PORT,
};
use crate::health::ResourceLabels;
use crate::resources::common::sentinel_name;

/// Requeue interval once the topology is healthy
pub const HEALTHY_REQUEUE: Duration = Duration::from_secs(60);

/// Reconcile a RedisFailover
pub async fn reconcile(obj: Arc<RedisFailover>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisFailover");

    let api: Api<RedisFailover> = Api::namespaced(ctx.client.clone(), &namespace);
    let labels = ResourceLabels::new("RedisFailover", &namespace, &name);
    let previous = obj.status.clone().unwrap_or_default();
    let mut history = ConditionHistory::from_conditions(previous.conditions.clone());

    let spec = match validate_failover(&name, &obj.spec) {
        Ok(spec) => spec,
        Err(e) => {
            error!(name = %name, error = %e, "Validation failed");
            ctx.publish_warning_event(obj.as_ref(), "Validate", "Validating", Some(e.to_string()))
                .await;
            history.set_failed(&e.to_string());
            let status = StatusBuilder::new(&obj, &previous, history)
                .phase(FailoverPhase::Fail, e.to_string())
                .build();
            update_status(&api, &name, &status).await?;
            return Err(e);
        }
    };
    let mut rf = obj.as_ref().clone();
    rf.spec = spec;

    if obj.status.is_none() {
        info!(name = %name, "Creating owned objects");
        ctx.publish_normal_event(
            obj.as_ref(),
            "Creating",
            "Ensure",
            Some("Creating owned objects".to_string()),
        )
        .await;
        history.set_creating("Creating owned objects");
    } else if previous.observed_generation != obj.metadata.generation {
        info!(name = %name, "Applying spec change");
        history.set_updating("Applying spec change");
    }

    if let Err(e) = ensure_failover(&ctx.client, &namespace, &rf).await {
        error!(name = %name, error = %e, "Failed to apply owned objects");
        ctx.publish_warning_event(obj.as_ref(), "EnsureError", "Ensure", Some(e.to_string()))
            .await;
        history.set_failed(&e.to_string());
        let status = StatusBuilder::new(&obj, &previous, history)
            .phase(FailoverPhase::Fail, e.to_string())
            .build();
        update_status(&api, &name, &status).await?;
        return Err(e);
    }

    let auth = resolve_auth(&ctx, &namespace, &rf.spec.auth.secret_path).await?;
    let view = KubeClusterView::new(ctx.client.clone(), &namespace, &name);
    let outcome = check_and_heal(&rf.spec, &view, &ctx.node_ops, &auth, &ctx.tuning).await;

    // Counts are informational; a workload that vanished mid-pass reads as zero.
    let redis_counts = view.redis_counts().await.unwrap_or_default();
    let sentinel_counts = view.sentinel_counts().await.unwrap_or_default();
    let sentinel_ip = sentinel_cluster_ip(&ctx, &namespace, &rf).await;

    if let Some(ref health_state) = ctx.health_state {
        health_state
            .metrics
            .set_redis_replicas(&labels, redis_counts.desired, redis_counts.ready);
        health_state
            .metrics
            .set_cluster_ok(&labels, matches!(outcome, Ok(HealOutcome::Ready { .. })));
    }

    let was_waiting = history.is_last_waiting_pod_ready();
    let builder = StatusBuilder::new(&obj, &previous, history);
    let builder = builder.instance(&rf, redis_counts, sentinel_counts, sentinel_ip);

    let phase = outcome_phase(&outcome);
    let action = match outcome {
        Ok(HealOutcome::Ready { master, report }) => {
            record_heal_actions(&ctx, obj.as_ref(), &namespace, &report).await;
            if was_waiting {
                ctx.publish_normal_event(
                    obj.as_ref(),
                    "PodsReady",
                    "CheckAndHeal",
                    Some("All pods ready, cluster formed".to_string()),
                )
                .await;
            }
            ctx.publish_normal_event(
                obj.as_ref(),
                "Healthy",
                "CheckAndHeal",
                Some("Cluster is healthy".to_string()),
            )
            .await;
            let status = builder
                .condition(|h| h.set_healthy("Cluster is healthy"))
                .phase(phase, "Cluster is healthy".to_string())
                .master(MasterStatus::Ok, master)
                .build();
            update_status(&api, &name, &status).await?;

            if sentinel_counts.ready < rf.spec.sentinel.replicas {
                Action::requeue(WAITING_REQUEUE)
            } else {
                Action::requeue(HEALTHY_REQUEUE)
            }
        }
        Ok(HealOutcome::Waiting { reason, report }) => {
            record_heal_actions(&ctx, obj.as_ref(), &namespace, &report).await;
            info!(name = %name, reason = %reason, "Waiting for pods");
            ctx.publish_normal_event(
                obj.as_ref(),
                "WaitPodReady",
                "CheckAndHeal",
                Some(reason.clone()),
            )
            .await;
            let status = builder
                .condition(|h| h.set_waiting_pod(&reason))
                .phase(phase, reason)
                .build();
            update_status(&api, &name, &status).await?;
            Action::requeue(WAITING_REQUEUE)
        }
        Err(e) => {
            error!(name = %name, error = %e, "Check and heal failed");
            ctx.publish_warning_event(
                obj.as_ref(),
                "CheckAndHealError",
                "CheckAndHeal",
                Some(e.to_string()),
            )
            .await;
            let status = builder
                .condition(|h| h.set_failed(&e.to_string()))
                .phase(phase, e.to_string())
                .build();
            update_status(&api, &name, &status).await?;
            return Err(e);
        }
    };

    ctx.observe_reconcile(&labels, start_time);

    Ok(action)
}

/// Phase for the stage a check/heal pass ended in.
fn outcome_phase(outcome: &Result<HealOutcome>) -> FailoverPhase {
    match outcome {
        Ok(outcome) => outcome.stage().phase(),
        Err(_) => HealStage::Failed.phase(),
    }
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<RedisFailover>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    ctx.observe_error(&ResourceLabels::new("RedisFailover", &namespace, &name));

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
        Action::requeue(error.requeue_after())
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(Duration::from_secs(300))
    }
}

/// Resolve the Redis password; an empty secret name means no auth.
async fn resolve_auth(ctx: &Context, namespace: &str, secret_name: &str) -> Result<AuthConfig> {
    if secret_name.is_empty() {
        return Ok(AuthConfig::none());
    }
    let password = get_auth_password(ctx, namespace, secret_name, AUTH_SECRET_KEY).await?;
    Ok(password.map_or_else(AuthConfig::none, AuthConfig::with_password))
}

/// Retrieve password from the auth secret
async fn get_auth_password(
    ctx: &Context,
    namespace: &str,
    secret_name: &str,
    secret_key: &str,
) -> Result<Option<String>> {
    let secret_api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);

    match secret_api.get(secret_name).await {
        Ok(secret) => {
            let bytes = secret.data.as_ref().and_then(|data| data.get(secret_key));
            match bytes {
                Some(bytes) => {
                    let password = String::from_utf8(bytes.0.clone()).map_err(|e| {
                        Error::Validation(format!("Invalid password encoding: {e}"))
                    })?;
                    Ok(Some(password))
                }
                None => {
                    warn!(
                        secret = %secret_name,
                        key = %secret_key,
                        "Password key not found in secret"
                    );
                    Ok(None)
                }
            }
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            warn!(secret = %secret_name, "Auth secret not found");
            Ok(None)
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

/// ClusterIP of the Sentinel service, empty until assigned
async fn sentinel_cluster_ip(ctx: &Context, namespace: &str, rf: &RedisFailover) -> String {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    match api.get_opt(&sentinel_name(rf)).await {
        Ok(service) => service
            .and_then(|s| s.spec)
            .and_then(|s| s.cluster_ip)
            .unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "Failed to read sentinel service");
            String::new()
        }
    }
}

async fn record_heal_actions(
    ctx: &Context,
    rf: &RedisFailover,
    namespace: &str,
    report: &HealReport,
) {
    if !report.healed() {
        return;
    }
    let name = rf.name_any();
    if let Some(ref health_state) = ctx.health_state {
        for action in &report.actions {
            health_state
                .metrics
                .observe_heal_action(namespace, &name, action.kind());
        }
    }
    let note = report
        .actions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    info!(name = %name, actions = %note, "Healed topology");
    ctx.publish_normal_event(rf, "Healed", "CheckAndHeal", Some(note))
        .await;
}

/// Assembles a status from the previous one and this pass's observations.
///
/// Fields not touched by the pass carry over, so a failed pass keeps the
/// last known master address.
pub struct StatusBuilder {
    status: RedisFailoverStatus,
    history: ConditionHistory,
}

impl StatusBuilder {
    pub fn new(
        rf: &RedisFailover,
        previous: &RedisFailoverStatus,
        history: ConditionHistory,
    ) -> Self {
        let mut status = previous.clone();
        status.observed_generation = rf.metadata.generation;
        status.master.name = MASTER_GROUP.to_string();
        status.master.status = MasterStatus::Down;
        Self { status, history }
    }

    pub fn phase(mut self, phase: FailoverPhase, message: String) -> Self {
        self.status.phase = phase;
        self.status.message = message;
        self
    }

    pub fn condition(
        mut self,
        update: impl FnOnce(&mut ConditionHistory) -> &mut ConditionHistory,
    ) -> Self {
        update(&mut self.history);
        self
    }

    pub fn master(mut self, status: MasterStatus, address: String) -> Self {
        self.status.master.status = status;
        self.status.master.address = address;
        self
    }

    pub fn instance(
        mut self,
        rf: &RedisFailover,
        redis: WorkloadCounts,
        sentinel: WorkloadCounts,
        sentinel_ip: String,
    ) -> Self {
        self.status.instance = RedisStatusInstance {
            redis: RedisStatusInstanceRedis {
                size: rf.spec.redis.replicas,
                ready: redis.ready,
            },
            sentinel: RedisStatusInstanceSentinel {
                size: rf.spec.sentinel.replicas,
                ready: sentinel.ready,
                service: sentinel_name(rf),
                cluster_ip: sentinel_ip,
                port: SENTINEL_PORT.to_string(),
            },
        };
        self
    }

    pub fn build(self) -> RedisFailoverStatus {
        RedisFailoverStatus {
            conditions: self.history.into_sorted_vec(),
            ..self.status
        }
    }
}

/// Update the status of a RedisFailover
async fn update_status(
    api: &Api<RedisFailover>,
    name: &str,
    status: &RedisFailoverStatus,
) -> Result<()> {
    let patch = serde_json::json!({
        "status": status
    });

    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}
