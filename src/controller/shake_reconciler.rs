//! Reconciliation loop for RedisShake.
//!
//! The operator only runs redis-shake; migration progress is exported by
//! redis-shake itself on the metrics port.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::Action,
};
use tracing::{debug, error, info, warn};

use crate::controller::cluster_view::{WorkloadCounts, deployment_counts};
use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::ensure::ensure_shake;
use crate::controller::error::{Error, Result, WAITING_REQUEUE};
use crate::controller::status::ConditionHistory;
use crate::controller::validation::validate_shake;
use crate::crd::{RedisShake, RedisShakeStatus, ShakePhase};
use crate::health::ResourceLabels;
use crate::resources::shake::shake_name;

/// Reconcile a RedisShake
pub async fn reconcile(obj: Arc<RedisShake>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisShake");

    let api: Api<RedisShake> = Api::namespaced(ctx.client.clone(), &namespace);
    let previous = obj.status.clone().unwrap_or_default();
    let mut history = ConditionHistory::from_conditions(previous.conditions.clone());

    let spec = match validate_shake(&name, &obj.spec) {
        Ok(spec) => spec,
        Err(e) => {
            error!(name = %name, error = %e, "Validation failed");
            ctx.publish_warning_event(
                obj.as_ref(),
                "Validate",
                "Validating",
                Some(e.to_string()),
            )
            .await;
            history.set_failed(&e.to_string());
            let status = shake_status(&obj, ShakePhase::Fail, e.to_string(), history);
            update_status(&api, &name, &status).await?;
            return Err(e);
        }
    };
    let mut rs = obj.as_ref().clone();
    rs.spec = spec;

    if obj.status.is_none() {
        history.set_creating("Creating redis-shake");
    }

    if let Err(e) = ensure_shake(&ctx.client, &namespace, &rs).await {
        error!(name = %name, error = %e, "Failed to apply owned objects");
        ctx.publish_warning_event(obj.as_ref(), "EnsureError", "Ensure", Some(e.to_string()))
            .await;
        history.set_failed(&e.to_string());
        let status = shake_status(&obj, ShakePhase::Fail, e.to_string(), history);
        update_status(&api, &name, &status).await?;
        return Err(e);
    }

    let counts = match deployment_counts(&ctx.client, &namespace, &shake_name(&rs)).await {
        Ok(counts) => counts,
        Err(e) if e.is_not_found() => WorkloadCounts::default(),
        Err(e) => return Err(e),
    };

    let phase = shake_phase(rs.spec.replicas, counts);
    let message = match phase {
        ShakePhase::Running => {
            let message = format!("redis-shake {} is running", rs.spec.model_type);
            history.set_healthy(&message);
            message
        }
        ShakePhase::Pending | ShakePhase::Fail => {
            let message = format!(
                "{}/{} redis-shake pods ready",
                counts.ready, rs.spec.replicas
            );
            info!(name = %name, "Waiting for redis-shake pods");
            history.set_waiting_pod(&message);
            message
        }
    };
    if phase != previous.phase {
        ctx.publish_normal_event(
            obj.as_ref(),
            &phase.to_string(),
            "Reconciling",
            Some(message.clone()),
        )
        .await;
    }

    let status = shake_status(&obj, phase, message, history);
    update_status(&api, &name, &status).await?;

    ctx.observe_reconcile(&ResourceLabels::new("RedisShake", &namespace, &name), start_time);

    Ok(match phase {
        ShakePhase::Running => Action::requeue(Duration::from_secs(60)),
        ShakePhase::Pending | ShakePhase::Fail => Action::requeue(WAITING_REQUEUE),
    })
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<RedisShake>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    ctx.observe_error(&ResourceLabels::new("RedisShake", &namespace, &name));

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

pub fn shake_phase(desired: i32, counts: WorkloadCounts) -> ShakePhase {
    if desired > 0 && counts.ready >= desired {
        ShakePhase::Running
    } else {
        ShakePhase::Pending
    }
}

fn shake_status(
    rs: &RedisShake,
    phase: ShakePhase,
    message: String,
    history: ConditionHistory,
) -> RedisShakeStatus {
    RedisShakeStatus {
        phase,
        message,
        conditions: history.into_sorted_vec(),
        observed_generation: rs.metadata.generation,
    }
}

async fn update_status(
    api: &Api<RedisShake>,
    name: &str,
    status: &RedisShakeStatus,
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
