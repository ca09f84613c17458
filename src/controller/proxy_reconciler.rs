//! Reconciliation loop for RedisProxy.

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
use crate::controller::ensure::ensure_proxy;
use crate::controller::error::{Error, Result, WAITING_REQUEUE};
use crate::controller::status::ConditionHistory;
use crate::controller::validation::validate_proxy;
use crate::crd::{ProxyPhase, RedisProxy, RedisProxyStatus};
use crate::health::ResourceLabels;
use crate::resources::proxy::proxy_name;

/// Reconcile a RedisProxy
pub async fn reconcile(obj: Arc<RedisProxy>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    debug!(name = %name, namespace = %namespace, "Reconciling RedisProxy");

    let api: Api<RedisProxy> = Api::namespaced(ctx.client.clone(), &namespace);
    let previous = obj.status.clone().unwrap_or_default();
    let mut history = ConditionHistory::from_conditions(previous.conditions.clone());

    let spec = match validate_proxy(&name, &obj.spec) {
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
            let status = proxy_status(&obj, ProxyPhase::Fail, history, previous.ready_replicas);
            update_status(&api, &name, &status).await?;
            return Err(e);
        }
    };
    let mut rp = obj.as_ref().clone();
    rp.spec = spec;

    if let Err(e) = ensure_proxy(&ctx.client, &namespace, &rp).await {
        error!(name = %name, error = %e, "Failed to apply owned objects");
        ctx.publish_warning_event(obj.as_ref(), "EnsureError", "Ensure", Some(e.to_string()))
            .await;
        history.set_failed(&e.to_string());
        let status = proxy_status(&obj, ProxyPhase::Fail, history, previous.ready_replicas);
        update_status(&api, &name, &status).await?;
        return Err(e);
    }

    let counts = match deployment_counts(&ctx.client, &namespace, &proxy_name(&rp)).await {
        Ok(counts) => counts,
        Err(e) if e.is_not_found() => WorkloadCounts::default(),
        Err(e) => return Err(e),
    };

    let phase = proxy_phase(rp.spec.replicas, counts);
    match phase {
        ProxyPhase::Ready => {
            history.set_healthy("Proxy is ready");
        }
        ProxyPhase::Pending | ProxyPhase::Fail => {
            info!(
                name = %name,
                ready = counts.ready,
                desired = rp.spec.replicas,
                "Waiting for proxy pods"
            );
            history.set_waiting_pod(&format!(
                "{}/{} proxy pods ready",
                counts.ready, rp.spec.replicas
            ));
        }
    }
    if phase != previous.phase {
        ctx.publish_normal_event(
            obj.as_ref(),
            &phase.to_string(),
            "Reconciling",
            Some(format!("Proxy phase is {phase}")),
        )
        .await;
    }

    let status = proxy_status(&obj, phase, history, counts.ready);
    update_status(&api, &name, &status).await?;

    ctx.observe_reconcile(&ResourceLabels::new("RedisProxy", &namespace, &name), start_time);

    Ok(match phase {
        ProxyPhase::Ready => Action::requeue(Duration::from_secs(60)),
        ProxyPhase::Pending | ProxyPhase::Fail => Action::requeue(WAITING_REQUEUE),
    })
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<RedisProxy>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    ctx.observe_error(&ResourceLabels::new("RedisProxy", &namespace, &name));

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

/// Ready once every declared replica reports ready
pub fn proxy_phase(desired: i32, counts: WorkloadCounts) -> ProxyPhase {
    if desired > 0 && counts.ready >= desired {
        ProxyPhase::Ready
    } else {
        ProxyPhase::Pending
    }
}

fn proxy_status(
    rp: &RedisProxy,
    phase: ProxyPhase,
    history: ConditionHistory,
    ready_replicas: i32,
) -> RedisProxyStatus {
    RedisProxyStatus {
        phase,
        conditions: history.into_sorted_vec(),
        ready_replicas,
        observed_generation: rp.metadata.generation,
    }
}

async fn update_status(
    api: &Api<RedisProxy>,
    name: &str,
    status: &RedisProxyStatus,
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
