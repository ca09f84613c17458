//! redis-operator - A Kubernetes operator for Redis sentinel failover,
//! predixy proxies and redis-shake migrations.
//!
//! Startup order: logging, Kubernetes client, probe server, leader lease,
//! then the three controllers. Losing the lease exits the process so the
//! pod restarts and rejoins the election.

#![recursion_limit = "256"]

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use redis_operator::health::{HealthState, run_health_server};
use redis_operator::run_controller_scoped;

const LEASE_NAME: &str = "redis-operator-leader";
const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Time given to in-flight passes after readiness drops
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Identity and watch scope taken from the pod environment.
struct OperatorEnv {
    pod_name: String,
    pod_namespace: String,
    /// `None` watches every namespace
    watch_namespace: Option<String>,
}

impl OperatorEnv {
    fn from_env() -> Self {
        let pod_name = env_or("POD_NAME", || {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "redis-operator".to_string())
        });
        let pod_namespace = env_or("POD_NAMESPACE", || "default".to_string());
        let watch_namespace = std::env::var("WATCH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());
        Self {
            pod_name,
            pod_namespace,
            watch_namespace,
        }
    }

    fn lease(&self, client: Client) -> LeaseLock {
        LeaseLock::new(
            client,
            &self.pod_namespace,
            LeaseLockParams {
                holder_id: self.pod_name.clone(),
                lease_name: LEASE_NAME.to_string(),
                lease_ttl: LEASE_TTL,
            },
        )
    }
}

fn env_or(key: &str, fallback: impl FnOnce() -> String) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => {
            let value = fallback();
            warn!(variable = key, fallback = %value, "Environment variable not set");
            value
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("redis_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting redis-operator");

    let client = Client::try_default().await?;
    let env = OperatorEnv::from_env();
    info!(
        holder_id = %env.pod_name,
        lease_namespace = %env.pod_namespace,
        watch_namespace = ?env.watch_namespace,
        "Connected to Kubernetes"
    );

    let health_state = Arc::new(HealthState::new());

    // Liveness must answer while this replica is still a follower
    let mut probe_server = tokio::spawn(run_health_server(health_state.clone()));

    let lease = Arc::new(env.lease(client.clone()));
    wait_for_leadership(&lease).await;
    let mut lease_keeper = tokio::spawn(keep_leadership(lease));

    let mut controllers = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            run_controller_scoped(client, Some(health_state), env.watch_namespace.as_deref())
                .await;
        })
    };

    tokio::select! {
        joined = &mut controllers => {
            if let Err(e) = joined {
                error!(error = %e, "Controller task aborted");
            }
        }
        joined = &mut probe_server => match joined {
            Ok(Err(e)) => error!(error = %e, "Probe server stopped"),
            Err(e) => error!(error = %e, "Probe server task aborted"),
            Ok(Ok(())) => warn!("Probe server exited"),
        },
        joined = &mut lease_keeper => {
            if let Err(e) = joined {
                error!(error = %e, "Lease renewal task aborted");
            }
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            health_state.set_ready(false);
            info!(
                grace_period_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "Readiness dropped, draining in-flight reconciliations"
            );
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Poll the lease until this replica holds it.
async fn wait_for_leadership(lease: &LeaseLock) {
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!(lease = LEASE_NAME, "Leadership acquired");
                return;
            }
            Ok(_) => info!(lease = LEASE_NAME, "Standing by, another replica leads"),
            Err(e) => warn!(error = %e, "Lease acquisition failed, retrying"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever; any failure ends the process.
#[allow(clippy::exit)]
async fn keep_leadership(lease: Arc<LeaseLock>) {
    let mut ticker = tokio::time::interval(LEASE_RENEW_INTERVAL);
    // The first tick fires immediately and the lease was just taken
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!(lease = LEASE_NAME, "Leadership lost, exiting");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Lease renewal failed, exiting");
                std::process::exit(1);
            }
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
///
/// Without the handlers the operator cannot drain, so failing to install
/// them is fatal.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }
}
