//! Corrective actions for a RedisFailover.
//!
//! Each action targets one verdict and is safe to run again after the
//! condition has already cleared. Actions do not re-check; the orchestrator
//! re-verifies after each one.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, instrument, warn};

use crate::client::{AuthConfig, NodeOps};
use crate::controller::cluster_view::PodInfo;
use crate::controller::error::{Error, Result};
use crate::controller::failover_inspector::oldest_first;

/// One corrective action taken during a pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealAction {
    Promote { node: String },
    Repoint { node: String, master: String },
    ReconfigureMonitor {
        arbiter: String,
        master: String,
        quorum: u32,
    },
    ResetView { arbiter: String },
    PushConfig { node: String, keys: usize },
    PushArbiterConfig { arbiter: String, keys: usize },
}

impl HealAction {
    /// Short name used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            HealAction::Promote { .. } => "promote",
            HealAction::Repoint { .. } => "repoint",
            HealAction::ReconfigureMonitor { .. } => "reconfigure_monitor",
            HealAction::ResetView { .. } => "reset_view",
            HealAction::PushConfig { .. } => "push_config",
            HealAction::PushArbiterConfig { .. } => "push_arbiter_config",
        }
    }
}

impl fmt::Display for HealAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealAction::Promote { node } => write!(f, "promoted {node} to master"),
            HealAction::Repoint { node, master } => write!(f, "pointed {node} at {master}"),
            HealAction::ReconfigureMonitor {
                arbiter,
                master,
                quorum,
            } => write!(f, "sentinel {arbiter} now monitors {master} (quorum {quorum})"),
            HealAction::ResetView { arbiter } => write!(f, "reset sentinel {arbiter}"),
            HealAction::PushConfig { node, keys } => {
                write!(f, "pushed {keys} config keys to {node}")
            }
            HealAction::PushArbiterConfig { arbiter, keys } => {
                write!(f, "pushed {keys} config keys to sentinel {arbiter}")
            }
        }
    }
}

/// Sentinels that must agree a master is down: `floor(n/2) + 1`.
///
/// ```
/// use redis_operator::controller::failover_healer::quorum;
///
/// assert_eq!(quorum(3), 2);
/// assert_eq!(quorum(5), 3);
/// ```
pub fn quorum(sentinels: i32) -> u32 {
    u32::try_from(sentinels.max(0) / 2 + 1).unwrap_or(1)
}

/// `SLAVEOF NO ONE` on one node.
#[instrument(skip(ops, auth))]
pub async fn promote_to_master<N: NodeOps>(
    ops: &N,
    ip: &str,
    auth: &AuthConfig,
) -> Result<HealAction> {
    ops.promote(ip, auth)
        .await
        .map_err(|e| Error::from_node(ip, e))?;
    info!(node = %ip, "Promoted node to master");
    Ok(HealAction::Promote {
        node: ip.to_string(),
    })
}

/// Promote the longest-running node and point every other node at it.
///
/// Returns the new master and the actions taken.
pub async fn elect_oldest_as_master<N: NodeOps>(
    ops: &N,
    nodes: &[PodInfo],
    auth: &AuthConfig,
) -> Result<(String, Vec<HealAction>)> {
    let sorted = oldest_first(nodes);
    let oldest = sorted
        .first()
        .ok_or_else(|| Error::NotFound("running redis pods".to_string()))?;
    let master = oldest.ip.clone();

    let mut actions = vec![promote_to_master(ops, &master, auth).await?];
    for node in sorted.iter().skip(1) {
        actions.push(repoint(ops, &node.ip, &master, auth).await?);
    }
    Ok((master, actions))
}

#[instrument(skip(ops, auth))]
async fn repoint<N: NodeOps>(
    ops: &N,
    ip: &str,
    master: &str,
    auth: &AuthConfig,
) -> Result<HealAction> {
    ops.replicate_of(ip, master, auth)
        .await
        .map_err(|e| Error::from_node(ip, e))?;
    info!(node = %ip, master = %master, "Pointed node at master");
    Ok(HealAction::Repoint {
        node: ip.to_string(),
        master: master.to_string(),
    })
}

/// Point every node except `master` at `master`.
pub async fn repoint_all_to_master<N: NodeOps>(
    ops: &N,
    master: &str,
    nodes: &[PodInfo],
    auth: &AuthConfig,
) -> Result<Vec<HealAction>> {
    let mut actions = Vec::new();
    for node in nodes.iter().filter(|n| n.ip != master) {
        actions.push(repoint(ops, &node.ip, master, auth).await?);
    }
    Ok(actions)
}

/// Re-register `master` on one sentinel with the quorum for `sentinels`.
#[instrument(skip(ops, auth))]
pub async fn reconfigure_arbiter_monitor<N: NodeOps>(
    ops: &N,
    arbiter: &str,
    master: &str,
    sentinels: i32,
    auth: &AuthConfig,
) -> Result<HealAction> {
    let quorum = quorum(sentinels);
    ops.sentinel_monitor(arbiter, master, quorum, auth)
        .await
        .map_err(|e| Error::from_node(arbiter, e))?;
    info!(arbiter = %arbiter, master = %master, quorum, "Reconfigured sentinel monitor");
    Ok(HealAction::ReconfigureMonitor {
        arbiter: arbiter.to_string(),
        master: master.to_string(),
        quorum,
    })
}

/// `SENTINEL RESET *`. The sentinel rebuilds its view asynchronously.
#[instrument(skip(ops, auth))]
pub async fn reset_arbiter_view<N: NodeOps>(
    ops: &N,
    arbiter: &str,
    auth: &AuthConfig,
) -> Result<HealAction> {
    ops.sentinel_reset(arbiter, auth)
        .await
        .map_err(|e| Error::from_node(arbiter, e))?;
    info!(arbiter = %arbiter, "Reset sentinel view");
    Ok(HealAction::ResetView {
        arbiter: arbiter.to_string(),
    })
}

/// Apply the declared overrides, then the password, to one data node.
///
/// Returns `None` when there is nothing to push.
#[instrument(skip(ops, overrides, auth))]
pub async fn push_custom_config<N: NodeOps>(
    ops: &N,
    ip: &str,
    overrides: &BTreeMap<String, String>,
    auth: &AuthConfig,
) -> Result<Option<HealAction>> {
    let password = auth.password();
    if overrides.is_empty() && password.is_none() {
        return Ok(None);
    }

    let mut keys = 0;
    for (key, value) in overrides {
        ops.config_set(ip, key, value, auth)
            .await
            .map_err(|e| Error::from_node(ip, e))?;
        keys += 1;
    }
    if let Some(password) = password {
        for key in ["masterauth", "requirepass"] {
            ops.config_set(ip, key, password, auth)
                .await
                .map_err(|e| Error::from_node(ip, e))?;
            keys += 1;
        }
    }

    info!(node = %ip, keys, "Pushed custom config");
    Ok(Some(HealAction::PushConfig {
        node: ip.to_string(),
        keys,
    }))
}

/// `SENTINEL SET mymaster <key> <value>` for each pair.
#[instrument(skip(ops, pairs, auth))]
pub async fn push_arbiter_config<N: NodeOps>(
    ops: &N,
    arbiter: &str,
    pairs: &[(String, String)],
    auth: &AuthConfig,
) -> Result<Option<HealAction>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    for (key, value) in pairs {
        if let Err(e) = ops.sentinel_set(arbiter, key, value, auth).await {
            warn!(arbiter = %arbiter, key = %key, error = %e, "SENTINEL SET failed");
            return Err(Error::from_node(arbiter, e));
        }
    }
    Ok(Some(HealAction::PushArbiterConfig {
        arbiter: arbiter.to_string(),
        keys: pairs.len(),
    }))
}
