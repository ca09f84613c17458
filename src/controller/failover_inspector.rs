//! Topology inspection for a RedisFailover.
//!
//! Turns pod state from a [`ClusterView`] and node replies from [`NodeOps`]
//! into the snapshot the checker works on. Nothing here mutates anything.

use std::time::Duration;

use jiff::Timestamp;
use tracing::{debug, instrument};

use crate::client::{ArbiterView, AuthConfig, NodeOps, RoleInfo};
use crate::controller::cluster_view::{ClusterView, PodInfo};
use crate::controller::error::{Error, Result};

/// Role reported by one data node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRole {
    pub ip: String,
    pub role: RoleInfo,
}

/// What one pass observed before healing. Rebuilt from scratch every pass.
///
/// The master is not stored: it is derived from `roles` with [`masters`],
/// and electing one changes the roles it was derived from.
///
/// [`masters`]: TopologySnapshot::masters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub data_nodes: Vec<PodInfo>,
    pub arbiters: Vec<PodInfo>,
    pub roles: Vec<NodeRole>,
    /// One view per running sentinel, in pod order
    pub arbiter_views: Vec<(String, ArbiterView)>,
}

impl TopologySnapshot {
    /// Observe the running pods and what each node reports.
    pub async fn observe<V: ClusterView, N: NodeOps>(
        view: &V,
        ops: &N,
        data_nodes: Vec<PodInfo>,
        auth: &AuthConfig,
    ) -> Result<Self> {
        let arbiters = list_running_arbiters(view).await?;
        let roles = query_roles(ops, &data_nodes, auth).await?;
        let arbiter_views = query_arbiter_views(ops, &arbiters, auth).await?;
        Ok(Self {
            data_nodes,
            arbiters,
            roles,
            arbiter_views,
        })
    }

    /// IPs of the nodes that report `role:master`
    pub fn masters(&self) -> Vec<&str> {
        self.roles
            .iter()
            .filter(|r| r.role.is_master)
            .map(|r| r.ip.as_str())
            .collect()
    }

    pub fn data_node_ips(&self) -> Vec<&str> {
        self.data_nodes.iter().map(|p| p.ip.as_str()).collect()
    }

    /// The view `ip` reported when the snapshot was taken
    pub fn arbiter_view(&self, ip: &str) -> Option<&ArbiterView> {
        self.arbiter_views
            .iter()
            .find(|(arbiter, _)| arbiter == ip)
            .map(|(_, view)| view)
    }
}

/// Data-node pods in the `Running` phase with an IP. Others are skipped.
pub async fn list_running_data_nodes<V: ClusterView>(view: &V) -> Result<Vec<PodInfo>> {
    let pods = view.redis_pods().await?;
    Ok(pods.into_iter().filter(PodInfo::is_reachable).collect())
}

/// Sentinel pods in the `Running` phase with an IP.
pub async fn list_running_arbiters<V: ClusterView>(view: &V) -> Result<Vec<PodInfo>> {
    let pods = view.sentinel_pods().await?;
    Ok(pods.into_iter().filter(PodInfo::is_reachable).collect())
}

#[instrument(skip(ops, auth))]
pub async fn query_role<N: NodeOps>(ops: &N, ip: &str, auth: &AuthConfig) -> Result<RoleInfo> {
    let role = ops
        .query_role(ip, auth)
        .await
        .map_err(|e| Error::from_node(ip, e))?;
    debug!(ip = %ip, is_master = role.is_master, upstream = ?role.master_host, "Queried role");
    Ok(role)
}

/// Ask a sentinel which master it monitors and what it tracks.
#[instrument(skip(ops, auth))]
pub async fn query_arbiter_view<N: NodeOps>(
    ops: &N,
    ip: &str,
    auth: &AuthConfig,
) -> Result<ArbiterView> {
    ops.query_arbiter_view(ip, auth)
        .await
        .map_err(|e| Error::from_node(ip, e))
}

/// Query the view of every running sentinel, in pod order.
pub async fn query_arbiter_views<N: NodeOps>(
    ops: &N,
    arbiters: &[PodInfo],
    auth: &AuthConfig,
) -> Result<Vec<(String, ArbiterView)>> {
    let mut views = Vec::with_capacity(arbiters.len());
    for arbiter in arbiters {
        let view = query_arbiter_view(ops, &arbiter.ip, auth).await?;
        views.push((arbiter.ip.clone(), view));
    }
    Ok(views)
}

/// Query the role of every running data node, in pod order.
pub async fn query_roles<N: NodeOps>(
    ops: &N,
    nodes: &[PodInfo],
    auth: &AuthConfig,
) -> Result<Vec<NodeRole>> {
    let mut roles = Vec::with_capacity(nodes.len());
    for node in nodes {
        let role = query_role(ops, &node.ip, auth).await?;
        roles.push(NodeRole {
            ip: node.ip.clone(),
            role,
        });
    }
    Ok(roles)
}

/// How long the longest-lived running data node has been up.
///
/// Fails with `NotFound` when no running pod reports a start time.
pub async fn earliest_pod_start_time<V: ClusterView>(view: &V, now: Timestamp) -> Result<Duration> {
    let nodes = list_running_data_nodes(view).await?;
    longest_uptime(&nodes, now)
        .ok_or_else(|| Error::NotFound("start time of running redis pods".to_string()))
}

/// Uptime of the oldest pod in `nodes` that has a start time
pub fn longest_uptime(nodes: &[PodInfo], now: Timestamp) -> Option<Duration> {
    nodes
        .iter()
        .filter_map(|p| p.start_time)
        .min()
        .map(|started| Duration::try_from(now.duration_since(started)).unwrap_or_default())
}

/// Nodes sorted by start time ascending, pods without one last.
pub fn oldest_first(nodes: &[PodInfo]) -> Vec<PodInfo> {
    let mut sorted = nodes.to_vec();
    sorted.sort_by_key(|p| (p.start_time.is_none(), p.start_time));
    sorted
}
