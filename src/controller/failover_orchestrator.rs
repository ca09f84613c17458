//! The RedisFailover check/heal pass.
//!
//! [`check_and_heal`] runs the checker stages in their fixed order. When a
//! check fails it applies the matching healer action and re-verifies once,
//! inline. If re-verification still fails the pass ends with an error; the
//! next pass retries from scratch.
//!
//! While the pass is in a waiting stage no error fails it: count mismatches
//! and unreadable workloads both end the pass as [`HealOutcome::Waiting`].
//!
//! The pass takes the spec, a [`ClusterView`] and a [`NodeOps`] and keeps no
//! state between calls, so tests drive it against an in-memory topology.

use std::time::Duration;

use jiff::Timestamp;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ArbiterView, AuthConfig, NodeOps};
use crate::controller::cluster_view::{ClusterView, PodInfo, WorkloadCounts};
use crate::controller::error::{Error, Result};
use crate::controller::failover_checker::{
    Role, Verdict, arbiter_config_drift, check_arbiter_monitor, check_arbiter_peers,
    check_arbiter_replicas, check_config, check_count, check_master_cardinality,
    check_replication, unverified_arbiter_keys,
};
use crate::controller::failover_healer::{
    HealAction, elect_oldest_as_master, promote_to_master, push_arbiter_config,
    push_custom_config, reconfigure_arbiter_monitor, repoint_all_to_master, reset_arbiter_view,
};
use crate::controller::failover_inspector::{
    NodeRole, TopologySnapshot, earliest_pod_start_time, list_running_data_nodes,
    query_arbiter_view, query_roles,
};
use crate::controller::failover_state_machine::{
    HealEvent, HealStage, HealStateMachine, TransitionResult,
};
use crate::crd::RedisFailoverSpec;

/// Timing of the sentinel replica-view repair
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealTuning {
    /// Delay between re-checks after a sentinel reset
    pub reset_poll_interval: Duration,
    /// Give up after this long
    pub reset_poll_timeout: Duration,
}

impl Default for HealTuning {
    fn default() -> Self {
        Self {
            reset_poll_interval: Duration::from_secs(5),
            reset_poll_timeout: Duration::from_secs(30),
        }
    }
}

/// Stages visited and actions taken during one pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealReport {
    pub stages: Vec<HealStage>,
    pub actions: Vec<HealAction>,
}

impl HealReport {
    pub fn healed(&self) -> bool {
        !self.actions.is_empty()
    }
}

/// How a pass ended, when it did not fail
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealOutcome {
    /// All invariants hold
    Ready { master: String, report: HealReport },
    /// Pods are still starting; nothing was touched
    Waiting { reason: String, report: HealReport },
}

impl HealOutcome {
    pub fn report(&self) -> &HealReport {
        match self {
            HealOutcome::Ready { report, .. } | HealOutcome::Waiting { report, .. } => report,
        }
    }

    /// Stage the pass ended in
    pub fn stage(&self) -> HealStage {
        let fallback = match self {
            HealOutcome::Ready { .. } => HealStage::Ready,
            HealOutcome::Waiting { .. } => HealStage::WaitingPods,
        };
        self.report().stages.last().copied().unwrap_or(fallback)
    }
}

/// Run one check/heal pass against a RedisFailover.
///
/// `spec` must already be validated and defaulted.
pub async fn check_and_heal<V: ClusterView, N: NodeOps>(
    spec: &RedisFailoverSpec,
    view: &V,
    ops: &N,
    auth: &AuthConfig,
    tuning: &HealTuning,
) -> Result<HealOutcome> {
    let mut pass = Pass {
        spec,
        view,
        ops,
        auth,
        tuning,
        machine: HealStateMachine::new(),
        stage: HealStage::Validating,
        report: HealReport {
            stages: vec![HealStage::Validating],
            actions: Vec::new(),
        },
    };

    match pass.run().await {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_waiting() => Ok(pass.waiting(e.to_string())),
        Err(e) if pass.stage.is_waiting() => {
            warn!(
                stage = %pass.stage,
                error = %e,
                "Workload state unreadable, still waiting"
            );
            Ok(pass.waiting(e.to_string()))
        }
        Err(e) => {
            if pass.machine.can_transition(pass.stage, HealEvent::Errored) {
                pass.advance(HealEvent::Errored);
            }
            warn!(
                stage = %pass.stage,
                path = ?pass.report.stages,
                actions = pass.report.actions.len(),
                error = %e,
                "Check and heal failed"
            );
            Err(e)
        }
    }
}

struct Pass<'a, V, N> {
    spec: &'a RedisFailoverSpec,
    view: &'a V,
    ops: &'a N,
    auth: &'a AuthConfig,
    tuning: &'a HealTuning,
    machine: HealStateMachine,
    stage: HealStage,
    report: HealReport,
}

impl<V: ClusterView, N: NodeOps> Pass<'_, V, N> {
    fn advance(&mut self, event: HealEvent) {
        match self.machine.transition(self.stage, event) {
            TransitionResult::Success { to, description, .. } => {
                debug!(from = %self.stage, to = %to, "{}", description);
                self.stage = to;
                self.report.stages.push(to);
            }
            TransitionResult::InvalidTransition { current, event } => {
                warn!(
                    stage = %current,
                    event = %event,
                    valid = ?self.machine.valid_events(current),
                    "Ignoring invalid heal transition"
                );
            }
        }
    }

    fn record(&mut self, action: HealAction) {
        self.report.actions.push(action);
    }

    fn waiting(&mut self, reason: String) -> HealOutcome {
        self.advance(HealEvent::StillWaiting);
        info!(stage = %self.stage, reason = %reason, "Waiting for pods");
        HealOutcome::Waiting {
            reason,
            report: std::mem::take(&mut self.report),
        }
    }

    async fn run(&mut self) -> Result<HealOutcome> {
        if self.spec.redis.replicas < 1 || self.spec.sentinel.replicas < 1 {
            return Err(Error::Validation("replica counts must be positive".to_string()));
        }
        self.advance(HealEvent::Passed);

        self.count_check(Role::Redis, self.spec.redis.replicas)
            .await?;
        // Ready pods without an IP or outside the Running phase are skipped
        let data_nodes = list_running_data_nodes(self.view).await?;
        if data_nodes.is_empty() {
            return Err(Error::CountMismatch("no running redis pods".to_string()));
        }
        self.advance(HealEvent::Passed);

        self.count_check(Role::Sentinel, self.spec.sentinel.replicas)
            .await?;
        self.advance(HealEvent::Passed);

        let snapshot = TopologySnapshot::observe(self.view, self.ops, data_nodes, self.auth).await?;

        let (master, roles) = self.ensure_master(&snapshot).await?;
        self.advance(HealEvent::Passed);

        self.ensure_replication(&master, &snapshot.data_nodes, &roles)
            .await?;
        self.advance(HealEvent::Passed);

        self.ensure_redis_config(&snapshot).await?;
        self.advance(HealEvent::Passed);

        self.ensure_arbiters(&master, &snapshot).await?;
        self.advance(HealEvent::Passed);

        info!(master = %master, actions = self.report.actions.len(), "Failover topology healthy");
        Ok(HealOutcome::Ready {
            master,
            report: std::mem::take(&mut self.report),
        })
    }

    /// `CountMismatch` while the workload is still converging.
    async fn count_check(&self, role: Role, declared: i32) -> Result<()> {
        let counts = match role {
            Role::Redis => self.view.redis_counts().await,
            Role::Sentinel => self.view.sentinel_counts().await,
        };
        let counts = match counts {
            Ok(counts) => counts,
            // Workload not created yet
            Err(e) if e.is_not_found() => WorkloadCounts::default(),
            Err(e) => return Err(e),
        };
        match check_count(role, declared, counts) {
            None => Ok(()),
            Some(verdict) if verdict.is_waiting() => Err(Error::CountMismatch(verdict.to_string())),
            Some(verdict) => Err(Error::Transient(verdict.to_string())),
        }
    }

    /// Establish exactly one master and return it with the roles it was
    /// verified against.
    async fn ensure_master(
        &mut self,
        snapshot: &TopologySnapshot,
    ) -> Result<(String, Vec<NodeRole>)> {
        debug!(masters = ?snapshot.masters(), "Observed masters");
        match check_master_cardinality(&snapshot.roles) {
            Ok(master) => Ok((master, snapshot.roles.clone())),
            Err(Verdict::MultipleMasters { masters }) => {
                warn!(masters = ?masters, "More than one master, not healing");
                Err(Error::SplitBrain {
                    masters: masters.len(),
                })
            }
            Err(_) => {
                let elected = self.elect(&snapshot.data_nodes).await?;
                let roles = query_roles(self.ops, &snapshot.data_nodes, self.auth).await?;
                match check_master_cardinality(&roles) {
                    Ok(master) if master == elected => Ok((master, roles)),
                    Ok(master) => Err(Error::Transient(format!(
                        "elected {elected} but {master} reports master"
                    ))),
                    Err(verdict) => Err(Error::Transient(format!(
                        "master election did not converge: {verdict}"
                    ))),
                }
            }
        }
    }

    async fn elect(&mut self, nodes: &[PodInfo]) -> Result<String> {
        if let [only] = nodes {
            let action = promote_to_master(self.ops, &only.ip, self.auth).await?;
            self.record(action);
            return Ok(only.ip.clone());
        }

        let uptime = earliest_pod_start_time(self.view, Timestamp::now()).await?;
        debug!(uptime = ?uptime, "Electing the longest-running node");

        let (master, actions) = elect_oldest_as_master(self.ops, nodes, self.auth).await?;
        self.report.actions.extend(actions);
        Ok(master)
    }

    async fn ensure_replication(
        &mut self,
        master: &str,
        nodes: &[PodInfo],
        roles: &[NodeRole],
    ) -> Result<()> {
        let Some(verdict) = check_replication(master, roles) else {
            return Ok(());
        };
        info!(master = %master, "{}", verdict);

        let actions = repoint_all_to_master(self.ops, master, nodes, self.auth).await?;
        self.report.actions.extend(actions);

        let roles = query_roles(self.ops, nodes, self.auth).await?;
        match check_replication(master, &roles) {
            None => Ok(()),
            Some(verdict) => Err(Error::Transient(verdict.to_string())),
        }
    }

    async fn ensure_redis_config(&mut self, snapshot: &TopologySnapshot) -> Result<()> {
        let declared = &self.spec.redis.custom_config;
        for ip in snapshot.data_node_ips() {
            let live = self
                .ops
                .config_get_all(ip, self.auth)
                .await
                .map_err(|e| Error::from_node(ip, e))?;
            let Some(verdict) = check_config(ip, declared, &live) else {
                continue;
            };
            info!(node = %ip, "{}", verdict);

            if let Some(action) = push_custom_config(self.ops, ip, declared, self.auth).await? {
                self.record(action);
            }

            let live = self
                .ops
                .config_get_all(ip, self.auth)
                .await
                .map_err(|e| Error::from_node(ip, e))?;
            if let Some(verdict) = check_config(ip, declared, &live) {
                return Err(Error::Drift(verdict.to_string()));
            }
        }
        Ok(())
    }

    async fn ensure_arbiters(&mut self, master: &str, snapshot: &TopologySnapshot) -> Result<()> {
        let redis_replicas = self.spec.redis.replicas;
        let sentinel_replicas = self.spec.sentinel.replicas;
        let arbiters = &snapshot.arbiters;

        // Monitor checks use the snapshot; later checks re-query since
        // monitors and resets rebuild the views
        for (ip, view) in &snapshot.arbiter_views {
            let ip = ip.as_str();
            let Some(verdict) = check_arbiter_monitor(ip, view, master) else {
                continue;
            };
            info!(monitored = ?view.monitored_master, "{}", verdict);

            let action =
                reconfigure_arbiter_monitor(self.ops, ip, master, sentinel_replicas, self.auth)
                    .await?;
            self.record(action);

            let view = query_arbiter_view(self.ops, ip, self.auth).await?;
            if let Some(verdict) = check_arbiter_monitor(ip, &view, master) {
                return Err(Error::Transient(verdict.to_string()));
            }
        }

        for arbiter in arbiters {
            let ip = arbiter.ip.as_str();
            let view = query_arbiter_view(self.ops, ip, self.auth).await?;
            let Some(verdict) = check_arbiter_replicas(ip, &view, redis_replicas) else {
                continue;
            };
            info!(known_replicas = view.known_replicas, "{}", verdict);

            let action = reset_arbiter_view(self.ops, ip, self.auth).await?;
            self.record(action);
            self.wait_for_replica_view(ip, redis_replicas).await?;
        }

        for arbiter in arbiters {
            let ip = arbiter.ip.as_str();
            let view = query_arbiter_view(self.ops, ip, self.auth).await?;
            let Some(verdict) = check_arbiter_peers(ip, &view, sentinel_replicas) else {
                continue;
            };
            info!(known_sentinels = view.known_sentinels, "{}", verdict);

            // Peer discovery is asynchronous; the next pass verifies it.
            let action = reset_arbiter_view(self.ops, ip, self.auth).await?;
            self.record(action);
        }

        let declared = &self.spec.sentinel.custom_config;
        if declared.is_empty() {
            return Ok(());
        }
        for arbiter in arbiters {
            let ip = arbiter.ip.as_str();
            let live = self
                .ops
                .sentinel_master_config(ip, self.auth)
                .await
                .map_err(|e| Error::from_node(ip, e))?;
            let pairs = arbiter_config_drift(declared, &live);
            let Some(action) = push_arbiter_config(self.ops, ip, &pairs, self.auth).await? else {
                continue;
            };
            self.record(action);

            let live = self
                .ops
                .sentinel_master_config(ip, self.auth)
                .await
                .map_err(|e| Error::from_node(ip, e))?;
            let stale = unverified_arbiter_keys(&pairs, &live);
            if !stale.is_empty() {
                return Err(Error::Drift(format!(
                    "config drift on sentinel {ip}: {}",
                    stale.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Poll a reset sentinel until it tracks `redis_replicas - 1` replicas.
    async fn wait_for_replica_view(&self, ip: &str, redis_replicas: i32) -> Result<ArbiterView> {
        let started = Instant::now();
        loop {
            tokio::time::sleep(self.tuning.reset_poll_interval).await;
            let view = query_arbiter_view(self.ops, ip, self.auth).await?;
            if check_arbiter_replicas(ip, &view, redis_replicas).is_none() {
                debug!(
                    arbiter = %ip,
                    elapsed = ?started.elapsed(),
                    "Sentinel replica view rebuilt"
                );
                return Ok(view);
            }
            if started.elapsed() >= self.tuning.reset_poll_timeout {
                return Err(Error::Timeout {
                    operation: format!("sentinel {ip} replica view rebuild"),
                    duration: self.tuning.reset_poll_timeout,
                });
            }
        }
    }
}
