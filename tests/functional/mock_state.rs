//! In-memory Redis + Sentinel topology for functional tests.
//!
//! `MockTopology` implements both `ClusterView` and `NodeOps`, so the real
//! check/heal pass runs against it unchanged. Mutating commands update the
//! simulated nodes the way Redis and Sentinel would and are appended to a
//! command log for assertions.
//!
//! Sentinel behavior modelled here:
//! - `SENTINEL MONITOR` replaces the registration and forgets replicas and
//!   peers, as a fresh registration does
//! - `SENTINEL RESET` rebuilds the view from the current topology, unless
//!   the sentinel is marked stuck
//!
//! With [`MockTopology::require_password`] every node, sentinels included,
//! refuses calls that carry a different password.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use redis_operator::client::parsing::is_memory_key;
use redis_operator::client::{
    ArbiterView, AuthConfig, NodeOps, RedisError, RoleInfo, normalize_memory_value,
};
use redis_operator::controller::cluster_view::{ClusterView, PodInfo, WorkloadCounts};
use redis_operator::controller::error::{Error, Result};
use redis_operator::crd::RedisFailoverSpec;

/// Address a fresh Redis pod replicates from before the operator elects a master.
pub const BOOT_UPSTREAM: &str = "127.0.0.1";

#[derive(Debug, Default)]
struct State {
    redis_pods: Vec<PodInfo>,
    sentinel_pods: Vec<PodInfo>,
    redis_counts: WorkloadCounts,
    sentinel_counts: WorkloadCounts,
    roles: HashMap<String, RoleInfo>,
    configs: HashMap<String, HashMap<String, String>>,
    views: HashMap<String, ArbiterView>,
    sentinel_configs: HashMap<String, HashMap<String, String>>,
    stuck_sentinels: HashSet<String>,
    unreachable: HashSet<String>,
    /// The API server cannot report workload counts
    counts_unreadable: bool,
    password: Option<String>,
    /// Nodes that rejected a call for its credentials
    refused: Vec<String>,
    commands: Vec<String>,
}

/// Simulated pods, data nodes and sentinels of one RedisFailover.
#[derive(Debug, Default)]
pub struct MockTopology {
    state: Mutex<State>,
}

pub fn redis_ip(ordinal: usize) -> String {
    format!("10.0.0.{}", ordinal + 1)
}

pub fn sentinel_ip(ordinal: usize) -> String {
    format!("10.0.1.{}", ordinal + 1)
}

fn pod(name: String, ip: String, start_minute: usize) -> PodInfo {
    PodInfo {
        name,
        ip,
        running: true,
        start_time: Some(
            format!("2024-01-01T00:{:02}:00Z", start_minute % 60)
                .parse()
                .unwrap(),
        ),
    }
}

impl MockTopology {
    /// A converged topology: `redis-0` is master, everyone follows it and
    /// every sentinel has a complete view.
    pub fn healthy(redis: usize, sentinels: usize) -> Self {
        let topology = Self::booting(redis, sentinels);
        let master = redis_ip(0);
        {
            let mut state = topology.lock();
            for ordinal in 0..redis {
                let role = if ordinal == 0 {
                    RoleInfo::master()
                } else {
                    RoleInfo::replica_of(master.clone())
                };
                state.roles.insert(redis_ip(ordinal), role);
            }
            for ordinal in 0..sentinels {
                state.views.insert(
                    sentinel_ip(ordinal),
                    ArbiterView {
                        monitored_master: Some(master.clone()),
                        known_replicas: count(redis) - 1,
                        known_sentinels: count(sentinels),
                    },
                );
            }
        }
        topology
    }

    /// Freshly started pods: every node replicates from the boot address and
    /// sentinels monitor it too.
    pub fn booting(redis: usize, sentinels: usize) -> Self {
        let mut state = State {
            redis_counts: WorkloadCounts {
                desired: count(redis),
                ready: count(redis),
            },
            sentinel_counts: WorkloadCounts {
                desired: count(sentinels),
                ready: count(sentinels),
            },
            ..Default::default()
        };
        for ordinal in 0..redis {
            let ip = redis_ip(ordinal);
            state
                .redis_pods
                .push(pod(format!("rfr-cache-{ordinal}"), ip.clone(), ordinal));
            state
                .roles
                .insert(ip.clone(), RoleInfo::replica_of(BOOT_UPSTREAM));
            state.configs.insert(ip, HashMap::new());
        }
        for ordinal in 0..sentinels {
            let ip = sentinel_ip(ordinal);
            state.sentinel_pods.push(pod(
                format!("rfs-cache-{ordinal}"),
                ip.clone(),
                ordinal,
            ));
            state.views.insert(
                ip.clone(),
                ArbiterView {
                    monitored_master: Some(BOOT_UPSTREAM.to_string()),
                    known_replicas: 0,
                    known_sentinels: 1,
                },
            );
            state.sentinel_configs.insert(ip, HashMap::new());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // ------------------------------------------------------------------
    // Scenario setup
    // ------------------------------------------------------------------

    pub fn set_role(&self, ip: &str, role: RoleInfo) {
        self.lock().roles.insert(ip.to_string(), role);
    }

    pub fn set_view(&self, ip: &str, view: ArbiterView) {
        self.lock().views.insert(ip.to_string(), view);
    }

    /// Live value as `CONFIG GET` reports it
    pub fn set_live_config(&self, ip: &str, key: &str, value: &str) {
        self.lock()
            .configs
            .entry(ip.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_sentinel_config(&self, ip: &str, key: &str, value: &str) {
        self.lock()
            .sentinel_configs
            .entry(ip.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_redis_counts(&self, desired: i32, ready: i32) {
        self.lock().redis_counts = WorkloadCounts { desired, ready };
    }

    pub fn set_sentinel_counts(&self, desired: i32, ready: i32) {
        self.lock().sentinel_counts = WorkloadCounts { desired, ready };
    }

    /// Pod start time as minutes past a fixed epoch
    pub fn set_start_minute(&self, ip: &str, minute: usize) {
        let mut state = self.lock();
        if let Some(pod) = state.redis_pods.iter_mut().find(|p| p.ip == ip) {
            pod.start_time = Some(
                format!("2024-01-01T00:{:02}:00Z", minute % 60)
                    .parse()
                    .unwrap(),
            );
        }
    }

    pub fn stop_all_redis_pods(&self) {
        for pod in &mut self.lock().redis_pods {
            pod.running = false;
        }
    }

    /// The sentinel never rebuilds its replica view after a reset
    pub fn stick_sentinel(&self, ip: &str) {
        self.lock().stuck_sentinels.insert(ip.to_string());
    }

    pub fn make_unreachable(&self, ip: &str) {
        self.lock().unreachable.insert(ip.to_string());
    }

    pub fn make_counts_unreadable(&self) {
        self.lock().counts_unreadable = true;
    }

    pub fn require_password(&self, password: &str) {
        self.lock().password = Some(password.to_string());
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn role(&self, ip: &str) -> RoleInfo {
        self.lock().roles.get(ip).cloned().unwrap_or_default()
    }

    pub fn view(&self, ip: &str) -> ArbiterView {
        self.lock().views.get(ip).cloned().unwrap_or_default()
    }

    pub fn masters(&self) -> Vec<String> {
        let state = self.lock();
        let mut masters: Vec<String> = state
            .roles
            .iter()
            .filter(|(_, role)| role.is_master)
            .map(|(ip, _)| ip.clone())
            .collect();
        masters.sort();
        masters
    }

    /// Roles, sentinel views and live configs in a stable order, for
    /// comparing the topology before and after a command.
    pub fn snapshot(&self) -> String {
        let state = self.lock();
        let roles: BTreeMap<_, _> = state.roles.iter().collect();
        let views: BTreeMap<_, _> = state.views.iter().collect();
        let configs: BTreeMap<_, BTreeMap<_, _>> = state
            .configs
            .iter()
            .map(|(ip, config)| (ip, config.iter().collect()))
            .collect();
        format!("{roles:?}\n{views:?}\n{configs:?}")
    }

    /// Mutating commands issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    /// Nodes that refused a call for its credentials, in call order
    pub fn refused(&self) -> Vec<String> {
        self.lock().refused.clone()
    }

    fn check_reachable(&self, ip: &str) -> std::result::Result<(), RedisError> {
        if self.lock().unreachable.contains(ip) {
            Err(RedisError::Connection(format!("connection refused: {ip}")))
        } else {
            Ok(())
        }
    }

    /// Reachability plus the password check a node with `requirepass` does
    fn connect(&self, ip: &str, auth: &AuthConfig) -> std::result::Result<(), RedisError> {
        self.check_reachable(ip)?;
        let mut state = self.lock();
        if state.password.is_some() && state.password.as_deref() != auth.password() {
            state.refused.push(ip.to_string());
            return Err(RedisError::UnexpectedReply {
                command: "AUTH".to_string(),
                reply: "WRONGPASS invalid username-password pair".to_string(),
            });
        }
        Ok(())
    }

    /// What a sentinel would rebuild from the current topology
    fn rebuilt_view(state: &State, monitored: Option<String>) -> ArbiterView {
        let known_replicas = monitored
            .as_deref()
            .map(|master| {
                state
                    .roles
                    .values()
                    .filter(|role| role.follows(master))
                    .count()
            })
            .unwrap_or(0);
        ArbiterView {
            monitored_master: monitored,
            known_replicas: count(known_replicas),
            known_sentinels: count(state.sentinel_pods.len()),
        }
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap()
}

impl ClusterView for MockTopology {
    async fn redis_counts(&self) -> Result<WorkloadCounts> {
        let state = self.lock();
        if state.counts_unreadable {
            return Err(Error::Transient("apiserver unavailable".to_string()));
        }
        Ok(state.redis_counts)
    }

    async fn sentinel_counts(&self) -> Result<WorkloadCounts> {
        let state = self.lock();
        if state.counts_unreadable {
            return Err(Error::Transient("apiserver unavailable".to_string()));
        }
        Ok(state.sentinel_counts)
    }

    async fn redis_pods(&self) -> Result<Vec<PodInfo>> {
        Ok(self.lock().redis_pods.clone())
    }

    async fn sentinel_pods(&self) -> Result<Vec<PodInfo>> {
        Ok(self.lock().sentinel_pods.clone())
    }
}

impl NodeOps for MockTopology {
    async fn query_role(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<RoleInfo, RedisError> {
        self.connect(ip, auth)?;
        Ok(self.role(ip))
    }

    async fn query_arbiter_view(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<ArbiterView, RedisError> {
        self.connect(ip, auth)?;
        Ok(self.view(ip))
    }

    async fn promote(&self, ip: &str, auth: &AuthConfig) -> std::result::Result<(), RedisError> {
        self.connect(ip, auth)?;
        let mut state = self.lock();
        state.roles.insert(ip.to_string(), RoleInfo::master());
        state.commands.push(format!("{ip} SLAVEOF NO ONE"));
        Ok(())
    }

    async fn replicate_of(
        &self,
        ip: &str,
        master: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<(), RedisError> {
        self.connect(ip, auth)?;
        let mut state = self.lock();
        state
            .roles
            .insert(ip.to_string(), RoleInfo::replica_of(master));
        state.commands.push(format!("{ip} SLAVEOF {master} 6379"));
        Ok(())
    }

    async fn sentinel_monitor(
        &self,
        ip: &str,
        master: &str,
        quorum: u32,
        auth: &AuthConfig,
    ) -> std::result::Result<(), RedisError> {
        self.connect(ip, auth)?;
        let mut state = self.lock();
        state.views.insert(
            ip.to_string(),
            ArbiterView {
                monitored_master: Some(master.to_string()),
                known_replicas: 0,
                known_sentinels: 1,
            },
        );
        state
            .commands
            .push(format!("{ip} SENTINEL MONITOR mymaster {master} 6379 {quorum}"));
        Ok(())
    }

    async fn sentinel_reset(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<(), RedisError> {
        self.connect(ip, auth)?;
        let mut state = self.lock();
        state.commands.push(format!("{ip} SENTINEL RESET *"));
        if state.stuck_sentinels.contains(ip) {
            return Ok(());
        }
        let monitored = state
            .views
            .get(ip)
            .and_then(|v| v.monitored_master.clone());
        let view = Self::rebuilt_view(&state, monitored);
        state.views.insert(ip.to_string(), view);
        Ok(())
    }

    async fn config_get_all(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<HashMap<String, String>, RedisError> {
        self.connect(ip, auth)?;
        Ok(self.lock().configs.get(ip).cloned().unwrap_or_default())
    }

    async fn config_set(
        &self,
        ip: &str,
        key: &str,
        value: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<(), RedisError> {
        self.connect(ip, auth)?;
        // Redis reports names in lower case and memory sizes in bytes
        let name = key.to_ascii_lowercase();
        let stored = if is_memory_key(key) {
            normalize_memory_value(value)?
        } else {
            value.to_string()
        };
        let mut state = self.lock();
        state
            .configs
            .entry(ip.to_string())
            .or_default()
            .insert(name, stored);
        state.commands.push(format!("{ip} CONFIG SET {key}"));
        Ok(())
    }

    async fn sentinel_master_config(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<HashMap<String, String>, RedisError> {
        self.connect(ip, auth)?;
        Ok(self
            .lock()
            .sentinel_configs
            .get(ip)
            .cloned()
            .unwrap_or_default())
    }

    async fn sentinel_set(
        &self,
        ip: &str,
        key: &str,
        value: &str,
        auth: &AuthConfig,
    ) -> std::result::Result<(), RedisError> {
        self.connect(ip, auth)?;
        let mut state = self.lock();
        state
            .sentinel_configs
            .entry(ip.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        state
            .commands
            .push(format!("{ip} SENTINEL SET mymaster {key} {value}"));
        Ok(())
    }
}

/// A validated spec for `redis` data nodes and `sentinels` sentinels.
pub fn failover_spec(redis: i32, sentinels: i32) -> RedisFailoverSpec {
    let mut spec = RedisFailoverSpec::default();
    spec.redis.replicas = redis;
    spec.sentinel.replicas = sentinels;
    spec
}

/// Spec with Redis custom config entries
pub fn spec_with_config(redis: i32, sentinels: i32, config: &[(&str, &str)]) -> RedisFailoverSpec {
    let mut spec = failover_spec(redis, sentinels);
    spec.redis.custom_config = config
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
    spec
}
