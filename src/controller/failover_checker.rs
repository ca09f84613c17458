//! Invariant checks for a RedisFailover.
//!
//! Every function here is a pure predicate over the declared spec and what
//! the inspector observed. Each returns the violated invariant as a
//! [`Verdict`], or nothing when the invariant holds. The orchestrator runs
//! them in a fixed order and picks the matching heal action.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::warn;

use crate::client::parsing::is_memory_key;
use crate::client::{ArbiterView, normalize_memory_value};
use crate::controller::cluster_view::WorkloadCounts;
use crate::controller::failover_inspector::NodeRole;

/// Which workload a count verdict is about
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Redis,
    Sentinel,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Redis => write!(f, "redis"),
            Role::Sentinel => write!(f, "sentinel"),
        }
    }
}

/// Which part of a sentinel's view is out of date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleView {
    /// Monitors the wrong master, or none
    Monitor,
    /// Tracks the wrong number of replicas
    Replicas,
    /// Knows the wrong number of peer sentinels
    Peers,
}

/// A violated invariant
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The workload is configured with a different replica count than declared
    NumberMismatch {
        role: Role,
        declared: i32,
        configured: i32,
    },
    /// Fewer pods are ready than declared
    NotReady {
        role: Role,
        declared: i32,
        ready: i32,
    },
    NoMaster,
    MultipleMasters { masters: Vec<String> },
    /// Data nodes not following the master
    ReplicaMisconfigured { nodes: Vec<String> },
    ArbiterViewStale { arbiter: String, stale: StaleView },
    /// Keys whose live value differs from the declared one
    ConfigDrift { node: String, keys: Vec<String> },
}

impl Verdict {
    /// Whether this verdict only means the workload is still starting up
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Verdict::NumberMismatch { .. } | Verdict::NotReady { .. }
        )
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::NumberMismatch {
                role,
                declared,
                configured,
            } => write!(
                f,
                "number of {role} pods differ from specification: declared {declared}, configured {configured}"
            ),
            Verdict::NotReady {
                role,
                declared,
                ready,
            } => write!(
                f,
                "waiting all of {role} pods become ready: {ready}/{declared}"
            ),
            Verdict::NoMaster => write!(f, "no master found"),
            Verdict::MultipleMasters { masters } => write!(
                f,
                "more than one master, fix manually: {}",
                masters.join(", ")
            ),
            Verdict::ReplicaMisconfigured { nodes } => {
                write!(f, "replicas not following the master: {}", nodes.join(", "))
            }
            Verdict::ArbiterViewStale { arbiter, stale } => {
                let what = match stale {
                    StaleView::Monitor => "monitored master",
                    StaleView::Replicas => "replica count",
                    StaleView::Peers => "sentinel count",
                };
                write!(f, "sentinel {arbiter} has a stale {what}")
            }
            Verdict::ConfigDrift { node, keys } => {
                write!(f, "config drift on {node}: {}", keys.join(", "))
            }
        }
    }
}

// ============================================================================
// Counts
// ============================================================================

/// Declared count against the workload's configured and ready counts.
pub fn check_count(role: Role, declared: i32, counts: WorkloadCounts) -> Option<Verdict> {
    if counts.desired != declared {
        return Some(Verdict::NumberMismatch {
            role,
            declared,
            configured: counts.desired,
        });
    }
    if counts.ready != declared {
        return Some(Verdict::NotReady {
            role,
            declared,
            ready: counts.ready,
        });
    }
    None
}

// ============================================================================
// Master and replication
// ============================================================================

/// The single master, or `NoMaster` / `MultipleMasters`.
pub fn check_master_cardinality(roles: &[NodeRole]) -> Result<String, Verdict> {
    let masters: Vec<String> = roles
        .iter()
        .filter(|r| r.role.is_master)
        .map(|r| r.ip.clone())
        .collect();

    match masters.as_slice() {
        [] => Err(Verdict::NoMaster),
        [master] => Ok(master.clone()),
        _ => Err(Verdict::MultipleMasters { masters }),
    }
}

/// Every node other than `master` must follow it.
pub fn check_replication(master: &str, roles: &[NodeRole]) -> Option<Verdict> {
    let nodes: Vec<String> = roles
        .iter()
        .filter(|r| r.ip != master && !r.role.follows(master))
        .map(|r| r.ip.clone())
        .collect();

    if nodes.is_empty() {
        None
    } else {
        Some(Verdict::ReplicaMisconfigured { nodes })
    }
}

// ============================================================================
// Config drift
// ============================================================================

/// Declared value as the node would report it.
///
/// Memory sizes become byte counts. `None` when a memory value cannot be
/// parsed; such keys are not compared.
pub fn expected_value(key: &str, declared: &str) -> Option<String> {
    if !is_memory_key(key) {
        return Some(declared.to_string());
    }
    match normalize_memory_value(declared) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(key = %key, value = %declared, error = %e, "Skipping unparseable memory value");
            None
        }
    }
}

/// Live value of a config key.
///
/// Nodes report config names in lower case whatever case they were set in.
fn live_value<'a>(live: &'a HashMap<String, String>, key: &str) -> Option<&'a String> {
    live.get(key)
        .or_else(|| live.get(&key.to_ascii_lowercase()))
}

/// Declared keys whose live value differs, in key order.
pub fn config_drift(
    declared: &BTreeMap<String, String>,
    live: &HashMap<String, String>,
) -> Vec<String> {
    declared
        .iter()
        .filter_map(|(key, value)| {
            let expected = expected_value(key, value)?;
            if live_value(live, key) == Some(&expected) {
                None
            } else {
                Some(key.clone())
            }
        })
        .collect()
}

/// Drift check for one data node.
pub fn check_config(
    node: &str,
    declared: &BTreeMap<String, String>,
    live: &HashMap<String, String>,
) -> Option<Verdict> {
    let keys = config_drift(declared, live);
    if keys.is_empty() {
        None
    } else {
        Some(Verdict::ConfigDrift {
            node: node.to_string(),
            keys,
        })
    }
}

// ============================================================================
// Sentinel views
// ============================================================================

pub fn check_arbiter_monitor(arbiter: &str, view: &ArbiterView, master: &str) -> Option<Verdict> {
    if view.monitored_master.as_deref() == Some(master) {
        None
    } else {
        Some(Verdict::ArbiterViewStale {
            arbiter: arbiter.to_string(),
            stale: StaleView::Monitor,
        })
    }
}

/// A sentinel must track every data node except the master.
pub fn check_arbiter_replicas(
    arbiter: &str,
    view: &ArbiterView,
    redis_replicas: i32,
) -> Option<Verdict> {
    if view.known_replicas == redis_replicas - 1 {
        None
    } else {
        Some(Verdict::ArbiterViewStale {
            arbiter: arbiter.to_string(),
            stale: StaleView::Replicas,
        })
    }
}

/// A sentinel must know every sentinel, itself included.
pub fn check_arbiter_peers(
    arbiter: &str,
    view: &ArbiterView,
    sentinel_replicas: i32,
) -> Option<Verdict> {
    if view.known_sentinels == sentinel_replicas {
        None
    } else {
        Some(Verdict::ArbiterViewStale {
            arbiter: arbiter.to_string(),
            stale: StaleView::Peers,
        })
    }
}

/// Sentinel overrides to push: keys that differ and keys the sentinel does
/// not report at all.
pub fn arbiter_config_drift(
    declared: &BTreeMap<String, String>,
    live: &HashMap<String, String>,
) -> Vec<(String, String)> {
    declared
        .iter()
        .filter(|(key, value)| live_value(live, key) != Some(*value))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Of the pushed keys, those the sentinel reports with a different value.
///
/// Keys it does not report cannot be verified.
pub fn unverified_arbiter_keys(
    pushed: &[(String, String)],
    live: &HashMap<String, String>,
) -> Vec<String> {
    pushed
        .iter()
        .filter(|(key, value)| live_value(live, key).is_some_and(|v| v != value))
        .map(|(k, _)| k.clone())
        .collect()
}
