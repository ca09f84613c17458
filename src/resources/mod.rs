//! Resource generation module.
//!
//! Builds the Kubernetes objects owned by the three custom resources.
//!
//! ## RedisFailover
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet `rfr-<name>` | Redis data nodes |
//! | Deployment `rfs-<name>` | Sentinel arbiters |
//! | Services | Redis (headless), Sentinel, Sentinel headless |
//! | ConfigMaps | `redis.conf`, `sentinel.conf`, probe and shutdown scripts |
//! | PodDisruptionBudgets | Keep quorum during disruptions |
//! | CronJobs | Scheduled backups |
//!
//! ## RedisProxy / RedisShake
//!
//! ConfigMap, Service(s), PodDisruptionBudget (proxy only) and Deployment.

pub mod backup;
pub mod common;
pub mod configmaps;
pub mod pdb;
pub mod proxy;
pub mod sentinel;
pub mod services;
pub mod shake;
pub mod statefulset;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
