//! Custom Resource Definitions (CRDs) for redis-operator.
//!
//! - `RedisFailover`: Redis master/replica set watched by Sentinel
//! - `RedisProxy`: predixy proxy in front of a RedisFailover or Redis cluster
//! - `RedisShake`: redis-shake data migration between two deployments

mod common;
mod redis_failover;
mod redis_proxy;
mod redis_shake;

pub use common::*;
pub use redis_failover::*;
pub use redis_proxy::*;
pub use redis_shake::*;
