//! Redis and Sentinel access for the failover controller.
//!
//! This module wraps the `fred` client for the handful of commands the
//! operator needs and parses their text replies into typed views.
//!
//! ## Architecture
//!
//! - `redis_client`: single-node connection wrapper with bounded commands
//! - `parsing`: INFO / CONFIG / SENTINEL reply parsing and memory-unit normalization
//! - `types`: role, sentinel view and credential types
//! - `node_ops`: the `NodeOps` capability trait and its fred-backed implementation
//!
//! ## Example
//!
//! ```rust,ignore
//! use redis_operator::client::{AuthConfig, FredNodeOps, NodeOps};
//!
//! let ops = FredNodeOps::default();
//! let role = ops.query_role("10.0.0.9", &AuthConfig::none()).await?;
//! if role.is_master {
//!     println!("10.0.0.9 is master");
//! }
//! ```

pub mod node_ops;
pub mod parsing;
pub mod redis_client;
pub mod types;

pub use node_ops::{FredNodeOps, NodeOps};
pub use parsing::{ParseError, normalize_memory_value};
pub use redis_client::{RedisClient, RedisClientConfig, RedisError};
pub use types::{ArbiterView, AuthConfig, RoleInfo};
