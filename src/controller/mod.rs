//! Controller module for redis-operator.
//!
//! Contains the reconciliation loops, the failover check/heal pass, error
//! handling, status management and validation.
//!
//! Three controllers share this module:
//! - RedisFailover controller (`failover_*` modules)
//! - RedisProxy controller (`proxy_reconciler`)
//! - RedisShake controller (`shake_reconciler`)

// Shared modules
pub mod cluster_view;
pub mod context;
pub mod ensure;
pub mod error;
pub mod status;
pub mod validation;

// RedisFailover controller
pub mod failover_checker;
pub mod failover_healer;
pub mod failover_inspector;
pub mod failover_orchestrator;
pub mod failover_reconciler;
pub mod failover_state_machine;

// RedisProxy and RedisShake controllers
pub mod proxy_reconciler;
pub mod shake_reconciler;
