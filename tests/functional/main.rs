// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the RedisFailover check/heal pass.
//!
//! The real `check_and_heal` runs against an in-memory topology of Redis
//! data nodes and Sentinels. No Kubernetes cluster or Redis server is
//! needed.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_fresh_topology_elects_oldest
//! ```
//!
//! ## Test Categories
//!
//! - **Topology tests**: convergence from boot for several sizes
//! - **Scenario tests**: split-brain, drift, stale sentinels, unreachable nodes
//! - **Healer tests**: repeating a corrective action is harmless

mod healer_tests;
mod mock_state;
mod scenario_tests;
mod topology_tests;

pub use mock_state::*;
