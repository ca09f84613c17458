//! Typed views of what Redis and Sentinel report about themselves.

use std::fmt;

/// Replication role reported by a data node (`INFO replication`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleInfo {
    /// The node reports `role:master`.
    pub is_master: bool,
    /// Upstream master address for replicas (`master_host`).
    pub master_host: Option<String>,
}

impl RoleInfo {
    /// A node that considers itself primary.
    pub fn master() -> Self {
        Self {
            is_master: true,
            master_host: None,
        }
    }

    /// A replica following `host`.
    pub fn replica_of(host: impl Into<String>) -> Self {
        Self {
            is_master: false,
            master_host: Some(host.into()),
        }
    }

    /// Whether this node follows `master`. Masters never follow anyone.
    pub fn follows(&self, master: &str) -> bool {
        !self.is_master && self.master_host.as_deref() == Some(master)
    }
}

/// A sentinel's local, possibly stale, view of the monitored group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArbiterView {
    /// Address of the master the sentinel monitors, if it monitors one.
    pub monitored_master: Option<String>,
    /// Replicas the sentinel currently tracks.
    pub known_replicas: i32,
    /// Sentinels the sentinel knows about, itself included.
    pub known_sentinels: i32,
}

/// Credential material resolved from the auth Secret for one pass.
///
/// The password is never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    password: Option<String>,
}

impl AuthConfig {
    /// No authentication.
    pub fn none() -> Self {
        Self::default()
    }

    /// Authenticate with `password`. An empty password means no authentication.
    pub fn with_password(password: impl Into<String>) -> Self {
        let password = password.into();
        Self {
            password: if password.is_empty() {
                None
            } else {
                Some(password)
            },
        }
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn is_set(&self) -> bool {
        self.password.is_some()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
