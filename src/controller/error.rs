//! Error types for the controllers.
//!
//! Defines custom error types with classification for retry behavior. The
//! failover-specific variants mirror the outcomes of a check/heal pass:
//! some mean "still converging" and only requeue, others surface as a
//! failed status.

use std::time::Duration;
use thiserror::Error;

use crate::client::RedisError;

/// Requeue delay for the waiting states.
pub const WAITING_REQUEUE: Duration = Duration::from_secs(20);

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("{0}")]
    Validation(String),

    /// Target object or pod is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// A node did not answer in time
    #[error("{node} unreachable: {source}")]
    Unreachable {
        node: String,
        #[source]
        source: RedisError,
    },

    /// Declared and actual cardinality differ
    #[error("{0}")]
    CountMismatch(String),

    /// More than one node reports itself as master
    #[error("more than one master, fix manually ({masters} masters)")]
    SplitBrain { masters: usize },

    /// Live configuration differs from the declared one after healing
    #[error("{0}")]
    Drift(String),

    /// A bounded wait ran out
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Map a node error, keeping unreachable nodes distinct from nodes
    /// that answered with an error.
    pub fn from_node(node: &str, err: RedisError) -> Self {
        if err.is_unreachable() {
            Error::Unreachable {
                node: node.to_string(),
                source: err,
            }
        } else {
            Error::Transient(format!("{node}: {err}"))
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
            || matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Whether this error means "still converging" rather than a failure
    pub fn is_waiting(&self) -> bool {
        matches!(self, Error::CountMismatch(_))
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                let retryable_code = |code: u16| code >= 500 || code == 429 || code == 404;
                matches!(e, kube::Error::Api(api_err) if retryable_code(api_err.code))
                    || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_)
            | Error::NotFound(_)
            | Error::Unreachable { .. }
            | Error::CountMismatch(_)
            | Error::Drift(_)
            | Error::Timeout { .. } => true,
            // Keeps surfacing on every periodic pass until fixed out-of-band.
            Error::SplitBrain { .. } => true,
            Error::Validation(_) | Error::Permanent(_) | Error::MissingField(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_waiting() {
            WAITING_REQUEUE
        } else if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(3600)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
