//! Short-lived Redis/Sentinel connection built on the fred crate.
//!
//! Every check or heal step opens one connection, issues its commands and
//! closes it again. Each command is bounded by a timeout so a stuck node
//! only stalls the pass until the timeout fires.

use std::future::Future;
use std::time::Duration;

use fred::prelude::*;
use fred::types::{ClusterHash, CustomCommand, FromValue, InfoKind, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use super::parsing::ParseError;

/// Errors that can occur while talking to a Redis or Sentinel node.
#[derive(Error, Debug)]
pub enum RedisError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Redis error: {0}")]
    Redis(#[from] fred::error::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },
}

impl RedisError {
    /// Whether the node could not be reached at all (as opposed to
    /// answering with an error).
    pub fn is_unreachable(&self) -> bool {
        match self {
            RedisError::Connection(_) | RedisError::Timeout { .. } => true,
            RedisError::Redis(e) => matches!(
                e.kind(),
                fred::error::ErrorKind::IO
                    | fred::error::ErrorKind::Timeout
                    | fred::error::ErrorKind::Canceled
            ),
            _ => false,
        }
    }
}

/// Connection parameters for a single node.
#[derive(Clone, Debug)]
pub struct RedisClientConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub connection_timeout: Duration,
    pub command_timeout: Duration,
}

impl RedisClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
        }
    }

    /// Set password. `None` leaves the connection unauthenticated.
    pub fn with_password(mut self, password: Option<&str>) -> Self {
        self.password = password.map(str::to_string);
        self
    }

    pub fn with_timeouts(mut self, connection: Duration, command: Duration) -> Self {
        self.connection_timeout = connection;
        self.command_timeout = command;
        self
    }
}

/// One connection to one Redis or Sentinel instance.
pub struct RedisClient {
    client: Client,
    config: RedisClientConfig,
}

impl RedisClient {
    /// Connect to a single node.
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub async fn connect(config: RedisClientConfig) -> Result<Self, RedisError> {
        if config.host.is_empty() {
            return Err(RedisError::Connection("empty host".to_string()));
        }

        let redis_config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(config.host.as_str(), config.port),
            },
            password: config.password.clone(),
            ..Default::default()
        };

        let command_timeout = config.command_timeout;
        let connection_timeout = config.connection_timeout;
        let client = Builder::from_config(redis_config)
            .with_performance_config(|perf| {
                perf.default_command_timeout = command_timeout;
            })
            .with_connection_config(|conn| {
                conn.connection_timeout = connection_timeout;
            })
            .build()?;

        match tokio::time::timeout(connection_timeout, client.init()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(RedisError::Connection(e.to_string())),
            Err(_) => {
                return Err(RedisError::Timeout {
                    operation: format!("connect {}:{}", config.host, config.port),
                    duration: connection_timeout,
                });
            }
        }

        debug!("Connected");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RedisClientConfig {
        &self.config
    }

    /// Close the connection.
    pub async fn close(&self) -> Result<(), RedisError> {
        self.client.quit().await?;
        Ok(())
    }

    /// `INFO <section>` for a well-known section.
    #[instrument(skip(self))]
    pub async fn info(&self, section: InfoKind) -> Result<String, RedisError> {
        self.bounded("INFO", self.client.info(Some(section))).await
    }

    /// `INFO sentinel`, which fred has no typed section for.
    #[instrument(skip(self))]
    pub async fn info_sentinel(&self) -> Result<String, RedisError> {
        self.command("INFO", &["sentinel"]).await
    }

    /// Issue an arbitrary command. Arguments are sent as bulk strings.
    pub async fn command<R>(&self, name: &'static str, args: &[&str]) -> Result<R, RedisError>
    where
        R: FromValue,
    {
        let args: Vec<Value> = args.iter().map(|a| Value::from(*a)).collect();
        let cmd = CustomCommand::new_static(name, ClusterHash::FirstKey, false);
        self.bounded(name, self.client.custom(cmd, args)).await
    }

    async fn bounded<R, F>(&self, operation: &str, fut: F) -> Result<R, RedisError>
    where
        F: Future<Output = Result<R, fred::error::Error>>,
    {
        let duration = self.config.command_timeout;
        match tokio::time::timeout(duration, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RedisError::Timeout {
                operation: operation.to_string(),
                duration,
            }),
        }
    }
}
