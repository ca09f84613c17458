//! Runtime operations against individual Redis and Sentinel nodes.
//!
//! `NodeOps` is the capability surface the checker and healer use. The
//! production implementation opens one short-lived fred connection per call;
//! tests substitute an in-memory topology.

use std::collections::HashMap;
use std::time::Duration;

use fred::types::InfoKind;
use tracing::{debug, info, instrument};

use super::parsing::{parse_config_pairs, parse_role, parse_sentinel_info};
use super::redis_client::{RedisClient, RedisClientConfig, RedisError};
use super::types::{ArbiterView, AuthConfig, RoleInfo};
use crate::crd::{MASTER_GROUP, REDIS_PORT, SENTINEL_PORT};

/// Operations on a single Redis data node or Sentinel, addressed by pod IP.
///
/// Every call carries the failover's credentials. Sentinel calls receive
/// them too; an implementation whose sentinels run without a password only
/// needs them to register `auth-pass` on `sentinel_monitor`.
pub trait NodeOps {
    /// Ask a data node whether it is master and, if not, who its upstream is.
    fn query_role(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<RoleInfo, RedisError>> + Send;

    /// Ask a sentinel which master it monitors and how many replicas and
    /// sentinels it currently tracks.
    fn query_arbiter_view(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<ArbiterView, RedisError>> + Send;

    /// `SLAVEOF NO ONE`.
    fn promote(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<(), RedisError>> + Send;

    /// `SLAVEOF <master> 6379`.
    fn replicate_of(
        &self,
        ip: &str,
        master: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<(), RedisError>> + Send;

    /// Replace the sentinel's monitor registration with `master` at `quorum`.
    fn sentinel_monitor(
        &self,
        ip: &str,
        master: &str,
        quorum: u32,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<(), RedisError>> + Send;

    /// `SENTINEL RESET *`: drop and rebuild the in-memory view.
    fn sentinel_reset(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<(), RedisError>> + Send;

    /// `CONFIG GET *` on a data node.
    fn config_get_all(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>, RedisError>> + Send;

    /// `CONFIG SET <key> <value>` on a data node.
    fn config_set(
        &self,
        ip: &str,
        key: &str,
        value: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<(), RedisError>> + Send;

    /// `SENTINEL MASTER mymaster` as a key/value map.
    fn sentinel_master_config(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>, RedisError>> + Send;

    /// `SENTINEL SET mymaster <key> <value>`.
    fn sentinel_set(
        &self,
        ip: &str,
        key: &str,
        value: &str,
        auth: &AuthConfig,
    ) -> impl std::future::Future<Output = Result<(), RedisError>> + Send;
}

/// `NodeOps` over real connections.
#[derive(Clone, Debug)]
pub struct FredNodeOps {
    connection_timeout: Duration,
    command_timeout: Duration,
}

impl Default for FredNodeOps {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl FredNodeOps {
    pub fn new(connection_timeout: Duration, command_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            command_timeout,
        }
    }

    async fn connect_redis(&self, ip: &str, auth: &AuthConfig) -> Result<RedisClient, RedisError> {
        let config = RedisClientConfig::new(ip, REDIS_PORT)
            .with_password(auth.password())
            .with_timeouts(self.connection_timeout, self.command_timeout);
        RedisClient::connect(config).await
    }

    /// Generated sentinel configs set no `requirepass`, so the connection
    /// never authenticates.
    async fn connect_sentinel(&self, ip: &str) -> Result<RedisClient, RedisError> {
        let config = RedisClientConfig::new(ip, SENTINEL_PORT)
            .with_timeouts(self.connection_timeout, self.command_timeout);
        RedisClient::connect(config).await
    }
}

async fn release(client: RedisClient) {
    if let Err(e) = client.close().await {
        debug!(host = %client.config().host, error = %e, "Failed to close connection");
    }
}

fn expect_ok(command: &str, reply: String) -> Result<(), RedisError> {
    if reply.eq_ignore_ascii_case("OK") {
        Ok(())
    } else {
        Err(RedisError::UnexpectedReply {
            command: command.to_string(),
            reply,
        })
    }
}

impl NodeOps for FredNodeOps {
    #[instrument(skip(self, auth))]
    async fn query_role(&self, ip: &str, auth: &AuthConfig) -> Result<RoleInfo, RedisError> {
        let client = self.connect_redis(ip, auth).await?;
        let result = client.info(InfoKind::Replication).await;
        release(client).await;
        Ok(parse_role(&result?)?)
    }

    #[instrument(skip(self, _auth))]
    async fn query_arbiter_view(
        &self,
        ip: &str,
        _auth: &AuthConfig,
    ) -> Result<ArbiterView, RedisError> {
        let client = self.connect_sentinel(ip).await?;
        let result = client.info_sentinel().await;
        release(client).await;
        Ok(parse_sentinel_info(&result?)?)
    }

    #[instrument(skip(self, auth))]
    async fn promote(&self, ip: &str, auth: &AuthConfig) -> Result<(), RedisError> {
        let client = self.connect_redis(ip, auth).await?;
        let result: Result<String, _> = client.command("SLAVEOF", &["NO", "ONE"]).await;
        release(client).await;
        expect_ok("SLAVEOF NO ONE", result?)?;
        info!(node = %ip, "Promoted to master");
        Ok(())
    }

    #[instrument(skip(self, auth))]
    async fn replicate_of(
        &self,
        ip: &str,
        master: &str,
        auth: &AuthConfig,
    ) -> Result<(), RedisError> {
        let port = REDIS_PORT.to_string();
        let client = self.connect_redis(ip, auth).await?;
        let result: Result<String, _> = client.command("SLAVEOF", &[master, &port]).await;
        release(client).await;
        expect_ok("SLAVEOF", result?)?;
        info!(node = %ip, master = %master, "Replicating from master");
        Ok(())
    }

    #[instrument(skip(self, auth))]
    async fn sentinel_monitor(
        &self,
        ip: &str,
        master: &str,
        quorum: u32,
        auth: &AuthConfig,
    ) -> Result<(), RedisError> {
        let port = REDIS_PORT.to_string();
        let quorum = quorum.to_string();
        let client = self.connect_sentinel(ip).await?;

        // The group may not exist yet; a failed REMOVE is not an error.
        let removed: Result<String, _> =
            client.command("SENTINEL", &["REMOVE", MASTER_GROUP]).await;
        if let Err(e) = removed {
            debug!(sentinel = %ip, error = %e, "No previous monitor to remove");
        }

        let result = async {
            let reply: String = client
                .command("SENTINEL", &["MONITOR", MASTER_GROUP, master, &port, &quorum])
                .await?;
            expect_ok("SENTINEL MONITOR", reply)?;
            if let Some(password) = auth.password() {
                let reply: String = client
                    .command("SENTINEL", &["SET", MASTER_GROUP, "auth-pass", password])
                    .await?;
                expect_ok("SENTINEL SET auth-pass", reply)?;
            }
            Ok::<(), RedisError>(())
        }
        .await;
        release(client).await;
        result?;

        info!(sentinel = %ip, master = %master, quorum = %quorum, "Sentinel monitor reconfigured");
        Ok(())
    }

    #[instrument(skip(self, _auth))]
    async fn sentinel_reset(&self, ip: &str, _auth: &AuthConfig) -> Result<(), RedisError> {
        let client = self.connect_sentinel(ip).await?;
        let result: Result<i64, _> = client.command("SENTINEL", &["RESET", "*"]).await;
        release(client).await;
        let reset = result?;
        info!(sentinel = %ip, groups = reset, "Sentinel view reset");
        Ok(())
    }

    #[instrument(skip(self, auth))]
    async fn config_get_all(
        &self,
        ip: &str,
        auth: &AuthConfig,
    ) -> Result<HashMap<String, String>, RedisError> {
        let client = self.connect_redis(ip, auth).await?;
        let result: Result<Vec<String>, _> = client.command("CONFIG", &["GET", "*"]).await;
        release(client).await;
        Ok(parse_config_pairs(&result?))
    }

    #[instrument(skip(self, value, auth))]
    async fn config_set(
        &self,
        ip: &str,
        key: &str,
        value: &str,
        auth: &AuthConfig,
    ) -> Result<(), RedisError> {
        let client = self.connect_redis(ip, auth).await?;
        let result: Result<String, _> = client.command("CONFIG", &["SET", key, value]).await;
        release(client).await;
        expect_ok("CONFIG SET", result?)
    }

    #[instrument(skip(self, _auth))]
    async fn sentinel_master_config(
        &self,
        ip: &str,
        _auth: &AuthConfig,
    ) -> Result<HashMap<String, String>, RedisError> {
        let client = self.connect_sentinel(ip).await?;
        let result: Result<Vec<String>, _> =
            client.command("SENTINEL", &["MASTER", MASTER_GROUP]).await;
        release(client).await;
        Ok(parse_config_pairs(&result?))
    }

    #[instrument(skip(self, value, _auth))]
    async fn sentinel_set(
        &self,
        ip: &str,
        key: &str,
        value: &str,
        _auth: &AuthConfig,
    ) -> Result<(), RedisError> {
        let client = self.connect_sentinel(ip).await?;
        let result: Result<String, _> = client
            .command("SENTINEL", &["SET", MASTER_GROUP, key, value])
            .await;
        release(client).await;
        expect_ok("SENTINEL SET", result?)
    }
}
