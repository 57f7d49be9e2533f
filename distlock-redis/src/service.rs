//! Redis service exposing the primitives a lock store needs.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::{info, trace};

use crate::{RedisConfig, RedisError, Result};

/// Pool of multiplexed connections to one Redis server.
pub type RedisPool = Pool<RedisConnectionManager>;

/// A connection checked out of a [`RedisPool`].
pub type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

/// Redis service providing a connection pool and the lock-related commands.
///
/// Every command is bounded by [`RedisConfig::command_timeout`]; a call that
/// does not finish in time (including waiting for a pooled connection)
/// fails with [`RedisError::Timeout`].
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
}

impl RedisService {
    /// Connect to Redis.
    ///
    /// Builds the pool and answers only once the server replied to PING
    /// within the command timeout.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let manager = RedisConnectionManager::new(config.connection_url())
            .map_err(|e| RedisError::Config(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Pool(e.to_string()))?;

        let service = Self { config, pool };
        service.health_check().await?;

        info!(
            url = %service.config.url,
            pool_size = service.config.pool_size,
            "Connected to Redis"
        );
        Ok(service)
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Check a connection out of the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        Ok(self.pool.get().await?)
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        self.timed(async {
            let mut conn = self.get().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| RedisError::Connection(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.command_timeout, fut)
            .await
            .map_err(|_| RedisError::Timeout)?
    }

    /// `SET key value NX PX ttl`. Returns `true` if the key was written.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.timed(async {
            let mut conn = self.get().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .query_async(&mut *conn)
                .await?;
            trace!(key = %key, written = reply.is_some(), "SET NX PX");
            Ok(reply.is_some())
        })
        .await
    }

    /// `GET key`. A missing key is `Ok(None)`.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.timed(async {
            let mut conn = self.get().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    /// `SCRIPT LOAD body`, returning the script's SHA1 digest.
    pub async fn script_load(&self, body: &str) -> Result<String> {
        self.timed(async {
            let mut conn = self.get().await?;
            let sha: String = redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(body)
                .query_async(&mut *conn)
                .await?;
            Ok(sha)
        })
        .await
    }

    /// `SCRIPT EXISTS sha`.
    pub async fn script_exists(&self, sha: &str) -> Result<bool> {
        self.timed(async {
            let mut conn = self.get().await?;
            let exists: Vec<bool> = redis::cmd("SCRIPT")
                .arg("EXISTS")
                .arg(sha)
                .query_async(&mut *conn)
                .await?;
            Ok(exists.first().copied().unwrap_or(false))
        })
        .await
    }

    /// `EVALSHA sha numkeys keys... args...` for scripts returning an integer.
    ///
    /// A nil reply is `Ok(None)`. An unknown digest fails with a Redis
    /// `NOSCRIPT` error, see [`RedisError::is_no_script`].
    pub async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[&str]) -> Result<Option<i64>> {
        self.timed(async {
            let mut conn = self.get().await?;
            let reply: Option<i64> = redis::cmd("EVALSHA")
                .arg(sha)
                .arg(keys.len())
                .arg(keys)
                .arg(args)
                .query_async(&mut *conn)
                .await?;
            Ok(reply)
        })
        .await
    }

    /// `MULTI; DEL key; SET key value PX ttl; EXEC`.
    pub async fn replace_px(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.timed(async {
            let mut conn = self.get().await?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .del(key)
                .ignore()
                .cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl.as_millis() as u64)
                .ignore();
            let _: () = pipe.query_async(&mut *conn).await?;
            Ok(())
        })
        .await
    }
}

impl std::fmt::Debug for RedisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisService")
            .field("url", &self.config.url)
            .field("command_timeout", &self.config.command_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_url_is_config_error() {
        let err = RedisService::new(RedisConfig::new("not a redis url"))
            .await
            .unwrap_err();
        assert!(matches!(err, RedisError::Config(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_within_timeouts() {
        let config = RedisConfig::builder()
            .url("redis://127.0.0.1:1")
            .min_idle(0)
            .connection_timeout(Duration::from_millis(200))
            .command_timeout(Duration::from_millis(300))
            .build();

        let start = std::time::Instant::now();
        let err = RedisService::new(config).await.unwrap_err();

        assert!(err.is_retryable(), "got {err:?}");
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    const EXPIRE_IF_OWNER: &str = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("pexpire", KEYS[1], ARGV[2])
        end
        return 0
    "#;

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_set_nx_and_replace() {
        let redis = RedisService::new(RedisConfig::from_env().build()).await.unwrap();
        let key = "distlock-redis:test:set_nx";
        let ttl = Duration::from_secs(5);

        redis.replace_px(key, "first", ttl).await.unwrap();
        assert!(!redis.set_nx_px(key, "second", ttl).await.unwrap());
        assert_eq!(redis.get_value(key).await.unwrap().as_deref(), Some("first"));

        redis.replace_px(key, "third", ttl).await.unwrap();
        assert_eq!(redis.get_value(key).await.unwrap().as_deref(), Some("third"));
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_script_roundtrip() {
        let redis = RedisService::new(RedisConfig::from_env().build()).await.unwrap();
        let key = "distlock-redis:test:script";

        let sha = redis.script_load(EXPIRE_IF_OWNER).await.unwrap();
        assert!(redis.script_exists(&sha).await.unwrap());

        redis.replace_px(key, "me", Duration::from_secs(5)).await.unwrap();
        let renewed = redis.eval_sha(&sha, &[key], &["me", "10000"]).await.unwrap();
        assert_eq!(renewed, Some(1));

        let err = redis
            .eval_sha("0000000000000000000000000000000000000000", &[key], &["me", "1"])
            .await
            .unwrap_err();
        assert!(err.is_no_script());
    }
}
