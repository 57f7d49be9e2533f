//! Redis lock store
//!
//! Uses Redis as the shared store for locks across processes and machines.
//! Requires the `redis` feature to be enabled.

use crate::error::{LockError, LockResult};
use crate::stores::LockStore;
use async_trait::async_trait;
use distlock_redis::{RedisConfig, RedisError, RedisService};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Redis-backed lock store
pub struct RedisLockStore {
    redis: Arc<RedisService>,
}

impl RedisLockStore {
    /// Wrap an existing Redis service
    pub fn new(redis: Arc<RedisService>) -> Self {
        Self { redis }
    }

    /// Connect to Redis and create a store
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be built or the server does not answer PING.
    pub async fn connect(config: RedisConfig) -> LockResult<Self> {
        debug!(url = %config.url, "Connecting to Redis for locking");
        let redis = RedisService::new(config).await.map_err(classify)?;
        Ok(Self::new(Arc::new(redis)))
    }

    /// The underlying Redis service
    pub fn service(&self) -> &Arc<RedisService> {
        &self.redis
    }
}

/// Sort a Redis failure into the lock error kinds
fn classify(err: RedisError) -> LockError {
    if err.is_no_script() {
        LockError::NoScript(err.to_string())
    } else if matches!(err, RedisError::Timeout) {
        LockError::StoreTimeout
    } else {
        LockError::Redis(err)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool> {
        self.redis.set_nx_px(key, value, ttl).await.map_err(classify)
    }

    async fn get(&self, key: &str) -> LockResult<Option<String>> {
        self.redis.get_value(key).await.map_err(classify)
    }

    async fn script_load(&self, body: &str) -> LockResult<String> {
        self.redis.script_load(body).await.map_err(classify)
    }

    async fn script_exists(&self, sha: &str) -> LockResult<bool> {
        self.redis.script_exists(sha).await.map_err(classify)
    }

    async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[&str]) -> LockResult<i64> {
        self.redis
            .eval_sha(sha, keys, args)
            .await
            .map_err(classify)?
            .ok_or_else(|| LockError::unexpected(format!("script {sha} returned nil")))
    }

    async fn replace(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()> {
        self.redis.replace_px(key, value, ttl).await.map_err(classify)
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore")
            .field("redis", &self.redis)
            .finish()
    }
}
