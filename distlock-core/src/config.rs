//! Lock configuration and builder

use crate::error::{LockError, LockResult};
use crate::lock::LockHandle;
use crate::script::ScriptCache;
use crate::stores::LockStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default namespace prefix for resource keys
pub const DEFAULT_NAMESPACE: &str = "distlock";

/// Default lock time to live
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default interval between polls while waiting
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(1000);

/// Configuration for one lock handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Key prefix shared by related locks
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Logical lock name
    pub name: String,
    /// Expiry of an unrenewed lock, in whole seconds on the wire
    #[serde(with = "duration_secs", default = "default_ttl")]
    pub ttl: Duration,
    /// Sleep between attempts in `wait_until_unlock` and `acquire_timeout`
    #[serde(with = "duration_ms", default = "default_poll_period")]
    pub poll_period: Duration,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_poll_period() -> Duration {
    DEFAULT_POLL_PERIOD
}

impl LockConfig {
    /// Create a configuration with defaults for everything but the name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: default_namespace(),
            name: name.into(),
            ttl: DEFAULT_TTL,
            poll_period: DEFAULT_POLL_PERIOD,
        }
    }

    /// Load configuration for `name` from environment variables.
    ///
    /// Reads `DISTLOCK_NAMESPACE`, `DISTLOCK_TTL_SECS` and `DISTLOCK_POLL_MS`;
    /// unset or unparsable values keep their defaults.
    pub fn from_env(name: impl Into<String>) -> Self {
        let mut config = Self::new(name);

        if let Ok(namespace) = std::env::var("DISTLOCK_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Ok(ttl) = std::env::var("DISTLOCK_TTL_SECS")
            && let Ok(secs) = ttl.parse() {
                config.ttl = Duration::from_secs(secs);
            }

        if let Ok(poll) = std::env::var("DISTLOCK_POLL_MS")
            && let Ok(ms) = poll.parse() {
                config.poll_period = Duration::from_millis(ms);
            }

        config
    }

    /// Store key of the lock record: `namespace:name`
    pub fn resource_key(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    /// Check the configuration can drive the protocol
    pub fn validate(&self) -> LockResult<()> {
        if self.name.is_empty() {
            return Err(LockError::config("lock name must not be empty"));
        }
        if self.namespace.is_empty() {
            return Err(LockError::config("namespace must not be empty"));
        }
        // keep-alive renews with whole-second expiry
        if self.ttl < Duration::from_secs(1) || self.ttl.subsec_nanos() != 0 {
            return Err(LockError::config(format!(
                "ttl must be a whole number of seconds, at least 1s, got {:?}",
                self.ttl
            )));
        }
        if self.poll_period.is_zero() {
            return Err(LockError::config("poll period must be non-zero"));
        }
        Ok(())
    }
}

/// Distributed lock builder
pub struct LockBuilder {
    config: LockConfig,
    scripts: Option<Arc<ScriptCache>>,
}

impl LockBuilder {
    /// Create new lock builder
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(LockConfig::new(name))
    }

    /// Start from an existing configuration
    pub fn from_config(config: LockConfig) -> Self {
        Self {
            config,
            scripts: None,
        }
    }

    /// Set the key namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set TTL. Must be a whole number of seconds, at least one.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Set the poll period
    pub fn poll_period(mut self, period: Duration) -> Self {
        self.config.poll_period = period;
        self
    }

    /// Use a dedicated script cache instead of [`ScriptCache::global`]
    pub fn script_cache(mut self, scripts: Arc<ScriptCache>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Build the lock handle
    pub fn build(self, store: Arc<dyn LockStore>) -> LockResult<LockHandle> {
        self.config.validate()?;
        let scripts = self.scripts.unwrap_or_else(ScriptCache::global);
        Ok(LockHandle::from_parts(self.config, store, scripts))
    }

    /// Build the lock handle and make sure its scripts are registered
    pub async fn connect(self, store: Arc<dyn LockStore>) -> LockResult<LockHandle> {
        let lock = self.build(store)?;
        lock.preload_scripts().await?;
        Ok(lock)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
