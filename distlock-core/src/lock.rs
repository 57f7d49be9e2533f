//! Distributed locks over a shared TTL store

use crate::config::LockConfig;
use crate::error::{LockError, LockResult};
use crate::owner::generate_owner_id;
use crate::script::{Script, ScriptCache, ScriptOutcome};
use crate::status::LockStatus;
use crate::stores::LockStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Distributed lock trait
///
/// Every operation reports the lock as seen by the calling handle. An `Err`
/// means the outcome is unknown; check it before looking at any flags.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Resource key of the lock record
    fn key(&self) -> &str;

    /// Read the current record
    async fn get_lock_status(&self) -> LockResult<LockStatus>;

    /// Take the lock if it is free. `is_locked` is always `true` in the
    /// result; `is_owner` tells whether this handle won.
    async fn try_lock(&self) -> LockResult<LockStatus>;

    /// Release the lock if this handle holds it.
    ///
    /// - free to begin with: `is_locked = false, is_owner = false`
    /// - held by another owner: `is_locked = true, is_owner = false`
    /// - released: `is_locked = false, is_owner = true`
    async fn try_unlock(&self) -> LockResult<LockStatus>;

    /// Take the lock regardless of the current holder.
    ///
    /// Breaks mutual exclusion on purpose; only for reclaiming a lock whose
    /// holder is presumed dead.
    async fn try_force_lock(&self) -> LockResult<LockStatus>;

    /// Reset the expiry of a lock this handle holds.
    ///
    /// - free: `is_locked = false, is_owner = false`
    /// - held by another owner: `is_locked = true, is_owner = false`
    /// - renewed: `is_locked = true, is_owner = true`
    async fn keep_alive(&self) -> LockResult<LockStatus>;

    /// Poll `try_unlock` until the lock is free or `deadline` passes
    async fn wait_until_unlock(&self, deadline: Instant) -> LockResult<()>;
}

struct LockInner {
    key: String,
    owner_id: String,
    ttl: Duration,
    ttl_secs: String,
    poll_period: Duration,
    store: Arc<dyn LockStore>,
    scripts: Arc<ScriptCache>,
    /// Serializes protocol operations issued through this handle
    local: Mutex<()>,
}

/// A lock handle: one `(resource key, owner id, ttl)` tuple.
///
/// Clones share the owner id and the per-handle serialization, so they are
/// the same holder. Separate handles for one key (even in one process) are
/// separate holders and compete through the store.
#[derive(Clone)]
pub struct LockHandle {
    inner: Arc<LockInner>,
}

impl LockHandle {
    /// Create new lock handle for `namespace:name` with the process-wide script cache
    ///
    /// # Examples
    ///
    /// ```rust
    /// use distlock_core::{LockHandle, MemoryStore};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let store = Arc::new(MemoryStore::new());
    /// let lock = LockHandle::new("jobs", "nightly-report", Duration::from_secs(30), store)?;
    /// assert_eq!(lock.key(), "jobs:nightly-report");
    /// # Ok::<(), distlock_core::LockError>(())
    /// ```
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        ttl: Duration,
        store: Arc<dyn LockStore>,
    ) -> LockResult<Self> {
        let mut config = LockConfig::new(name);
        config.namespace = namespace.into();
        config.ttl = ttl;
        config.validate()?;
        Ok(Self::from_parts(config, store, ScriptCache::global()))
    }

    pub(crate) fn from_parts(
        config: LockConfig,
        store: Arc<dyn LockStore>,
        scripts: Arc<ScriptCache>,
    ) -> Self {
        let owner_id = generate_owner_id();
        let key = config.resource_key();
        debug!(key = %key, owner = %owner_id, store = store.store_type(), "Created lock handle");

        Self {
            inner: Arc::new(LockInner {
                key,
                owner_id,
                ttl: config.ttl,
                ttl_secs: config.ttl.as_secs().to_string(),
                poll_period: config.poll_period,
                store,
                scripts,
                local: Mutex::new(()),
            }),
        }
    }

    /// Get the lock key
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Get the owner id of this handle
    pub fn owner_id(&self) -> &str {
        &self.inner.owner_id
    }

    /// Get the TTL
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Get the poll period
    pub fn poll_period(&self) -> Duration {
        self.inner.poll_period
    }

    /// Register the lock scripts with the store ahead of first use
    pub async fn preload_scripts(&self) -> LockResult<()> {
        self.inner.scripts.preload(&*self.inner.store).await
    }

    /// Try to acquire the lock (non-blocking)
    pub async fn try_acquire(&self) -> LockResult<Option<LockGuard>> {
        let status = self.try_lock().await?;
        Ok(status.is_owner.then(|| LockGuard::new(self.clone())))
    }

    /// Acquire with timeout, retrying every poll period
    pub async fn acquire_timeout(&self, timeout: Duration) -> LockResult<LockGuard> {
        let start = Instant::now();

        loop {
            if let Some(guard) = self.try_acquire().await? {
                return Ok(guard);
            }
            if start.elapsed() >= timeout {
                return Err(LockError::DeadlineExceeded {
                    key: self.inner.key.clone(),
                });
            }
            tokio::time::sleep(self.inner.poll_period).await;
        }
    }

    async fn read_status(&self) -> LockResult<LockStatus> {
        let current = self.inner.store.get(&self.inner.key).await?;
        Ok(LockStatus {
            is_locked: current.is_some(),
            is_owner: current.as_deref() == Some(self.inner.owner_id.as_str()),
        })
    }

    /// Run a lock script, reloading it once if the store has lost it
    async fn run_script(&self, script: Script, args: &[&str]) -> LockResult<ScriptOutcome> {
        let inner = &*self.inner;
        let keys = [inner.key.as_str()];

        let sha = inner.scripts.ensure_registered(&*inner.store, script).await?;
        let code = match inner.store.eval_sha(&sha, &keys, args).await {
            Err(LockError::NoScript(_)) => {
                warn!(key = %inner.key, script = script.name(), sha = %sha, "Script reference is stale, reloading");
                inner.scripts.invalidate(script).await;
                let sha = inner.scripts.ensure_registered(&*inner.store, script).await?;
                inner.store.eval_sha(&sha, &keys, args).await?
            }
            other => other?,
        };

        ScriptOutcome::from_code(code)
    }
}

#[async_trait]
impl DistributedLock for LockHandle {
    fn key(&self) -> &str {
        LockHandle::key(self)
    }

    async fn get_lock_status(&self) -> LockResult<LockStatus> {
        let _local = self.inner.local.lock().await;
        self.read_status().await
    }

    async fn try_lock(&self) -> LockResult<LockStatus> {
        let _local = self.inner.local.lock().await;
        let inner = &*self.inner;

        let acquired = inner
            .store
            .set_if_absent(&inner.key, &inner.owner_id, inner.ttl)
            .await?;

        if acquired {
            info!(key = %inner.key, owner = %inner.owner_id, "Acquired lock");
        } else {
            debug!(key = %inner.key, "Failed to acquire lock (already held)");
        }

        Ok(LockStatus::new(true, acquired))
    }

    async fn try_unlock(&self) -> LockResult<LockStatus> {
        let _local = self.inner.local.lock().await;
        let outcome = self
            .run_script(Script::Unlock, &[self.inner.owner_id.as_str()])
            .await?;

        let status = match outcome {
            ScriptOutcome::NotLocked => LockStatus::unlocked(),
            ScriptOutcome::Applied => {
                debug!(key = %self.inner.key, "Released lock");
                LockStatus::new(false, true)
            }
            ScriptOutcome::Contested => {
                debug!(key = %self.inner.key, "Lock held by another owner, not released");
                LockStatus::contested()
            }
        };
        Ok(status)
    }

    async fn try_force_lock(&self) -> LockResult<LockStatus> {
        let _local = self.inner.local.lock().await;
        let inner = &*self.inner;

        inner
            .store
            .replace(&inner.key, &inner.owner_id, inner.ttl)
            .await?;
        warn!(key = %inner.key, owner = %inner.owner_id, "Forced lock takeover");

        self.read_status().await
    }

    async fn keep_alive(&self) -> LockResult<LockStatus> {
        let _local = self.inner.local.lock().await;
        let outcome = self
            .run_script(
                Script::KeepAlive,
                &[self.inner.owner_id.as_str(), self.inner.ttl_secs.as_str()],
            )
            .await?;

        let status = match outcome {
            ScriptOutcome::NotLocked => {
                warn!(key = %self.inner.key, "Keep-alive found no lock to renew");
                LockStatus::unlocked()
            }
            ScriptOutcome::Applied => {
                debug!(key = %self.inner.key, ttl = ?self.inner.ttl, "Renewed lock");
                LockStatus::owned()
            }
            ScriptOutcome::Contested => {
                warn!(key = %self.inner.key, "Keep-alive refused, lock held by another owner");
                LockStatus::contested()
            }
        };
        Ok(status)
    }

    async fn wait_until_unlock(&self, deadline: Instant) -> LockResult<()> {
        loop {
            if Instant::now() > deadline {
                return Err(LockError::DeadlineExceeded {
                    key: self.inner.key.clone(),
                });
            }

            if !self.try_unlock().await?.is_locked {
                return Ok(());
            }

            tokio::time::sleep(self.inner.poll_period).await;
        }
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.inner.key)
            .field("owner_id", &self.inner.owner_id)
            .field("ttl", &self.inner.ttl)
            .field("store", &self.inner.store.store_type())
            .finish()
    }
}

/// Lock guard that releases on drop
///
/// Returned by [`LockHandle::try_acquire`] and [`LockHandle::acquire_timeout`].
/// The lock still expires after its TTL unless renewed with
/// [`keep_alive`](LockGuard::keep_alive).
pub struct LockGuard {
    lock: LockHandle,
    released: bool,
}

impl LockGuard {
    fn new(lock: LockHandle) -> Self {
        Self {
            lock,
            released: false,
        }
    }

    /// The handle holding the lock
    pub fn lock(&self) -> &LockHandle {
        &self.lock
    }

    /// Renew the lock's TTL
    pub async fn keep_alive(&self) -> LockResult<LockStatus> {
        self.lock.keep_alive().await
    }

    /// Manually release the lock
    pub async fn release(mut self) -> LockResult<LockStatus> {
        self.released = true;
        self.lock.try_unlock().await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        // Best effort release on drop
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.lock.key(), "Lock guard dropped outside a runtime, lock left to expire");
            return;
        };

        let lock = self.lock.clone();
        runtime.spawn(async move {
            if let Err(e) = lock.try_unlock().await {
                warn!(key = %lock.key(), error = %e, "Failed to release lock on drop");
            }
        });
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.lock.key())
            .field("released", &self.released)
            .finish()
    }
}
