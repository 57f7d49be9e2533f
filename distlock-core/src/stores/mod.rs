//! Lock storage backends
//!
//! This module provides the store capability the lock protocol runs on:
//!
//! - **Memory**: In-process emulation with TTLs and a script table (testing, single process)
//! - **Redis**: Shared store for locks across processes and machines

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisLockStore;

use crate::error::LockResult;
use async_trait::async_trait;
use std::time::Duration;

/// Trait for lock storage backends
///
/// Implementations must make `set_if_absent`, `eval_sha` and `replace`
/// atomic with respect to every other call on the same key.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Write `value` at `key` with expiry `ttl`, only if `key` is absent.
    /// Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> LockResult<bool>;

    /// Read `key`. Absence is `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> LockResult<Option<String>>;

    /// Register a script body, returning its reference
    async fn script_load(&self, body: &str) -> LockResult<String>;

    /// Check whether a script reference is known to the store
    async fn script_exists(&self, sha: &str) -> LockResult<bool>;

    /// Run a registered script that returns an integer.
    ///
    /// Fails with [`LockError::NoScript`](crate::LockError::NoScript) when
    /// the reference is unknown and [`LockError::Unexpected`](crate::LockError::Unexpected)
    /// on a nil reply.
    async fn eval_sha(&self, sha: &str, keys: &[&str], args: &[&str]) -> LockResult<i64>;

    /// In one transaction: delete `key`, then set it to `value` with `ttl`
    async fn replace(&self, key: &str, value: &str, ttl: Duration) -> LockResult<()>;

    /// Get store type name for debugging
    fn store_type(&self) -> &'static str;
}
