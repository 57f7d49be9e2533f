//! Distributed Locks over a Shared TTL Store
//!
//! This crate provides a mutual-exclusion lock that many processes on many
//! machines coordinate through one key-value store with per-key expiry.
//!
//! ## Features
//!
//! - **Owner Identity** - Each handle carries a random owner id; only that owner can release or renew
//! - **TTL Expiry** - A crashed holder's lock expires on its own
//! - **Atomic Scripts** - Compare-and-delete and compare-and-renew run server side, registered once per process
//! - **Script Recovery** - A store that lost its scripts gets them reloaded transparently
//! - **Force Takeover** - Reclaim a lock whose holder is presumed dead
//! - **Status Polling** - Wait for a lock to become free, or for any status condition
//! - **RAII Guards** - Optional guard that releases on drop
//!
//! ## Quick Start
//!
//! ```rust
//! use distlock_core::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store: Arc<dyn LockStore> = Arc::new(MemoryStore::new());
//!
//! let lock = LockBuilder::new("nightly-report")
//!     .namespace("jobs")
//!     .with_ttl(Duration::from_secs(30))
//!     .build(store.clone())?;
//!
//! let status = lock.try_lock().await?;
//! assert!(status.is_owner);
//!
//! // A second handle is a different owner
//! let other = LockBuilder::new("nightly-report").namespace("jobs").build(store)?;
//! assert!(other.get_lock_status().await?.is_contested());
//!
//! lock.keep_alive().await?;
//! lock.try_unlock().await?;
//! assert!(other.get_lock_status().await?.is_free());
//! # Ok::<(), LockError>(())
//! # }).unwrap();
//! ```
//!
//! ## Redis
//!
//! Enable the `redis` feature for [`RedisLockStore`], which runs the
//! protocol against a pooled Redis connection.

pub mod config;
pub mod error;
pub mod lock;
pub mod owner;
pub mod poll;
pub mod script;
pub mod status;
pub mod stores;

pub use config::{DEFAULT_NAMESPACE, DEFAULT_POLL_PERIOD, DEFAULT_TTL, LockBuilder, LockConfig};
pub use error::{LockError, LockResult};
pub use lock::{DistributedLock, LockGuard, LockHandle};
pub use owner::generate_owner_id;
pub use poll::{poll_until, wait_for_status};
pub use script::{Script, ScriptCache, ScriptOutcome};
pub use status::LockStatus;
#[cfg(feature = "redis")]
pub use stores::RedisLockStore;
pub use stores::{LockStore, MemoryStore};
