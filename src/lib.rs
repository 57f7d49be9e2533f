//! distlock - mutual-exclusion locks for distributed processes
//!
//! Many processes on many machines take turns on a shared resource by
//! coordinating through Redis (or an in-memory store inside one process).
//!
//! ```rust
//! use distlock::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let lock = LockHandle::new("jobs", "nightly-report", Duration::from_secs(30), store)?;
//!
//! if let Some(guard) = lock.try_acquire().await? {
//!     // critical section
//!     guard.release().await?;
//! }
//! # Ok::<(), LockError>(())
//! # }).unwrap();
//! ```
//!
//! With the `redis` feature:
//!
//! ```rust,ignore
//! use distlock::prelude::*;
//! use distlock::redis::RedisConfig;
//! use std::sync::Arc;
//!
//! let store = Arc::new(RedisLockStore::connect(RedisConfig::from_env().build()).await?);
//! let lock = LockBuilder::from_config(LockConfig::from_env("nightly-report"))
//!     .connect(store)
//!     .await?;
//! ```

// Re-export core functionality
pub use distlock_core::*;

// Re-export Redis connectivity
#[cfg(feature = "redis")]
pub use distlock_redis as redis;

/// Prelude for common imports
pub mod prelude {
    pub use distlock_core::{
        DistributedLock, LockBuilder, LockConfig, LockError, LockGuard, LockHandle, LockResult,
        LockStatus, LockStore, MemoryStore, poll_until, wait_for_status,
    };

    #[cfg(feature = "redis")]
    pub use distlock_core::RedisLockStore;
}

/// Initialize tracing for services using distlock.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`, and writes JSON
/// lines to stdout.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();
}

/// Initialize tracing with a custom log level.
pub fn init_tracing_with_level(level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::new(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
        .init();
}
