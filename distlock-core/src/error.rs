//! Error types for lock operations

use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

/// Lock errors
///
/// An `Err` from any lock operation means the store state is unknown to the
/// caller; no `is_locked`/`is_owner` flags accompany it.
#[derive(Debug, Error)]
pub enum LockError {
    /// The store could not be reached or rejected the command
    #[error("Lock store error: {0}")]
    Store(String),

    /// A store call exceeded its configured timeout
    #[error("Lock store operation timed out")]
    StoreTimeout,

    /// The store does not know the referenced script
    #[error("Script not loaded in store: {0}")]
    NoScript(String),

    /// `wait_until_unlock` ran past its deadline while the lock was held
    #[error("Exceeded deadline waiting for {key} to unlock")]
    DeadlineExceeded {
        /// Resource key that stayed locked
        key: String,
    },

    /// The store answered in a way the protocol never produces
    #[error("Unexpected lock store response: {0}")]
    Unexpected(String),

    /// Invalid lock configuration
    #[error("Lock configuration error: {0}")]
    Config(String),

    /// Redis client error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] distlock_redis::RedisError),
}

impl LockError {
    /// Create a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new unexpected-response error
    pub fn unexpected<S: Into<String>>(msg: S) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error came from talking to the store
    pub fn is_store_error(&self) -> bool {
        match self {
            Self::Store(_) | Self::StoreTimeout => true,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
            _ => false,
        }
    }

    /// Check if this error reports an unknown script reference
    pub fn is_no_script(&self) -> bool {
        matches!(self, Self::NoScript(_))
    }

    /// Check if this error is a `wait_until_unlock` deadline
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}
