//! # distlock Redis
//!
//! Redis connectivity for the distlock lock stores.
//!
//! ## Features
//!
//! - **Connection Pooling**: pooled multiplexed connections via bb8
//! - **Command Timeouts**: every call is bounded by a configurable timeout
//! - **Lock Primitives**: `SET NX PX`, `GET`, `SCRIPT LOAD/EXISTS`, `EVALSHA`
//!   and an atomic delete-then-set transaction
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use distlock_redis::{RedisConfig, RedisService};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::builder()
//!         .url("redis://localhost:6379")
//!         .command_timeout(Duration::from_millis(500))
//!         .build();
//!
//!     let redis = RedisService::new(config).await?;
//!     let written = redis.set_nx_px("jobs:nightly", "owner-a", Duration::from_secs(30)).await?;
//!     println!("acquired: {written}");
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use service::{RedisConnection, RedisPool, RedisService};

// Re-export redis crate for convenience
pub use redis;
