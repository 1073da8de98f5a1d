//! Reaper Cache - an in-process key/value cache
//!
//! Bounds its own size and entry lifetime: a hard cap enforced on insert,
//! pluggable eviction (random, oldest, LRU, LFU), per-entry TTL expiration
//! and a periodic reaper, all behind a single lock.
//!
//! ```no_run
//! use std::time::Duration;
//! use reaper_cache::{Cache, CacheOptions, Strategy};
//!
//! # async fn run() -> reaper_cache::Result<()> {
//! let cache = Cache::new(
//!     CacheOptions::new()
//!         .with_upper(1000)
//!         .with_strategy(Strategy::Lru)
//!         .with_expiration(Duration::from_secs(30)),
//! );
//! cache.start()?;
//! cache.insert("user:1", "alice".to_string());
//! assert_eq!(cache.get("user:1").as_deref(), Some("alice"));
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{Cache, CacheStats};
pub use config::{CacheOptions, Strategy};
pub use error::{CacheError, Result};
