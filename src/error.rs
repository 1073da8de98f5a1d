//! Error types for the cache
//!
//! Data-path operations never fail; errors only surface from configuration
//! parsing and from starting background activity.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// `start()` was called from a thread with no Tokio runtime
    #[error("No Tokio runtime available to run background tasks")]
    NoRuntime,

    /// Unknown eviction strategy name
    #[error("Invalid strategy: {0}")]
    InvalidStrategy(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
