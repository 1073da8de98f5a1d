//! Cache Module
//!
//! Ordered entry storage, eviction strategies, accounting and the public
//! cache facade.

mod entry;
mod facade;
mod stats;
mod store;
mod strategy;


// Re-export public types
pub use entry::{CacheEntry, EntryHandle};
pub use facade::Cache;
pub use stats::CacheStats;
pub use store::{EntryStore, IterFromBack};

pub(crate) use facade::Shared;
