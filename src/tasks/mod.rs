//! Background Tasks Module
//!
//! Tasks that run while the cache is started.
//!
//! # Tasks
//! - Expiration: removes entries whose TTL elapsed, driven by a deadline queue
//! - Reaper: trims the cache toward `max_entries - safe_range` on an interval
//!
//! Both are bound to the epoch they were started in and hold only a weak
//! reference to the cache.

mod expiry;
mod reaper;

use std::panic::{self, AssertUnwindSafe};

use tracing::error;

pub(crate) use expiry::{spawn_expiry_task, ExpiryQueue, ExpiryTimer};
pub(crate) use reaper::spawn_reaper_task;

/// Runs one task cycle, logging and swallowing a panic instead of letting it
/// tear down the task.
pub(crate) fn contain_panic<T>(task: &'static str, cycle: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(cycle)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(task, %message, "Background cycle panicked");
            None
        }
    }
}

/// Outcome of one background cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cycle<T> {
    /// Keep going
    Continue(T),
    /// The epoch moved on; the task should exit
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_panic_passes_value() {
        assert_eq!(contain_panic("test", || 7), Some(7));
    }

    #[test]
    fn test_contain_panic_swallows_panic() {
        let result: Option<()> = contain_panic("test", || panic!("boom"));
        assert!(result.is_none());

        let result: Option<()> = contain_panic("test", || panic!("{}", String::from("owned")));
        assert!(result.is_none());
    }
}
