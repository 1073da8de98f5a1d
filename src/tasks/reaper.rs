//! Reaper Task
//!
//! Background task that periodically trims the cache toward
//! `max_entries - safe_range` using the configured eviction strategy.

use std::sync::Weak;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Shared;
use crate::config::saturating_millis;
use crate::tasks::{contain_panic, Cycle};

/// Evicts until the resident count is at or below the reap floor.
pub(crate) fn reap<V>(shared: &Shared<V>, epoch: u64) -> Cycle<usize> {
    let mut state = shared.state.lock();
    if shared.current_epoch() != epoch {
        return Cycle::Stale;
    }
    let Some(floor) = shared.options.reap_floor() else {
        return Cycle::Continue(0);
    };

    let mut removed = 0;
    while state.store.len() > floor && state.evict(&shared.options) {
        removed += 1;
    }
    Cycle::Continue(removed)
}

/// Spawns the reaper for `epoch` on `runtime`.
///
/// The reaper sleeps its full interval before every cycle and only then
/// checks whether its epoch is still current, so a stop takes effect on the
/// next wake rather than immediately.
pub(crate) fn spawn_reaper_task<V>(shared: Weak<Shared<V>>, epoch: u64, runtime: &Handle) -> JoinHandle<()>
where
    V: Send + 'static,
{
    let interval = match shared.upgrade() {
        Some(cache) => cache.options.reap_interval,
        None => return runtime.spawn(async {}),
    };

    runtime.spawn(async move {
        info!(
            epoch,
            interval_ms = saturating_millis(interval),
            "Starting reaper task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = shared.upgrade() else {
                debug!(epoch, "Cache dropped, reaper exiting");
                break;
            };

            match contain_panic("reaper", || reap(&cache, epoch)) {
                Some(Cycle::Stale) => {
                    info!(epoch, "Reaper exiting");
                    break;
                }
                Some(Cycle::Continue(removed)) if removed > 0 => {
                    info!(epoch, removed, "Reaper trimmed entries");
                }
                _ => debug!(epoch, "Reaper: nothing to trim"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{CacheOptions, Strategy};
    use std::sync::Arc;
    use std::time::Duration;

    fn reaping_cache(max_entries: usize, safe_range: usize) -> Cache<usize> {
        Cache::new(
            CacheOptions::new()
                .with_max_entries(max_entries)
                .with_safe_range(safe_range)
                .with_strategy(Strategy::Oldest)
                .with_reap_interval(Duration::from_millis(100)),
        )
    }

    #[test]
    fn test_reap_trims_to_floor() {
        let cache = reaping_cache(10, 2);
        for i in 0..20 {
            cache.insert(format!("k{}", i), i);
        }
        let epoch = cache.shared().current_epoch();

        assert_eq!(reap(cache.shared(), epoch), Cycle::Continue(12));
        assert_eq!(cache.len(), 8);
        // oldest went first
        assert!(!cache.contains_key("k11"));
        assert!(cache.contains_key("k12"));
        assert_eq!(cache.stats().evictions, 12);
    }

    #[test]
    fn test_reap_below_floor_is_noop() {
        let cache = reaping_cache(10, 2);
        for i in 0..5 {
            cache.insert(format!("k{}", i), i);
        }
        let epoch = cache.shared().current_epoch();

        assert_eq!(reap(cache.shared(), epoch), Cycle::Continue(0));
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_reap_disabled_without_max_entries() {
        let cache = reaping_cache(0, 0);
        cache.insert("a", 1);
        let epoch = cache.shared().current_epoch();

        assert_eq!(reap(cache.shared(), epoch), Cycle::Continue(0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_reap_stale_epoch() {
        let cache = reaping_cache(1, 0);
        cache.insert("a", 1);
        cache.insert("b", 2);

        assert_eq!(reap(cache.shared(), 9), Cycle::Stale);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_reaper_task_trims_in_background() {
        let cache = reaping_cache(10, 2);
        for i in 0..20 {
            cache.insert(format!("k{}", i), i);
        }
        cache.start().unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.len(), 8);
    }

    #[tokio::test]
    async fn test_reaper_stops_after_stop() {
        let cache = reaping_cache(10, 0);
        cache.start().unwrap();
        cache.stop();

        tokio::time::sleep(Duration::from_millis(150)).await;
        for i in 0..20 {
            cache.insert(format!("k{}", i), i);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(cache.len(), 20);
    }

    #[tokio::test]
    async fn test_reaper_task_exits_on_stale_epoch() {
        let cache = reaping_cache(10, 0);
        let handle = spawn_reaper_task(Arc::downgrade(cache.shared()), 3, &Handle::current());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_finished(), "Reaper should exit after its first wake");
    }
}
