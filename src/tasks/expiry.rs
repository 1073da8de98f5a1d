//! Expiration Task
//!
//! One worker per cache epoch drains an ordered map of entry deadlines
//! instead of running a timer per entry. The map holds at most one timer per
//! resident entry: removing or replacing an entry cancels its timer.

use std::collections::BTreeMap;
use std::sync::Weak;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{EntryHandle, Shared};
use crate::tasks::{contain_panic, Cycle};

/// Longest the worker sleeps between checks, whatever the TTL.
const MAX_IDLE: Duration = Duration::from_secs(3600);

// == Expiry Timer ==
/// A scheduled removal, bound to the epoch it was armed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryTimer {
    pub deadline: Instant,
    pub handle: EntryHandle,
    pub epoch: u64,
}

// == Expiry Queue ==
/// Timers ordered by nearest deadline, keyed so any one can be cancelled.
#[derive(Debug, Default)]
pub struct ExpiryQueue {
    timers: BTreeMap<(Instant, EntryHandle), u64>,
}

impl ExpiryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, timer: ExpiryTimer) {
        self.timers
            .insert((timer.deadline, timer.handle), timer.epoch);
    }

    /// Drops the timer scheduled for `handle` at `deadline`, if any.
    pub fn cancel(&mut self, deadline: Instant, handle: EntryHandle) -> bool {
        self.timers.remove(&(deadline, handle)).is_some()
    }

    /// Pops the earliest timer if its deadline is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<ExpiryTimer> {
        let (&(deadline, _), _) = self.timers.first_key_value()?;
        if deadline > now {
            return None;
        }
        self.timers
            .pop_first()
            .map(|((deadline, handle), epoch)| ExpiryTimer {
                deadline,
                handle,
                epoch,
            })
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// Instant the worker wakes at when no timer is due sooner.
fn idle_wake(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_IDLE)
}

/// Removes every entry whose deadline passed. Yields the count removed and
/// the instant the worker should wake next.
pub(crate) fn expire_due<V>(shared: &Shared<V>, epoch: u64) -> Cycle<(usize, Instant)> {
    let mut state = shared.state.lock();
    if shared.current_epoch() != epoch {
        return Cycle::Stale;
    }

    let now = Instant::now();
    let mut removed = 0;
    while let Some(timer) = state.timers.pop_due(now) {
        if timer.epoch != epoch {
            if let Some(entry) = state.store.get_mut(timer.handle) {
                entry.expiration_armed = false;
            }
            continue;
        }
        if state.store.remove(timer.handle).is_some() {
            state.stats.record_expiration();
            removed += 1;
        }
    }

    // Every new timer lands at least one TTL out, so sleeping at most a TTL
    // never oversleeps a deadline armed while asleep.
    let idle = idle_wake(now, shared.options.expiration_time);
    let next = state
        .timers
        .next_deadline()
        .map_or(idle, |deadline| deadline.min(idle));
    Cycle::Continue((removed, next))
}

/// Spawns the expiration worker for `epoch` on `runtime`.
///
/// The worker exits when the cache moves to another epoch or when every
/// cache handle has been dropped.
pub(crate) fn spawn_expiry_task<V>(shared: Weak<Shared<V>>, epoch: u64, runtime: &Handle) -> JoinHandle<()>
where
    V: Send + 'static,
{
    runtime.spawn(async move {
        info!(epoch, "Starting expiration task");

        loop {
            let Some(cache) = shared.upgrade() else {
                debug!(epoch, "Cache dropped, expiration task exiting");
                break;
            };

            let wake = match contain_panic("expiry", || expire_due(&cache, epoch)) {
                Some(Cycle::Stale) => {
                    info!(epoch, "Expiration task exiting");
                    break;
                }
                Some(Cycle::Continue((removed, next))) => {
                    if removed > 0 {
                        debug!(epoch, removed, "Expired entries");
                    }
                    next
                }
                None => idle_wake(Instant::now(), cache.options.expiration_time),
            };
            drop(cache);

            tokio::time::sleep_until(tokio::time::Instant::from_std(wake)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::CacheOptions;
    use std::sync::Arc;
    use std::time::Duration;

    fn ttl_cache(ttl_ms: u64) -> Cache<String> {
        Cache::new(CacheOptions::new().with_expiration(Duration::from_millis(ttl_ms)))
    }

    #[test]
    fn test_queue_orders_by_deadline() {
        let mut store = crate::cache::EntryStore::new();
        let a = store.insert_front("a".to_string(), ());
        let b = store.insert_front("b".to_string(), ());

        let now = Instant::now();
        let mut queue = ExpiryQueue::new();
        queue.push(ExpiryTimer {
            deadline: now + Duration::from_secs(5),
            handle: a,
            epoch: 1,
        });
        queue.push(ExpiryTimer {
            deadline: now,
            handle: b,
            epoch: 1,
        });

        assert_eq!(queue.next_deadline(), Some(now));
        assert_eq!(queue.pop_due(now).unwrap().handle, b);
        assert!(queue.pop_due(now).is_none());
        assert_eq!(queue.len(), 1);

        assert!(!queue.cancel(now, a));
        assert!(queue.cancel(now + Duration::from_secs(5), a));
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_idle_wake_is_capped() {
        let now = Instant::now();
        assert_eq!(idle_wake(now, Duration::from_millis(10)), now + Duration::from_millis(10));
        assert_eq!(idle_wake(now, Duration::MAX), now + MAX_IDLE);
    }

    #[test]
    fn test_expire_due_reports_stale_epoch() {
        let cache = ttl_cache(100);
        assert_eq!(expire_due(cache.shared(), 5), Cycle::Stale);
    }

    #[test]
    fn test_stale_timer_only_disarms() {
        let cache = ttl_cache(100);
        cache.insert("x", "y".to_string());
        let shared = cache.shared();
        let epoch = shared.current_epoch();
        {
            let mut state = shared.state.lock();
            let handle = state.store.lookup("x").unwrap();
            state.arm(handle, Instant::now(), epoch + 1);
            assert!(state.store.get(handle).unwrap().expiration_armed);
        }

        assert!(matches!(expire_due(shared, epoch), Cycle::Continue((0, _))));

        let state = shared.state.lock();
        let handle = state.store.lookup("x").unwrap();
        assert!(!state.store.get(handle).unwrap().expiration_armed);
        assert!(state.timers.is_empty());
    }

    #[test]
    fn test_timer_for_replaced_entry_is_ignored() {
        let cache = ttl_cache(100);
        cache.insert("x", "old".to_string());
        let shared = cache.shared();
        let epoch = shared.current_epoch();
        {
            let mut state = shared.state.lock();
            let handle = state.store.lookup("x").unwrap();
            state.arm(handle, Instant::now(), epoch);
        }
        cache.insert("x", "new".to_string());

        assert!(matches!(expire_due(shared, epoch), Cycle::Continue((0, _))));
        assert_eq!(cache.get("x"), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_expiry_task_removes_due_entries() {
        let cache = ttl_cache(100);
        cache.start().unwrap();
        cache.insert("soon", "value".to_string());
        assert_eq!(cache.get("soon"), Some("value".to_string()));

        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(cache.get("soon"), None);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_replaced_key_gets_fresh_ttl() {
        let cache = ttl_cache(300);
        cache.start().unwrap();
        cache.insert("k", "v1".to_string());

        tokio::time::sleep(Duration::from_millis(200)).await;
        cache.insert("k", "v2".to_string());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.get("k"), Some("v2".to_string()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_expiry_task_exits_on_stale_epoch() {
        let cache = ttl_cache(100);
        let handle = spawn_expiry_task(Arc::downgrade(cache.shared()), 42, &Handle::current());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should exit for a stale epoch");
    }

    #[tokio::test]
    async fn test_expiry_task_exits_when_cache_dropped() {
        let cache = ttl_cache(50);
        let epoch = cache.shared().current_epoch();
        let handle = spawn_expiry_task(Arc::downgrade(cache.shared()), epoch, &Handle::current());

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(cache);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(handle.is_finished(), "Task should exit once the cache is gone");
    }
}
