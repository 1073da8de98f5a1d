//! Cache Facade Module
//!
//! Composes the entry store, eviction strategy, accounting and background
//! scheduling behind one mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStats, EntryHandle, EntryStore};
use crate::config::{saturating_millis, CacheOptions};
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_expiry_task, spawn_reaper_task, ExpiryQueue, ExpiryTimer};

// == Shared State ==
/// State shared between cache handles and background tasks.
#[derive(Debug)]
pub(crate) struct Shared<V> {
    pub(crate) state: Mutex<State<V>>,
    /// Bumped on every start and stop; background work bound to an older
    /// value is a no-op.
    pub(crate) epoch: AtomicU64,
    pub(crate) options: CacheOptions,
}

impl<V> Shared<V> {
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Everything guarded by the cache lock.
#[derive(Debug)]
pub(crate) struct State<V> {
    pub(crate) store: EntryStore<V>,
    pub(crate) stats: CacheStats,
    pub(crate) running: bool,
    pub(crate) timers: ExpiryQueue,
}

impl<V> State<V> {
    fn new() -> Self {
        Self {
            store: EntryStore::new(),
            stats: CacheStats::new(),
            running: false,
            timers: ExpiryQueue::new(),
        }
    }

    /// Schedules removal of `handle` at `deadline` under `epoch`, replacing
    /// any timer the entry already had.
    pub(crate) fn arm(&mut self, handle: EntryHandle, deadline: Instant, epoch: u64) {
        let Some(entry) = self.store.get_mut(handle) else {
            return;
        };
        let previous = entry.expiration_armed.then_some(entry.expires_at).flatten();
        entry.expiration_armed = true;
        entry.expires_at = Some(deadline);

        if let Some(previous) = previous {
            self.timers.cancel(previous, handle);
        }
        self.timers.push(ExpiryTimer {
            deadline,
            handle,
            epoch,
        });
    }

    /// Removes the entry behind `handle` along with its pending timer.
    pub(crate) fn remove_handle(&mut self, handle: EntryHandle) -> Option<CacheEntry<V>> {
        let entry = self.store.remove(handle)?;
        if let (true, Some(deadline)) = (entry.expiration_armed, entry.expires_at) {
            self.timers.cancel(deadline, handle);
        }
        Some(entry)
    }

    pub(crate) fn remove_key(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let handle = self.store.lookup(key)?;
        self.remove_handle(handle)
    }

    /// Drops every queued timer and marks all entries unarmed. Assigned
    /// deadlines are kept for the next start.
    pub(crate) fn disarm_all(&mut self) {
        self.timers.clear();
        for handle in self.store.handles() {
            if let Some(entry) = self.store.get_mut(handle) {
                entry.expiration_armed = false;
            }
        }
    }

    /// Evicts one entry via `options.strategy`, returning whether one was removed.
    pub(crate) fn evict(&mut self, options: &CacheOptions) -> bool {
        let victim = options
            .strategy
            .select_victim(&self.store)
            .and_then(|handle| self.remove_handle(handle));
        match victim {
            Some(entry) => {
                debug!(key = %entry.key, strategy = %options.strategy, "Evicted entry");
                self.stats.record_eviction();
                true
            }
            None => false,
        }
    }
}

// == Cache ==
/// In-process key/value cache with bounded size and entry lifetime.
///
/// Cloning a `Cache` yields another handle to the same entries. Background
/// tasks only hold weak references, so they wind down once every handle is
/// dropped.
#[derive(Debug)]
pub struct Cache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a stopped cache. The options are normalized first.
    pub fn new(options: CacheOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                epoch: AtomicU64::new(0),
                options: options.normalized(),
            }),
        }
    }

    // == Set ==
    /// Stores `value` under `key`; `None` removes the key instead.
    ///
    /// When the hard cap is on and a new entry would push the resident count
    /// past `upper`, one victim is evicted before inserting. Replacing an
    /// existing key never triggers eviction.
    pub fn set(&self, key: impl Into<String>, value: Option<V>) {
        let key = key.into();
        let Some(value) = value else {
            self.remove(&key);
            return;
        };

        let options = &self.shared.options;
        let mut state = self.shared.state.lock();

        state.remove_key(&key);
        if options.upper > 0 && state.store.len() + 1 > options.upper {
            state.evict(options);
        }

        let handle = state.store.insert_front(key, value);
        if options.expires() && state.running {
            // a TTL too large to represent never expires
            if let Some(deadline) = Instant::now().checked_add(options.expiration_time) {
                state.arm(handle, deadline, self.shared.current_epoch());
            }
        }
    }

    /// Shorthand for `set(key, Some(value))`.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.set(key, Some(value));
    }

    // == Get ==
    /// Returns a clone of the value stored under `key`.
    ///
    /// Hits bump the entry's usage count and, under the LRU strategy, move it
    /// to the front.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.shared.state.lock();
        let Some(handle) = state.store.lookup(key) else {
            state.stats.record_miss();
            return None;
        };

        state.stats.record_hit();
        let value = state.store.get_mut(handle).map(|entry| {
            entry.record_use();
            entry.value.clone()
        });
        if self.shared.options.strategy.promotes_on_read() {
            state.store.move_to_front(handle);
        }
        value
    }

    // == Remove ==
    /// Deletes `key` if present.
    pub fn remove(&self, key: &str) {
        self.shared.state.lock().remove_key(key);
    }

    // == Trim ==
    /// Evicts up to `n` entries via the strategy and returns how many went.
    pub fn trim(&self, n: usize) -> usize {
        let options = &self.shared.options;
        let mut state = self.shared.state.lock();
        let mut removed = 0;
        while removed < n && state.evict(options) {
            removed += 1;
        }
        removed
    }

    // == Bump ==
    /// Moves `key` to the front regardless of strategy. Usage is unchanged.
    pub fn bump(&self, key: &str) -> bool {
        let mut state = self.shared.state.lock();
        match state.store.lookup(key) {
            Some(handle) => state.store.move_to_front(handle),
            None => false,
        }
    }

    // == Start ==
    /// Enters a new epoch: launches the reaper and the expiration worker and
    /// arms expiration for resident entries that lack a live timer.
    ///
    /// Needs a Tokio runtime on the calling thread. Starting a running
    /// cache does nothing.
    pub fn start(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            warn!("Cache start requested outside a Tokio runtime");
            CacheError::NoRuntime
        })?;

        let options = &self.shared.options;
        let epoch = {
            let mut state = self.shared.state.lock();
            if state.running {
                return Ok(());
            }
            let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            state.running = true;
            if options.expires() {
                self.rearm(&mut state, epoch);
            } else {
                state.timers.clear();
            }
            epoch
        };

        if options.expires() {
            spawn_expiry_task(Arc::downgrade(&self.shared), epoch, &runtime);
        }
        if options.reaps() {
            spawn_reaper_task(Arc::downgrade(&self.shared), epoch, &runtime);
        }
        info!(
            epoch,
            strategy = %options.strategy,
            expiration_ms = saturating_millis(options.expiration_time),
            reap_interval_ms = saturating_millis(options.reap_interval),
            "Cache started"
        );
        Ok(())
    }

    /// Arms every resident entry under `epoch`. Deadlines assigned before a
    /// stop are kept while still in the future; the rest get a fresh TTL.
    fn rearm(&self, state: &mut State<V>, epoch: u64) {
        let now = Instant::now();
        let fresh = now.checked_add(self.shared.options.expiration_time);
        state.disarm_all();

        for handle in state.store.handles() {
            let deadline = state
                .store
                .get(handle)
                .and_then(|entry| entry.expires_at)
                .filter(|deadline| *deadline > now)
                .or(fresh);
            if let Some(deadline) = deadline {
                state.arm(handle, deadline, epoch);
            }
        }
    }

    // == Stop ==
    /// Leaves the current epoch and disarms every entry. Background tasks
    /// exit on their next wake.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.disarm_all();
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        info!(epoch, "Cache stopped");
    }

    // == Accessors ==
    /// Resident entry count.
    pub fn len(&self) -> usize {
        self.shared.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.shared.state.lock().stats.hits
    }

    pub fn misses(&self) -> u64 {
        self.shared.state.lock().stats.misses
    }

    /// Checks residency without touching accounting or recency.
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.state.lock().store.lookup(key).is_some()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn options(&self) -> &CacheOptions {
        &self.shared.options
    }

    /// Snapshot of the accounting counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.store.len());
        stats
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.store.clear();
        state.timers.clear();
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared<V>> {
        &self.shared
    }
}
