//! Eviction Strategy Module
//!
//! Victim selection over the entry store. Selection never mutates the store;
//! the caller removes whatever handle comes back.

use rand::Rng;

use crate::cache::{CacheEntry, EntryHandle, EntryStore};
use crate::config::Strategy;

impl Strategy {
    // == Select Victim ==
    /// Names the next entry to evict, or `None` only when the store is empty.
    pub fn select_victim<V>(self, store: &EntryStore<V>) -> Option<EntryHandle> {
        match self {
            Strategy::Random => select_random(store),
            Strategy::Oldest | Strategy::Lru => store.back(),
            Strategy::Lfu => least_used_or_oldest(store, min_usage(store)?),
        }
    }

    // == Evict One ==
    /// Selects and removes one victim.
    pub fn evict_one<V>(self, store: &mut EntryStore<V>) -> Option<CacheEntry<V>> {
        let victim = self.select_victim(store)?;
        store.remove(victim)
    }
}

fn select_random<V>(store: &EntryStore<V>) -> Option<EntryHandle> {
    if store.is_empty() {
        return None;
    }
    let start = rand::thread_rng().gen_range(0..store.slot_count());
    store.occupied_from(start)
}

/// Smallest usage count among resident entries, or `None` when empty.
fn min_usage<V>(store: &EntryStore<V>) -> Option<u64> {
    let mut floor: Option<u64> = None;
    for (_, entry) in store.iter_from_back() {
        floor = Some(floor.map_or(entry.usage_count, |f| f.min(entry.usage_count)));
        if entry.usage_count == 0 {
            break;
        }
    }
    floor
}

/// First entry from the tail whose usage equals `floor`, so older entries
/// win ties. Falls back to the tail when no entry matches.
fn least_used_or_oldest<V>(store: &EntryStore<V>, floor: u64) -> Option<EntryHandle> {
    store
        .iter_from_back()
        .find(|(_, entry)| entry.usage_count == floor)
        .map(|(handle, _)| handle)
        .or_else(|| store.back())
}
