//! Cache Entry Module
//!
//! Defines a single resident entry and the arena handle that addresses it.

use std::time::Instant;

// == Entry Handle ==
/// Stable handle to an entry slot in the store.
///
/// The generation changes every time a slot is reused, so a stale handle
/// (held by an expiration timer, for example) never resolves to a newer
/// entry that happens to occupy the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryHandle {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

impl EntryHandle {
    pub fn index(self) -> usize {
        self.index
    }

    pub fn generation(self) -> u64 {
        self.generation
    }
}

// == Cache Entry ==
/// A resident key/value pair with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Key the entry is indexed under
    pub key: String,
    /// The stored value
    pub value: V,
    /// Successful reads since insertion
    pub usage_count: u64,
    /// Whether an expiration timer for the current epoch covers this entry
    pub expiration_armed: bool,
    /// Deadline last assigned; kept across a stop so a restart can honor it
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates an unarmed entry with a zero usage count.
    pub fn new(key: String, value: V) -> Self {
        Self {
            key,
            value,
            usage_count: 0,
            expiration_armed: false,
            expires_at: None,
        }
    }

    /// Records a successful read.
    pub fn record_use(&mut self) {
        self.usage_count = self.usage_count.saturating_add(1);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("key".to_string(), 7u32);

        assert_eq!(entry.key, "key");
        assert_eq!(entry.value, 7);
        assert_eq!(entry.usage_count, 0);
        assert!(!entry.expiration_armed);
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn test_record_use_is_monotonic() {
        let mut entry = CacheEntry::new("key".to_string(), ());
        entry.record_use();
        entry.record_use();
        assert_eq!(entry.usage_count, 2);

        entry.usage_count = u64::MAX;
        entry.record_use();
        assert_eq!(entry.usage_count, u64::MAX);
    }
}
