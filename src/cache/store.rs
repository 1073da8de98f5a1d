//! Entry Store Module
//!
//! Recency-ordered entries kept in a slot arena, linked front-to-back by
//! slot index, plus a key -> slot index map.
//!
//! ```text
//!   head (most recently touched)                      tail (oldest)
//!    │                                                   │
//!    ▼                                                   ▼
//!   [slot 3] ◄──► [slot 0] ◄──► [slot 5] ◄──► ... ◄──► [slot 1]
//! ```
//!
//! Insert at front, remove, move to front and key lookup are all O(1).
//! Removing a slot bumps its generation, which invalidates every
//! outstanding `EntryHandle` to it.

use std::collections::HashMap;

use crate::cache::{CacheEntry, EntryHandle};

#[derive(Debug)]
struct Node<V> {
    entry: CacheEntry<V>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
struct Slot<V> {
    generation: u64,
    node: Option<Node<V>>,
}

// == Entry Store ==
/// Arena-backed ordered entry storage.
#[derive(Debug)]
pub struct EntryStore<V> {
    slots: Vec<Slot<V>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<V> Default for EntryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EntryStore<V> {
    // == Constructor ==
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    // == Insert Front ==
    /// Inserts an entry as the most recently touched one.
    ///
    /// Any prior entry stored under the same key is removed first and its
    /// handles become stale.
    pub fn insert_front(&mut self, key: String, value: V) -> EntryHandle {
        if let Some(old) = self.index.get(&key).copied() {
            self.release(old);
        }

        let node = Node {
            entry: CacheEntry::new(key.clone(), value),
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx].node = Some(node);
                idx
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.slots.len() - 1
            }
        };

        self.attach_front(idx);
        self.index.insert(key, idx);
        self.handle_at(idx)
    }

    // == Remove ==
    /// Removes the entry behind `handle`, unlinking it and dropping its key.
    ///
    /// Returns `None` when the handle is stale.
    pub fn remove(&mut self, handle: EntryHandle) -> Option<CacheEntry<V>> {
        self.resolve(handle)?;
        self.release(handle.index)
    }

    /// Removes the entry stored under `key`, if any.
    pub fn remove_key(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let idx = self.index.get(key).copied()?;
        self.release(idx)
    }

    // == Move To Front ==
    /// Promotes the entry to the most recently touched position.
    pub fn move_to_front(&mut self, handle: EntryHandle) -> bool {
        if self.resolve(handle).is_none() {
            return false;
        }
        if self.head != Some(handle.index) {
            self.detach(handle.index);
            self.attach_front(handle.index);
        }
        true
    }

    // == Accessors ==
    /// Handle of the least recently touched entry.
    pub fn back(&self) -> Option<EntryHandle> {
        self.tail.map(|idx| self.handle_at(idx))
    }

    /// Handle of the most recently touched entry.
    pub fn front(&self) -> Option<EntryHandle> {
        self.head.map(|idx| self.handle_at(idx))
    }

    pub fn lookup(&self, key: &str) -> Option<EntryHandle> {
        self.index.get(key).map(|&idx| self.handle_at(idx))
    }

    pub fn get(&self, handle: EntryHandle) -> Option<&CacheEntry<V>> {
        self.resolve(handle).map(|node| &node.entry)
    }

    pub fn get_mut(&mut self, handle: EntryHandle) -> Option<&mut CacheEntry<V>> {
        let slot = self.slots.get_mut(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_mut().map(|node| &mut node.entry)
    }

    pub fn contains(&self, handle: EntryHandle) -> bool {
        self.resolve(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of arena slots, occupied or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// First occupied slot at or after `start`, wrapping around the arena.
    pub fn occupied_from(&self, start: usize) -> Option<EntryHandle> {
        let n = self.slots.len();
        if n == 0 || self.is_empty() {
            return None;
        }
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&idx| self.slots[idx].node.is_some())
            .map(|idx| self.handle_at(idx))
    }

    /// Iterates entries from the tail (oldest) to the head.
    pub fn iter_from_back(&self) -> IterFromBack<'_, V> {
        IterFromBack {
            store: self,
            current: self.tail,
        }
    }

    /// Handles of every resident entry, front to back.
    pub fn handles(&self) -> Vec<EntryHandle> {
        let mut out = Vec::with_capacity(self.len());
        let mut current = self.head;
        while let Some(idx) = current {
            out.push(self.handle_at(idx));
            current = self.slots[idx].node.as_ref().and_then(|node| node.next);
        }
        out
    }

    /// Drops every entry. Outstanding handles become stale.
    pub fn clear(&mut self) {
        let occupied: Vec<usize> = self.index.values().copied().collect();
        for idx in occupied {
            self.release(idx);
        }
    }

    // == Internals ==
    fn handle_at(&self, idx: usize) -> EntryHandle {
        EntryHandle {
            index: idx,
            generation: self.slots[idx].generation,
        }
    }

    fn resolve(&self, handle: EntryHandle) -> Option<&Node<V>> {
        let slot = self.slots.get(handle.index)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn release(&mut self, idx: usize) -> Option<CacheEntry<V>> {
        if self.slots.get(idx)?.node.is_none() {
            return None;
        }
        self.detach(idx);
        let slot = &mut self.slots[idx];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
        self.index.remove(&node.entry.key);
        Some(node.entry)
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].node.as_mut() {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.slots[p].node.as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.slots[n].node.as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.slots[idx].node.as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(node) = self.slots[h].node.as_mut() {
                    node.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    /// Panics if the sequence and the key index disagree.
    #[cfg(test)]
    pub(crate) fn debug_validate_invariants(&self) {
        let mut seen = 0usize;
        let mut prev: Option<usize> = None;
        let mut current = self.head;
        while let Some(idx) = current {
            let node = self.slots[idx]
                .node
                .as_ref()
                .expect("linked slot must be occupied");
            assert_eq!(node.prev, prev, "broken prev link at slot {}", idx);
            assert_eq!(
                self.index.get(&node.entry.key),
                Some(&idx),
                "key {} not indexed to its slot",
                node.entry.key
            );
            seen += 1;
            assert!(seen <= self.slots.len(), "cycle in entry list");
            prev = Some(idx);
            current = node.next;
        }
        assert_eq!(self.tail, prev, "tail does not end the list");
        assert_eq!(seen, self.index.len(), "list and index sizes differ");

        let occupied = self.slots.iter().filter(|s| s.node.is_some()).count();
        assert_eq!(occupied, seen, "unlinked occupied slot");
        assert_eq!(occupied + self.free.len(), self.slots.len());
    }
}

// == Iterator ==
/// Tail-to-head iterator over resident entries.
pub struct IterFromBack<'a, V> {
    store: &'a EntryStore<V>,
    current: Option<usize>,
}

impl<'a, V> Iterator for IterFromBack<'a, V> {
    type Item = (EntryHandle, &'a CacheEntry<V>);

    fn next(&mut self) -> Option<Self::Item> {
        let store = self.store;
        let idx = self.current?;
        let node = store.slots[idx].node.as_ref()?;
        self.current = node.prev;
        Some((store.handle_at(idx), &node.entry))
    }
}
