// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! LRU page cache.
//!
//! Keyed-by-id map that preserves access order: lookups through `get_mut`
//! promote the entry to the most-recently-used end, eviction candidates
//! come from the least-recently-used end. The tree keeps two of these, one
//! for leaves and one for internal nodes, and evicts a small batch at a
//! time once a map grows past its configured capacity.

use std::collections::{BTreeMap, HashMap};

/// Number of pages evicted per adjustment round.
pub const CACHE_OUT_BATCH: usize = 8;

struct Slot<T> {
    seq: u64,
    value: T,
}

/// Insertion-ordered map with promote-on-access.
pub struct LruMap<T> {
    map: HashMap<u64, Slot<T>>,
    // seq -> id, oldest first.
    order: BTreeMap<u64, u64>,
    seq: u64,
}

impl<T> LruMap<T> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.map.contains_key(&id)
    }

    /// Inserts or replaces an entry at the most-recently-used end.
    pub fn insert(&mut self, id: u64, value: T) {
        if let Some(slot) = self.map.remove(&id) {
            self.order.remove(&slot.seq);
        }
        self.seq += 1;
        self.order.insert(self.seq, id);
        self.map.insert(
            id,
            Slot {
                seq: self.seq,
                value,
            },
        );
    }

    /// Looks up an entry and promotes it.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut T> {
        let slot = self.map.get_mut(&id)?;
        self.order.remove(&slot.seq);
        self.seq += 1;
        slot.seq = self.seq;
        self.order.insert(self.seq, id);
        Some(&mut slot.value)
    }

    /// Looks up an entry without touching the access order.
    pub fn peek(&self, id: u64) -> Option<&T> {
        self.map.get(&id).map(|slot| &slot.value)
    }

    /// Mutable lookup without touching the access order.
    pub fn peek_mut(&mut self, id: u64) -> Option<&mut T> {
        self.map.get_mut(&id).map(|slot| &mut slot.value)
    }

    pub fn remove(&mut self, id: u64) -> Option<T> {
        let slot = self.map.remove(&id)?;
        self.order.remove(&slot.seq);
        Some(slot.value)
    }

    /// Ids of the `n` least-recently-used entries, oldest first.
    pub fn eldest(&self, n: usize) -> Vec<u64> {
        self.order.values().take(n).copied().collect()
    }

    /// All cached ids in arbitrary order.
    pub fn ids(&self) -> Vec<u64> {
        self.map.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

impl<T> Default for LruMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
