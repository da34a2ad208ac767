//! A Robin Hood open-addressed hash table with progressive rehashing.
//!
//! Key/value pairs live in a [`slab::Slab`] arena, which hands out stable
//! indices ([`Handle`]) that survive rehashing and probe-slot churn. The
//! open-addressed probe array only ever stores `(hash, arena handle, probe
//! distance)` triples, never the key or value directly, so growing or
//! shrinking the probe array never touches the arena.
//!
//! Rehashing never happens in one call: [`RhTable`] keeps the old probe
//! array alongside the new one and migrates a bounded batch of slots on
//! every subsequent public call until the old array is empty. This keeps any
//! single operation's worst case bounded, at the cost of running two probe
//! arrays concurrently for a while. This table backs the top-level keyspace,
//! a hash value's field map, and a sorted set's name index.

use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;
use slab::Slab;

const INITIAL_CAPACITY: usize = 16;
const REHASH_BATCH: usize = 8;

/// A stable reference to an entry in an [`RhTable`].
///
/// Remains valid until the entry is removed, regardless of how many times
/// the table has grown or how many rehash steps have run in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

struct Slot {
    hash: u64,
    handle: usize,
    dist: u32,
}

/// An open-addressed hash table mapping byte-string keys to `V`.
pub struct RhTable<V> {
    arena: Slab<(Vec<u8>, V)>,
    hasher: RandomState,
    slots: Vec<Option<Slot>>,
    mask: usize,
    old: Option<Vec<Option<Slot>>>,
    old_mask: usize,
    rehash_cursor: usize,
    len: usize,
}

impl<V> Default for RhTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RhTable<V> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Creates an empty table with at least `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(INITIAL_CAPACITY).next_power_of_two();
        Self {
            arena: Slab::new(),
            hasher: RandomState::new(),
            slots: (0..cap).map(|_| None).collect(),
            mask: cap - 1,
            old: None,
            old_mask: 0,
            rehash_cursor: 0,
            len: 0,
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn hash_key(&self, key: &[u8]) -> u64 {
        let mut h = self.hasher.build_hasher();
        key.hash(&mut h);
        h.finish()
    }

    /// Looks up a value by key.
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.handle_of(key).map(|h| &self.arena[h.0].1)
    }

    /// Looks up a value by key, mutably.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        if let Some(h) = self.handle_of(key) {
            Some(&mut self.arena[h.0].1)
        } else {
            None
        }
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.handle_of(key).is_some()
    }

    /// Resolves a key to its stable handle, if present.
    pub fn handle_of(&self, key: &[u8]) -> Option<Handle> {
        let hash = self.hash_key(key);
        if let Some(idx) = find_slot(&self.slots, self.mask, hash, key, &self.arena) {
            return Some(Handle(self.slots[idx].as_ref().unwrap().handle));
        }
        if let Some(old) = &self.old {
            if let Some(idx) = find_slot(old, self.old_mask, hash, key, &self.arena) {
                return Some(Handle(old[idx].as_ref().unwrap().handle));
            }
        }
        None
    }

    /// Fetches a value by its previously-resolved handle.
    ///
    /// # Panics
    /// Panics if `handle` does not refer to a live entry.
    pub fn get_by_handle(&self, handle: Handle) -> &V {
        &self.arena[handle.0].1
    }

    /// Fetches a value mutably by its previously-resolved handle.
    ///
    /// # Panics
    /// Panics if `handle` does not refer to a live entry.
    pub fn get_mut_by_handle(&mut self, handle: Handle) -> &mut V {
        &mut self.arena[handle.0].1
    }

    /// Fetches the key bytes stored at a handle.
    ///
    /// # Panics
    /// Panics if `handle` does not refer to a live entry.
    pub fn key_by_handle(&self, handle: Handle) -> &[u8] {
        &self.arena[handle.0].0
    }

    /// Inserts or replaces a value. Returns the handle and the previous
    /// value, if any key was already present.
    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: V) -> (Handle, Option<V>) {
        self.migrate_step();
        let key = key.into();
        let hash = self.hash_key(&key);

        if let Some(idx) = find_slot(&self.slots, self.mask, hash, &key, &self.arena) {
            let handle = self.slots[idx].as_ref().unwrap().handle;
            let old_value = std::mem::replace(&mut self.arena[handle].1, value);
            return (Handle(handle), Some(old_value));
        }
        if let Some(old) = self.old.take() {
            if let Some(idx) = find_slot(&old, self.old_mask, hash, &key, &self.arena) {
                let handle = old[idx].as_ref().unwrap().handle;
                self.old = Some(old);
                let old_value = std::mem::replace(&mut self.arena[handle].1, value);
                return (Handle(handle), Some(old_value));
            }
            self.old = Some(old);
        }

        let arena_key = self.arena.insert((key, value));
        self.maybe_start_rehash();
        rh_put(
            &mut self.slots,
            self.mask,
            Slot {
                hash,
                handle: arena_key,
                dist: 0,
            },
        );
        self.len += 1;
        (Handle(arena_key), None)
    }

    /// Removes a key, returning its value if present.
    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        self.migrate_step();
        let hash = self.hash_key(key);

        if let Some(idx) = find_slot(&self.slots, self.mask, hash, key, &self.arena) {
            let handle = self.slots[idx].as_ref().unwrap().handle;
            rh_remove_at(&mut self.slots, self.mask, idx);
            self.len -= 1;
            return Some(self.arena.remove(handle).1);
        }
        if let Some(old) = &mut self.old {
            if let Some(idx) = find_slot(old, self.old_mask, hash, key, &self.arena) {
                let handle = old[idx].as_ref().unwrap().handle;
                rh_remove_at(old, self.old_mask, idx);
                self.len -= 1;
                return Some(self.arena.remove(handle).1);
            }
        }
        None
    }

    /// Removes an entry by handle, if it is still present.
    pub fn remove_by_handle(&mut self, handle: Handle) -> Option<V> {
        if !self.arena.contains(handle.0) {
            return None;
        }
        let key = self.arena[handle.0].0.clone();
        self.remove(&key)
    }

    /// Iterates over all `(key, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.arena.iter().map(|(_, (k, v))| (k.as_slice(), v))
    }

    /// Iterates over all handles in unspecified order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.arena.iter().map(|(k, _)| Handle(k))
    }

    fn maybe_start_rehash(&mut self) {
        if self.old.is_some() {
            return;
        }
        // grow once the table is more than 3/4 full
        if self.len * 4 <= self.slots.len() * 3 {
            return;
        }
        let new_cap = (self.slots.len() * 2).max(INITIAL_CAPACITY);
        let new_slots = (0..new_cap).map(|_| None).collect::<Vec<_>>();
        let old_slots = std::mem::replace(&mut self.slots, new_slots);
        self.old_mask = self.mask;
        self.mask = new_cap - 1;
        self.old = Some(old_slots);
        self.rehash_cursor = 0;
    }

    /// Migrates a bounded batch of slots from the old probe array into the
    /// new one. Called at the start of every mutating operation so rehashing
    /// finishes over a bounded number of subsequent calls rather than as one
    /// large pause. `REHASH_BATCH` bounds the number of *vacated* old-array
    /// slots examined per call, not the number of keys migrated: shifting a
    /// removed slot's probe-chain successors back (so a not-yet-migrated key
    /// is never left stranded behind a hole) can migrate more than one key
    /// per examined slot when a chain is long, which under the 3/4-load-factor
    /// growth trigger is the uncommon case rather than the norm.
    fn migrate_step(&mut self) {
        let Some(old) = self.old.as_mut() else {
            return;
        };
        let mut examined = 0;
        while examined < REHASH_BATCH && self.rehash_cursor < old.len() {
            match old[self.rehash_cursor].take() {
                None => {
                    self.rehash_cursor += 1;
                }
                Some(mut slot) => {
                    // a plain take() would leave a hole mid-chain while a
                    // later-chain entry is still unmigrated, which breaks
                    // find_slot's `None => absent` early-out for that entry;
                    // shift the rest of the chain back the same way a normal
                    // remove does, and re-examine this index next iteration
                    // in case the shift just refilled it.
                    rh_remove_at(old, self.old_mask, self.rehash_cursor);
                    // the old array's probe distance was measured from a home
                    // slot under the old mask; it means nothing under the new,
                    // larger one, so re-seed it the same way a fresh insert does
                    slot.dist = 0;
                    rh_put(&mut self.slots, self.mask, slot);
                }
            }
            examined += 1;
        }
        if self.rehash_cursor >= old.len() {
            self.old = None;
            self.rehash_cursor = 0;
        }
    }
}

fn find_slot<V>(
    slots: &[Option<Slot>],
    mask: usize,
    hash: u64,
    key: &[u8],
    arena: &Slab<(Vec<u8>, V)>,
) -> Option<usize> {
    if slots.is_empty() {
        return None;
    }
    let mut idx = (hash as usize) & mask;
    let mut dist: u32 = 0;
    loop {
        match &slots[idx] {
            None => return None,
            Some(slot) => {
                if slot.dist < dist {
                    // a poorer entry would already have displaced ours; absent
                    return None;
                }
                if slot.hash == hash && arena[slot.handle].0 == key {
                    return Some(idx);
                }
            }
        }
        idx = (idx + 1) & mask;
        dist += 1;
        if dist as usize > slots.len() {
            return None;
        }
    }
}

fn rh_put(slots: &mut [Option<Slot>], mask: usize, mut incoming: Slot) {
    let mut idx = (incoming.hash as usize) & mask;
    loop {
        match &mut slots[idx] {
            None => {
                slots[idx] = Some(incoming);
                return;
            }
            Some(resident) => {
                if resident.dist < incoming.dist {
                    std::mem::swap(resident, &mut incoming);
                }
            }
        }
        incoming.dist += 1;
        idx = (idx + 1) & mask;
    }
}

fn rh_remove_at(slots: &mut [Option<Slot>], mask: usize, mut idx: usize) {
    slots[idx] = None;
    loop {
        let next = (idx + 1) & mask;
        let should_shift = matches!(&slots[next], Some(slot) if slot.dist > 0);
        if !should_shift {
            break;
        }
        let mut moved = slots[next].take().unwrap();
        moved.dist -= 1;
        slots[idx] = Some(moved);
        idx = next;
    }
}
