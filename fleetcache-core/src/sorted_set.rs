//! A sorted set: a name-indexed wrapper around [`Skiplist`] supporting
//! `ZADD`/`ZREM`/`ZSCORE`/`ZQUERY`.
//!
//! The name -> skiplist-node lookup goes through the same
//! [`RhTable`](crate::hashtable::RhTable) used for the keyspace and for hash
//! values, so a member lookup by name is O(1) average case; only ordered
//! traversal and range queries touch the skip list.

use crate::hashtable::RhTable;
use crate::skiplist::Skiplist;

/// A set of `(name, score)` members ordered by `(score, name)`.
#[derive(Default)]
pub struct SortedSet {
    skiplist: Skiplist,
    index: RhTable<usize>,
}

impl SortedSet {
    /// Creates an empty sorted set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns a member's score.
    pub fn score(&self, name: &[u8]) -> Option<f64> {
        self.index
            .get(name)
            .map(|&slot| self.skiplist.score_at(slot))
    }

    /// Inserts or updates a member's score. Returns `true` if `name` is a
    /// newly-added member (mirroring `ZADD`'s "number of new elements"
    /// reply), `false` if it already existed (its score is still updated).
    ///
    /// # Panics
    /// Panics if `score` is NaN; reject NaN before calling this.
    pub fn upsert(&mut self, name: &[u8], score: f64) -> bool {
        assert!(!score.is_nan(), "NaN scores must be rejected before upsert");

        if let Some(&old_slot) = self.index.get(name) {
            let old_score = self.skiplist.score_at(old_slot);
            if old_score == score {
                return false;
            }
            self.skiplist.remove(old_score, name);
            let new_slot = self.skiplist.insert(score, name);
            self.index.insert(name, new_slot);
            false
        } else {
            let slot = self.skiplist.insert(score, name);
            self.index.insert(name, slot);
            true
        }
    }

    /// Removes a member. Returns `true` if it was present.
    pub fn remove(&mut self, name: &[u8]) -> bool {
        match self.index.remove(name) {
            Some(slot) => {
                let score = self.skiplist.score_at(slot);
                self.skiplist.remove(score, name);
                true
            }
            None => false,
        }
    }

    /// Seeks to the first member with key `>= (score, name)`, skips
    /// `offset` further members, then returns up to `limit` members in
    /// ascending `(score, name)` order.
    pub fn query(&self, score: f64, name: &[u8], offset: u64, limit: u64) -> Vec<(Vec<u8>, f64)> {
        let start = self.skiplist.seek_ge(score, name);
        let start = self.skiplist.advance(start, offset);
        self.skiplist
            .iter_from(start)
            .take(limit as usize)
            .map(|(n, s)| (n.to_vec(), s))
            .collect()
    }
}
