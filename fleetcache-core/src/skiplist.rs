//! A skip list ordered by `(score, name)`, used as the backing store for
//! sorted sets.
//!
//! Each forward link at level `i` carries a span: the number of base-level
//! nodes it skips over. Summing spans while descending during a search
//! gives the 0-based rank of any key in O(log N), which is what
//! [`Skiplist::seek_ge`] and [`Skiplist::advance`] build on to support
//! `ZQUERY`'s `(score, name, offset, limit)` cursor without a linear scan.

use slab::Slab;

const MAX_LEVEL: usize = 32;
const P: f64 = 0.25;

struct SkipNode {
    name: Vec<u8>,
    score: f64,
    forward: Vec<Option<usize>>,
    span: Vec<u64>,
}

/// An ordered skip list of `(score, name)` keys.
pub struct Skiplist {
    arena: Slab<SkipNode>,
    head_forward: Vec<Option<usize>>,
    head_span: Vec<u64>,
    level: usize,
    len: usize,
    rng_state: u64,
}

fn key_cmp(score_a: f64, name_a: &[u8], score_b: f64, name_b: &[u8]) -> std::cmp::Ordering {
    score_a
        .partial_cmp(&score_b)
        .expect("scores must never be NaN")
        .then_with(|| name_a.cmp(name_b))
}

impl Default for Skiplist {
    fn default() -> Self {
        Self::new()
    }
}

impl Skiplist {
    /// Creates an empty skip list.
    pub fn new() -> Self {
        Self {
            arena: Slab::new(),
            head_forward: vec![None; MAX_LEVEL],
            head_span: vec![0; MAX_LEVEL],
            level: 1,
            len: 0,
            rng_state: 0x9E3779B97F4A7C15,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn random_level(&mut self) -> usize {
        // xorshift64*, fine for level selection, not cryptographic
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;

        let mut level = 1;
        while level < MAX_LEVEL && ((x.rotate_left(level as u32) as f64 / u64::MAX as f64) < P) {
            level += 1;
        }
        level
    }

    /// Inserts a new `(score, name)` pair.
    ///
    /// # Panics
    /// Panics if `score` is NaN; callers must reject NaN scores before this
    /// point (`ZADD` surfaces that as `ERR_ARG`).
    pub fn insert(&mut self, score: f64, name: &[u8]) -> usize {
        assert!(!score.is_nan(), "NaN scores must be rejected before insert");

        let mut update: Vec<Option<usize>> = vec![None; MAX_LEVEL];
        let mut update_is_head: Vec<bool> = vec![false; MAX_LEVEL];
        let mut rank: Vec<u64> = vec![0; MAX_LEVEL];

        let mut cur: Option<usize> = None;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let (next, span) = self.forward_and_span(cur, i);
                let Some(next_idx) = next else { break };
                let node = &self.arena[next_idx];
                if key_cmp(node.score, &node.name, score, name) == std::cmp::Ordering::Less {
                    rank[i] += span;
                    cur = Some(next_idx);
                } else {
                    break;
                }
            }
            match cur {
                Some(idx) => {
                    update[i] = Some(idx);
                    update_is_head[i] = false;
                }
                None => {
                    update_is_head[i] = true;
                }
            }
        }

        let new_level = self.random_level();
        if new_level > self.level {
            for i in self.level..new_level {
                rank[i] = 0;
                update_is_head[i] = true;
                update[i] = None;
                // no node has ever linked through this level; treat it as
                // spanning the whole list so far, matching a freshly grown
                // head pointer
                self.head_span[i] = self.len as u64;
            }
            self.level = new_level;
        }

        let new_idx = self.arena.insert(SkipNode {
            name: name.to_vec(),
            score,
            forward: vec![None; new_level],
            span: vec![0; new_level],
        });

        for i in 0..new_level {
            let (next, _) = if update_is_head[i] {
                (self.head_forward[i], self.head_span[i])
            } else {
                let p = update[i].unwrap();
                (self.arena[p].forward[i], self.arena[p].span[i])
            };
            self.arena[new_idx].forward[i] = next;

            let prev_span = if update_is_head[i] {
                self.head_span[i]
            } else {
                self.arena[update[i].unwrap()].span[i]
            };
            self.arena[new_idx].span[i] = prev_span - (rank[0] - rank[i]);

            let new_span = (rank[0] - rank[i]) + 1;
            if update_is_head[i] {
                self.head_forward[i] = Some(new_idx);
                self.head_span[i] = new_span;
            } else {
                let p = update[i].unwrap();
                self.arena[p].forward[i] = Some(new_idx);
                self.arena[p].span[i] = new_span;
            }
        }

        for i in new_level..self.level {
            if update_is_head[i] {
                self.head_span[i] += 1;
            } else {
                let p = update[i].unwrap();
                self.arena[p].span[i] += 1;
            }
        }

        self.len += 1;
        new_idx
    }

    /// Removes the exact `(score, name)` entry, if present.
    pub fn remove(&mut self, score: f64, name: &[u8]) -> bool {
        let mut update: Vec<Option<usize>> = vec![None; MAX_LEVEL];
        let mut update_is_head: Vec<bool> = vec![true; MAX_LEVEL];
        let mut cur: Option<usize> = None;

        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(cur, i);
                let Some(next_idx) = next else { break };
                let node = &self.arena[next_idx];
                if key_cmp(node.score, &node.name, score, name) == std::cmp::Ordering::Less {
                    cur = Some(next_idx);
                } else {
                    break;
                }
            }
            update[i] = cur;
            update_is_head[i] = cur.is_none();
        }

        let target = self.forward(cur, 0);
        let Some(target_idx) = target else { return false };
        {
            let node = &self.arena[target_idx];
            if node.score != score || node.name != name {
                return false;
            }
        }

        let target_level = self.arena[target_idx].forward.len();
        for i in 0..self.level {
            let (linked_forward, span_here) = if update_is_head[i] {
                (self.head_forward[i], self.head_span[i])
            } else {
                let p = update[i].unwrap();
                (self.arena[p].forward[i], self.arena[p].span[i])
            };
            if i < target_level && linked_forward == Some(target_idx) {
                let tgt_span = self.arena[target_idx].span[i];
                let new_forward = self.arena[target_idx].forward[i];
                let new_span = span_here + tgt_span - 1;
                if update_is_head[i] {
                    self.head_forward[i] = new_forward;
                    self.head_span[i] = new_span;
                } else {
                    let p = update[i].unwrap();
                    self.arena[p].forward[i] = new_forward;
                    self.arena[p].span[i] = new_span;
                }
            } else {
                let new_span = span_here.saturating_sub(1);
                if update_is_head[i] {
                    self.head_span[i] = new_span;
                } else {
                    let p = update[i].unwrap();
                    self.arena[p].span[i] = new_span;
                }
            }
        }
        while self.level > 1 && self.head_forward[self.level - 1].is_none() {
            self.level -= 1;
        }

        self.arena.remove(target_idx);
        self.len -= 1;
        true
    }

    /// Returns the score stored at arena index `idx`.
    pub fn score_at(&self, idx: usize) -> f64 {
        self.arena[idx].score
    }

    /// Returns the name stored at arena index `idx`.
    pub fn name_at(&self, idx: usize) -> &[u8] {
        &self.arena[idx].name
    }

    /// Finds the first entry whose key is `>= (score, name)`.
    pub fn seek_ge(&self, score: f64, name: &[u8]) -> Option<usize> {
        let mut cur: Option<usize> = None;
        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(cur, i);
                let Some(next_idx) = next else { break };
                let node = &self.arena[next_idx];
                if key_cmp(node.score, &node.name, score, name) == std::cmp::Ordering::Less {
                    cur = Some(next_idx);
                } else {
                    break;
                }
            }
        }
        self.forward(cur, 0)
    }

    /// Walks forward `n` base-level steps from `from` (or from the head if
    /// `None`), returning the arena index reached, if any.
    pub fn advance(&self, from: Option<usize>, n: u64) -> Option<usize> {
        let mut cur = from;
        for _ in 0..n {
            cur = self.forward(cur, 0);
            cur?;
        }
        cur
    }

    /// Iterates forward from `from` (inclusive), yielding `(name, score)`.
    pub fn iter_from(&self, from: Option<usize>) -> impl Iterator<Item = (&[u8], f64)> {
        SkipIter {
            list: self,
            cur: from,
        }
    }

    fn forward(&self, from: Option<usize>, level: usize) -> Option<usize> {
        match from {
            None => self.head_forward.get(level).copied().flatten(),
            Some(idx) => self.arena[idx].forward.get(level).copied().flatten(),
        }
    }

    fn forward_and_span(&self, from: Option<usize>, level: usize) -> (Option<usize>, u64) {
        match from {
            None => (
                self.head_forward.get(level).copied().flatten(),
                *self.head_span.get(level).unwrap_or(&0),
            ),
            Some(idx) => {
                let node = &self.arena[idx];
                (
                    node.forward.get(level).copied().flatten(),
                    *node.span.get(level).unwrap_or(&0),
                )
            }
        }
    }
}

struct SkipIter<'a> {
    list: &'a Skiplist,
    cur: Option<usize>,
}

impl<'a> Iterator for SkipIter<'a> {
    type Item = (&'a [u8], f64);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cur?;
        let node = &self.list.arena[idx];
        self.cur = self.list.forward(Some(idx), 0);
        Some((&node.name, node.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_all(list: &Skiplist) -> Vec<(Vec<u8>, f64)> {
        list.iter_from(list.advance(None, 0).or_else(|| list.seek_ge(f64::NEG_INFINITY, b"")))
            .map(|(n, s)| (n.to_vec(), s))
            .collect()
    }

    #[test]
    fn insert_keeps_score_then_name_order() {
        let mut list = Skiplist::new();
        list.insert(5.0, b"b");
        list.insert(5.0, b"a");
        list.insert(1.0, b"z");
        list.insert(-3.0, b"m");

        let all = collect_all(&list);
        assert_eq!(
            all,
            vec![
                (b"m".to_vec(), -3.0),
                (b"z".to_vec(), 1.0),
                (b"a".to_vec(), 5.0),
                (b"b".to_vec(), 5.0),
            ]
        );
    }

    #[test]
    fn remove_unlinks_and_shrinks_len() {
        let mut list = Skiplist::new();
        let mut idx = Vec::new();
        for i in 0..200 {
            idx.push(list.insert(i as f64, format!("k{i}").as_bytes()));
        }
        assert_eq!(list.len(), 200);
        assert!(list.remove(100.0, b"k100"));
        assert_eq!(list.len(), 199);
        assert!(!list.remove(100.0, b"k100"));

        let all = collect_all(&list);
        assert_eq!(all.len(), 199);
        assert!(!all.iter().any(|(n, _)| n == b"k100"));
        // still sorted
        for w in all.windows(2) {
            assert!(key_cmp(w[0].1, &w[0].0, w[1].1, &w[1].0) != std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn seek_ge_and_advance_support_offset_limit_pagination() {
        let mut list = Skiplist::new();
        for i in 0..20 {
            list.insert(i as f64, format!("k{i:02}").as_bytes());
        }
        let start = list.seek_ge(5.0, b"");
        let offset_start = list.advance(start, 3);
        let page: Vec<_> = list
            .iter_from(offset_start)
            .take(4)
            .map(|(n, s)| (n.to_vec(), s))
            .collect();
        assert_eq!(
            page,
            vec![
                (b"k08".to_vec(), 8.0),
                (b"k09".to_vec(), 9.0),
                (b"k10".to_vec(), 10.0),
                (b"k11".to_vec(), 11.0),
            ]
        );
    }

    #[test]
    fn negative_and_positive_scores_interleave_correctly() {
        let mut list = Skiplist::new();
        for (s, n) in [(-5.0, "a"), (0.0, "b"), (5.0, "c"), (-100.0, "d"), (3.5, "e")] {
            list.insert(s, n.as_bytes());
        }
        let all = collect_all(&list);
        let scores: Vec<f64> = all.iter().map(|(_, s)| *s).collect();
        assert_eq!(scores, vec![-100.0, -5.0, 0.0, 3.5, 5.0]);
    }
}
