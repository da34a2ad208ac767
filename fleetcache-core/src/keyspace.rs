//! The top-level keyspace: a name-indexed table of [`Entry`] values fused
//! with a TTL expiry heap, plus one method per wire command.
//!
//! Command methods take already-validated argument bytes (arity and
//! command-name routing happen in `fleetcache-protocol`) and the caller's
//! current monotonic timestamp, and return a [`Reply`] that never panics on
//! bad client input — only on a handle the caller could not possibly have
//! obtained from this keyspace.

use fleetcache_util::glob_match;

use crate::error::CacheError;
use crate::expiry::ExpiryHeap;
use crate::hashtable::{Handle, RhTable};
use crate::reply::Reply;
use crate::sorted_set::SortedSet;
use crate::value::{Entry, ValueObject};

/// The full in-memory dataset: every live key, its value, and its TTL.
#[derive(Default)]
pub struct Keyspace {
    table: RhTable<Entry>,
    expiry: ExpiryHeap<Handle>,
}

impl Keyspace {
    /// Creates an empty keyspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys. Does not lazily reap expired keys first, so
    /// this may briefly overcount until the next access or reap pass.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if the keyspace holds no keys.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The soonest absolute expiry time still scheduled, if any. The event
    /// loop folds this (via `min` with the idle-timeout deadline) into its
    /// poll timeout.
    pub fn next_expiry_ms(&self) -> Option<u64> {
        self.expiry.peek_min().map(|(at, _)| at)
    }

    /// Proactively reaps up to `budget` keys whose TTL has passed as of
    /// `now_ms`. Called once per event loop iteration so expired keys are
    /// reclaimed even if nothing ever accesses them again.
    pub fn reap_expired(&mut self, now_ms: u64, budget: usize) -> usize {
        let mut reaped = 0;
        while reaped < budget {
            let table = &mut self.table;
            let Some(handle) = self.expiry.pop_due(now_ms, |h, pos| {
                table.get_mut_by_handle(h).heap_pos = Some(pos);
            }) else {
                break;
            };
            let entry = self.table.get_mut_by_handle(handle);
            entry.heap_pos = None;
            self.table.remove_by_handle(handle);
            reaped += 1;
        }
        reaped
    }

    fn cancel_ttl(&mut self, handle: Handle) {
        let pos = self.table.get_by_handle(handle).heap_pos;
        if let Some(pos) = pos {
            let table = &mut self.table;
            self.expiry.cancel(pos, |h, new_pos| {
                table.get_mut_by_handle(h).heap_pos = Some(new_pos);
            });
            let entry = self.table.get_mut_by_handle(handle);
            entry.heap_pos = None;
            entry.expire_at_ms = None;
        }
    }

    fn schedule_ttl(&mut self, handle: Handle, expire_at_ms: u64) {
        self.cancel_ttl(handle);
        let table = &mut self.table;
        let pos = self.expiry.schedule(handle, expire_at_ms, |h, new_pos| {
            table.get_mut_by_handle(h).heap_pos = Some(new_pos);
        });
        let entry = self.table.get_mut_by_handle(handle);
        entry.heap_pos = Some(pos);
        entry.expire_at_ms = Some(expire_at_ms);
    }

    fn remove_key_handle(&mut self, handle: Handle) {
        self.cancel_ttl(handle);
        self.table.remove_by_handle(handle);
    }

    /// Resolves `key` to a live handle, lazily reaping it first if its TTL
    /// has already passed.
    fn resolve_live(&mut self, key: &[u8], now_ms: u64) -> Option<Handle> {
        let handle = self.table.handle_of(key)?;
        let expired = matches!(
            self.table.get_by_handle(handle).expire_at_ms,
            Some(t) if t <= now_ms
        );
        if expired {
            self.remove_key_handle(handle);
            None
        } else {
            Some(handle)
        }
    }

    fn set_value(&mut self, key: &[u8], value: ValueObject) {
        if let Some(handle) = self.table.handle_of(key) {
            self.cancel_ttl(handle);
        }
        self.table.insert(key, Entry::new(value));
    }

    fn get_or_create(&mut self, key: &[u8], now_ms: u64, default: impl FnOnce() -> ValueObject) -> Handle {
        if let Some(handle) = self.resolve_live(key, now_ms) {
            handle
        } else {
            let (handle, _) = self.table.insert(key, Entry::new(default()));
            handle
        }
    }

    // ---- string commands ----------------------------------------------

    /// `SET key value` — always clears any existing TTL, like a fresh write.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Reply {
        self.set_value(key, ValueObject::Str(value.to_vec()));
        Reply::str("OK")
    }

    /// `GET key`
    pub fn get(&mut self, key: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Nil,
            Some(h) => match self.table.get_by_handle(h).value.as_str() {
                Ok(s) => Reply::str(s.to_vec()),
                Err(e) => Reply::Err(e),
            },
        }
    }

    /// `DEL key`
    pub fn del(&mut self, key: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Int(0),
            Some(h) => {
                self.remove_key_handle(h);
                Reply::Int(1)
            }
        }
    }

    /// `EXISTS key`
    pub fn exists(&mut self, key: &[u8], now_ms: u64) -> Reply {
        Reply::Int(self.resolve_live(key, now_ms).is_some() as i64)
    }

    /// `MSET key value [key value ...]`
    pub fn mset(&mut self, pairs: &[(&[u8], &[u8])]) -> Reply {
        for (k, v) in pairs {
            self.set_value(k, ValueObject::Str(v.to_vec()));
        }
        Reply::str("OK")
    }

    /// `MGET key [key ...]` — a key missing or holding the wrong type
    /// yields `Nil` in that position rather than failing the whole batch.
    pub fn mget(&mut self, keys: &[&[u8]], now_ms: u64) -> Reply {
        let items = keys
            .iter()
            .map(|k| match self.resolve_live(k, now_ms) {
                None => Reply::Nil,
                Some(h) => match self.table.get_by_handle(h).value.as_str() {
                    Ok(s) => Reply::str(s.to_vec()),
                    Err(_) => Reply::Nil,
                },
            })
            .collect();
        Reply::Arr(items)
    }

    /// `MDEL key [key ...]`
    pub fn mdel(&mut self, keys: &[&[u8]], now_ms: u64) -> Reply {
        let mut count = 0i64;
        for k in keys {
            if let Some(h) = self.resolve_live(k, now_ms) {
                self.remove_key_handle(h);
                count += 1;
            }
        }
        Reply::Int(count)
    }

    fn add_to_counter(&mut self, key: &[u8], delta: i64, now_ms: u64) -> Reply {
        let handle = self.get_or_create(key, now_ms, || ValueObject::Str(b"0".to_vec()));
        let entry = self.table.get_mut_by_handle(handle);
        let current = match &entry.value {
            ValueObject::Str(s) => s.clone(),
            _ => return Reply::Err(CacheError::wrong_type()),
        };
        let parsed = std::str::from_utf8(&current)
            .ok()
            .and_then(|s| s.parse::<i64>().ok());
        let Some(current) = parsed else {
            return Reply::Err(CacheError::not_an_integer());
        };
        let Some(next) = current.checked_add(delta) else {
            return Reply::Err(CacheError::not_an_integer());
        };
        entry.value = ValueObject::Str(next.to_string().into_bytes());
        Reply::Int(next)
    }

    /// `INCR key`
    pub fn incr(&mut self, key: &[u8], now_ms: u64) -> Reply {
        self.add_to_counter(key, 1, now_ms)
    }

    /// `DECR key`
    pub fn decr(&mut self, key: &[u8], now_ms: u64) -> Reply {
        self.add_to_counter(key, -1, now_ms)
    }

    /// `INCRBY key delta`
    pub fn incrby(&mut self, key: &[u8], delta: i64, now_ms: u64) -> Reply {
        self.add_to_counter(key, delta, now_ms)
    }

    /// `DECRBY key delta`
    pub fn decrby(&mut self, key: &[u8], delta: i64, now_ms: u64) -> Reply {
        self.add_to_counter(key, delta.wrapping_neg(), now_ms)
    }

    /// `KEYS pattern` — matches against every live key, reaping any expired
    /// key it happens to walk past.
    pub fn keys(&mut self, pattern: &[u8], now_ms: u64) -> Reply {
        let expired: Vec<Vec<u8>> = self
            .table
            .iter()
            .filter(|(_, e)| matches!(e.expire_at_ms, Some(t) if t <= now_ms))
            .map(|(k, _)| k.to_vec())
            .collect();
        for k in expired {
            if let Some(h) = self.table.handle_of(&k) {
                self.remove_key_handle(h);
            }
        }
        let matched = self
            .table
            .iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, _)| k.to_vec())
            .collect::<Vec<_>>();
        Reply::str_arr(matched)
    }

    /// `PEXPIRE key ms` — a non-positive `ms` expires the key immediately.
    pub fn pexpire(&mut self, key: &[u8], ms: i64, now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Int(0),
            Some(h) => {
                if ms <= 0 {
                    self.remove_key_handle(h);
                } else {
                    self.schedule_ttl(h, now_ms + ms as u64);
                }
                Reply::Int(1)
            }
        }
    }

    /// `PTTL key` — `-2` if the key doesn't exist, `-1` if it exists with
    /// no TTL, otherwise the remaining milliseconds.
    pub fn pttl(&mut self, key: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Int(-2),
            Some(h) => match self.table.get_by_handle(h).expire_at_ms {
                None => Reply::Int(-1),
                Some(at) => Reply::Int(at.saturating_sub(now_ms) as i64),
            },
        }
    }

    // ---- hash commands ---------------------------------------------------

    /// `HGET key field`
    pub fn hget(&mut self, key: &[u8], field: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Nil,
            Some(h) => match self.table.get_by_handle(h).value.as_hash() {
                Err(e) => Reply::Err(e),
                Ok(hash) => match hash.get(field) {
                    Some(v) => Reply::str(v.clone()),
                    None => Reply::Nil,
                },
            },
        }
    }

    /// `HSET key field value [field value ...]` — replies with the number
    /// of fields that were newly created (not merely updated).
    pub fn hset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])], now_ms: u64) -> Reply {
        let handle = self.get_or_create(key, now_ms, || ValueObject::Hash(RhTable::new()));
        let hash = match self.table.get_mut_by_handle(handle).value.as_hash_mut() {
            Ok(h) => h,
            Err(e) => return Reply::Err(e),
        };
        let mut created = 0i64;
        for (field, value) in pairs {
            let (_, prev) = hash.insert(*field, value.to_vec());
            if prev.is_none() {
                created += 1;
            }
        }
        Reply::Int(created)
    }

    /// `HDEL key field [field ...]`
    pub fn hdel(&mut self, key: &[u8], fields: &[&[u8]], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Int(0),
            Some(h) => {
                let hash = match self.table.get_mut_by_handle(h).value.as_hash_mut() {
                    Ok(h) => h,
                    Err(e) => return Reply::Err(e),
                };
                let mut removed = 0i64;
                for f in fields {
                    if hash.remove(f).is_some() {
                        removed += 1;
                    }
                }
                Reply::Int(removed)
            }
        }
    }

    /// `HEXISTS key field`
    pub fn hexists(&mut self, key: &[u8], field: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Int(0),
            Some(h) => match self.table.get_by_handle(h).value.as_hash() {
                Err(e) => Reply::Err(e),
                Ok(hash) => Reply::Int(hash.contains_key(field) as i64),
            },
        }
    }

    /// `HGETALL key` — a missing key replies with an empty array, not nil.
    pub fn hgetall(&mut self, key: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Arr(Vec::new()),
            Some(h) => match self.table.get_by_handle(h).value.as_hash() {
                Err(e) => Reply::Err(e),
                Ok(hash) => {
                    let mut items = Vec::with_capacity(hash.len() * 2);
                    for (field, value) in hash.iter() {
                        items.push(Reply::str(field.to_vec()));
                        items.push(Reply::str(value.clone()));
                    }
                    Reply::Arr(items)
                }
            },
        }
    }

    // ---- sorted set commands ---------------------------------------------

    /// `ZADD key score name [score name ...]` — rejects NaN scores with
    /// `ERR_ARG`, replies with the count of newly-added members.
    pub fn zadd(&mut self, key: &[u8], pairs: &[(f64, &[u8])], now_ms: u64) -> Reply {
        if pairs.iter().any(|(score, _)| score.is_nan()) {
            return Reply::Err(CacheError::not_a_float());
        }
        let handle = self.get_or_create(key, now_ms, || ValueObject::SortedSet(SortedSet::new()));
        let zset = match self.table.get_mut_by_handle(handle).value.as_sorted_set_mut() {
            Ok(z) => z,
            Err(e) => return Reply::Err(e),
        };
        let mut added = 0i64;
        for (score, name) in pairs {
            if zset.upsert(name, *score) {
                added += 1;
            }
        }
        Reply::Int(added)
    }

    /// `ZREM key name [name ...]`
    pub fn zrem(&mut self, key: &[u8], names: &[&[u8]], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Int(0),
            Some(h) => {
                let zset = match self.table.get_mut_by_handle(h).value.as_sorted_set_mut() {
                    Ok(z) => z,
                    Err(e) => return Reply::Err(e),
                };
                let mut removed = 0i64;
                for n in names {
                    if zset.remove(n) {
                        removed += 1;
                    }
                }
                Reply::Int(removed)
            }
        }
    }

    /// `ZSCORE key name`
    pub fn zscore(&mut self, key: &[u8], name: &[u8], now_ms: u64) -> Reply {
        match self.resolve_live(key, now_ms) {
            None => Reply::Nil,
            Some(h) => match self.table.get_by_handle(h).value.as_sorted_set() {
                Err(e) => Reply::Err(e),
                Ok(zset) => match zset.score(name) {
                    Some(s) => Reply::Dbl(s),
                    None => Reply::Nil,
                },
            },
        }
    }

    /// `ZQUERY key score name offset limit` — seeks to the first member
    /// with key `>= (score, name)`, skips `offset` further members, then
    /// returns up to `limit` members as flattened `(name, score)` pairs.
    pub fn zquery(
        &mut self,
        key: &[u8],
        score: f64,
        name: &[u8],
        offset: u64,
        limit: u64,
        now_ms: u64,
    ) -> Reply {
        if score.is_nan() {
            return Reply::Err(CacheError::not_a_float());
        }
        match self.resolve_live(key, now_ms) {
            None => Reply::Arr(Vec::new()),
            Some(h) => match self.table.get_by_handle(h).value.as_sorted_set() {
                Err(e) => Reply::Err(e),
                Ok(zset) => {
                    let rows = zset.query(score, name, offset, limit);
                    let mut items = Vec::with_capacity(rows.len() * 2);
                    for (n, s) in rows {
                        items.push(Reply::str(n));
                        items.push(Reply::Dbl(s));
                    }
                    Reply::Arr(items)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.set(b"a", b"1"), Reply::str("OK"));
        assert_eq!(ks.get(b"a", 0), Reply::str(b"1".to_vec()));
        assert_eq!(ks.get(b"missing", 0), Reply::Nil);
    }

    #[test]
    fn get_on_wrong_type_errors() {
        let mut ks = Keyspace::new();
        ks.hset(b"h", &[(&b"f"[..], &b"v"[..])], 0);
        assert!(ks.get(b"h", 0).is_err());
    }

    #[test]
    fn del_and_exists() {
        let mut ks = Keyspace::new();
        ks.set(b"a", b"1");
        assert_eq!(ks.exists(b"a", 0), Reply::Int(1));
        assert_eq!(ks.del(b"a", 0), Reply::Int(1));
        assert_eq!(ks.del(b"a", 0), Reply::Int(0));
        assert_eq!(ks.exists(b"a", 0), Reply::Int(0));
    }

    #[test]
    fn incr_decr_on_missing_key_starts_at_zero() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.incr(b"c", 0), Reply::Int(1));
        assert_eq!(ks.decrby(b"c", 3, 0), Reply::Int(-2));
    }

    #[test]
    fn incr_on_non_integer_value_errors() {
        let mut ks = Keyspace::new();
        ks.set(b"s", b"not a number");
        assert!(ks.incr(b"s", 0).is_err());
    }

    #[test]
    fn pexpire_and_pttl_and_lazy_reaping() {
        let mut ks = Keyspace::new();
        assert_eq!(ks.pexpire(b"missing", 1000, 0), Reply::Int(0));
        assert_eq!(ks.pttl(b"missing", 0), Reply::Int(-2));

        ks.set(b"a", b"1");
        assert_eq!(ks.pttl(b"a", 0), Reply::Int(-1));
        assert_eq!(ks.pexpire(b"a", 100, 0), Reply::Int(1));
        assert_eq!(ks.pttl(b"a", 50), Reply::Int(50));

        // past the deadline, the key should read back as gone
        assert_eq!(ks.get(b"a", 200), Reply::Nil);
        assert_eq!(ks.pttl(b"a", 200), Reply::Int(-2));
    }

    #[test]
    fn incr_on_expired_key_resets_to_one() {
        let mut ks = Keyspace::new();
        ks.set(b"c", b"5");
        ks.pexpire(b"c", 10, 0);
        assert_eq!(ks.incr(b"c", 100), Reply::Int(1));
    }

    #[test]
    fn keys_matches_glob_pattern_and_skips_expired() {
        let mut ks = Keyspace::new();
        ks.set(b"cat", b"1");
        ks.set(b"car", b"1");
        ks.set(b"dog", b"1");
        ks.pexpire(b"car", 1, 0);

        let Reply::Arr(items) = ks.keys(b"c*", 100) else {
            panic!("expected array");
        };
        let names: Vec<Vec<u8>> = items
            .into_iter()
            .map(|r| match r {
                Reply::Str(s) => s,
                _ => panic!("expected str"),
            })
            .collect();
        assert_eq!(names, vec![b"cat".to_vec()]);
    }

    #[test]
    fn hash_commands() {
        let mut ks = Keyspace::new();
        assert_eq!(
            ks.hset(b"h", &[(&b"f1"[..], &b"v1"[..]), (&b"f2"[..], &b"v2"[..])], 0),
            Reply::Int(2)
        );
        assert_eq!(
            ks.hset(b"h", &[(&b"f1"[..], &b"v1b"[..])], 0),
            Reply::Int(0)
        );
        assert_eq!(ks.hget(b"h", b"f1", 0), Reply::str(b"v1b".to_vec()));
        assert_eq!(ks.hexists(b"h", b"f2", 0), Reply::Int(1));
        assert_eq!(ks.hdel(b"h", &[b"f2".as_slice()], 0), Reply::Int(1));
        assert_eq!(ks.hexists(b"h", b"f2", 0), Reply::Int(0));
        assert_eq!(ks.hgetall(b"missing", 0), Reply::Arr(Vec::new()));
    }

    #[test]
    fn zset_commands_and_query_pagination() {
        let mut ks = Keyspace::new();
        assert_eq!(
            ks.zadd(b"z", &[(3.0, b"c".as_slice()), (1.0, b"a".as_slice())], 0),
            Reply::Int(2)
        );
        assert_eq!(ks.zadd(b"z", &[(1.0, b"a".as_slice())], 0), Reply::Int(0));
        assert_eq!(ks.zscore(b"z", b"a", 0), Reply::Dbl(1.0));
        assert_eq!(ks.zscore(b"z", b"missing", 0), Reply::Nil);

        let Reply::Arr(items) = ks.zquery(b"z", f64::NEG_INFINITY, b"", 0, 10, 0) else {
            panic!("expected array")
        };
        assert_eq!(
            items,
            vec![
                Reply::str(b"a".to_vec()),
                Reply::Dbl(1.0),
                Reply::str(b"c".to_vec()),
                Reply::Dbl(3.0),
            ]
        );

        assert_eq!(ks.zrem(b"z", &[b"a".as_slice()], 0), Reply::Int(1));
        assert_eq!(ks.zrem(b"z", &[b"a".as_slice()], 0), Reply::Int(0));
    }

    #[test]
    fn zadd_rejects_nan_score() {
        let mut ks = Keyspace::new();
        assert!(ks.zadd(b"z", &[(f64::NAN, b"a".as_slice())], 0).is_err());
    }

    #[test]
    fn reap_expired_removes_keys_past_their_deadline() {
        let mut ks = Keyspace::new();
        ks.set(b"a", b"1");
        ks.pexpire(b"a", 10, 0);
        ks.set(b"b", b"1");
        ks.pexpire(b"b", 1000, 0);

        assert_eq!(ks.reap_expired(50, 10), 1);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.next_expiry_ms(), Some(1000));
    }
}
