//! The tagged union stored at every key.

use crate::error::CacheError;
use crate::hashtable::RhTable;
use crate::sorted_set::SortedSet;

/// The value stored at a key: a string, a hash of field/value pairs, or a
/// sorted set of name/score members.
///
/// Every command that reads or writes a key checks the stored variant
/// first; a command aimed at the wrong variant (e.g. `HGET` on a key
/// holding a plain string) produces [`CacheError::wrong_type`] rather than
/// coercing between representations.
pub enum ValueObject {
    /// A plain byte string, as written by `SET`/`MSET` and read/mutated by
    /// `GET`/`INCR`/`DECR`/`INCRBY`/`DECRBY`.
    Str(Vec<u8>),
    /// A map of field names to byte-string values (`HSET`/`HGET`/...).
    Hash(RhTable<Vec<u8>>),
    /// A set of byte-string names each carrying an `f64` score
    /// (`ZADD`/`ZSCORE`/`ZQUERY`/...).
    SortedSet(SortedSet),
}

impl ValueObject {
    /// Borrows the value as a string, or produces `WRONGTYPE`.
    pub fn as_str(&self) -> Result<&[u8], CacheError> {
        match self {
            ValueObject::Str(s) => Ok(s),
            _ => Err(CacheError::wrong_type()),
        }
    }

    /// Borrows the value as a hash, or produces `WRONGTYPE`.
    pub fn as_hash(&self) -> Result<&RhTable<Vec<u8>>, CacheError> {
        match self {
            ValueObject::Hash(h) => Ok(h),
            _ => Err(CacheError::wrong_type()),
        }
    }

    /// Mutably borrows the value as a hash, or produces `WRONGTYPE`.
    pub fn as_hash_mut(&mut self) -> Result<&mut RhTable<Vec<u8>>, CacheError> {
        match self {
            ValueObject::Hash(h) => Ok(h),
            _ => Err(CacheError::wrong_type()),
        }
    }

    /// Borrows the value as a sorted set, or produces `WRONGTYPE`.
    pub fn as_sorted_set(&self) -> Result<&SortedSet, CacheError> {
        match self {
            ValueObject::SortedSet(z) => Ok(z),
            _ => Err(CacheError::wrong_type()),
        }
    }

    /// Mutably borrows the value as a sorted set, or produces `WRONGTYPE`.
    pub fn as_sorted_set_mut(&mut self) -> Result<&mut SortedSet, CacheError> {
        match self {
            ValueObject::SortedSet(z) => Ok(z),
            _ => Err(CacheError::wrong_type()),
        }
    }
}

/// What lives at a key: its value plus its position (if any) in the expiry
/// heap, so `PEXPIRE`/`PTTL`/deletion can reach the heap slot in O(1)
/// instead of scanning for it.
pub struct Entry {
    /// The stored value.
    pub value: ValueObject,
    /// Position in the expiry heap, or `None` if the key has no TTL.
    pub heap_pos: Option<crate::expiry::HeapPos>,
    /// Denormalized copy of the heap's expiry time for this key, so a
    /// lazy expiry check on a hot path (`GET`, `HGET`, ...) is a plain
    /// field read instead of a heap query.
    pub expire_at_ms: Option<u64>,
}

impl Entry {
    /// Wraps a value with no TTL set.
    pub fn new(value: ValueObject) -> Self {
        Self {
            value,
            heap_pos: None,
            expire_at_ms: None,
        }
    }
}
