//! The result of executing a command against the keyspace, independent of
//! how it is eventually serialized onto the wire.

use crate::error::CacheError;

/// A successful or failed command result.
///
/// [`fleetcache_protocol`](../fleetcache_protocol/index.html) owns the
/// mapping from this type onto the five wire tags (NIL/STR/INT/DBL/ARR) plus
/// the ERR frame; this crate only needs to express "what happened", not "how
/// it's framed".
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// No value (missing key, absent field, ...).
    Nil,
    /// A byte string.
    Str(Vec<u8>),
    /// A signed 64-bit integer.
    Int(i64),
    /// A double-precision float.
    Dbl(f64),
    /// An ordered array of replies, possibly nested.
    Arr(Vec<Reply>),
    /// A command-level error.
    Err(CacheError),
}

impl Reply {
    /// Shorthand for a string reply built from anything byte-convertible.
    pub fn str(bytes: impl Into<Vec<u8>>) -> Self {
        Reply::Str(bytes.into())
    }

    /// Shorthand for an array of string replies.
    pub fn str_arr<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Reply::Arr(items.into_iter().map(|b| Reply::str(b)).collect())
    }

    /// True if this is an `Err` reply.
    pub fn is_err(&self) -> bool {
        matches!(self, Reply::Err(_))
    }
}

impl From<CacheError> for Reply {
    fn from(err: CacheError) -> Self {
        Reply::Err(err)
    }
}
