//! The in-memory data engine: the keyspace, its value types, and the
//! supporting hash table / skip list / expiry heap it's built from.
//!
//! Nothing in this crate knows about sockets or wire bytes — it exposes a
//! plain `Keyspace` with one method per command, each returning a [`Reply`].
//! `fleetcache-protocol` owns turning wire requests into calls here and
//! turning [`Reply`] back into wire bytes.
#![deny(missing_docs, rustdoc::missing_crate_level_docs)]

/// Command-level error codes and the [`CacheError`] type they attach to.
pub mod error;
/// The TTL min-heap that backs key expiry.
pub mod expiry;
/// The Robin Hood hash table every keyspace lookup goes through.
pub mod hashtable;
/// The command-level API: one method per wire command.
pub mod keyspace;
/// The result type every `Keyspace` method returns.
pub mod reply;
/// The span-counted skip list that backs sorted sets.
pub mod skiplist;
/// The sorted-set value type, built on the skip list.
pub mod sorted_set;
/// The tagged value union stored for each key.
pub mod value;

pub use error::{CacheError, ErrorCode};
pub use hashtable::{Handle, RhTable};
pub use keyspace::Keyspace;
pub use reply::Reply;
pub use value::{Entry, ValueObject};
