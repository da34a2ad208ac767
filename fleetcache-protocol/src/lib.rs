//! Wire protocol: request/response framing and command parsing/dispatch on
//! top of [`fleetcache_core::Keyspace`].
#![deny(missing_docs, rustdoc::missing_crate_level_docs)]

/// Argv parsing, arity checks, and dispatch onto a [`fleetcache_core::Keyspace`].
pub mod command;
/// Frame-level (connection-ending) errors.
pub mod error;
/// Request/response byte framing.
pub mod frame;

pub use command::{dispatch, Command};
pub use error::{FrameError, MAX_ARGS, MAX_MSG};
pub use frame::{encode_response, try_parse_request};
