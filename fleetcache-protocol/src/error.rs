//! Errors that mean the byte stream itself is unparsable.
//!
//! A [`FrameError`] always ends the connection: unlike a command-level
//! [`fleetcache_core::CacheError`], there is no way to reply to a request
//! whose length prefix lies or whose argument count is truncated, since we
//! can no longer trust where the next request starts.

use thiserror::Error;

/// Hard limit on the number of arguments in a single request.
pub const MAX_ARGS: usize = 1024;
/// Hard limit, in bytes, on the size of a request frame's body.
pub const MAX_MSG: usize = 32 * 1024 * 1024;

/// A request frame that cannot be decoded.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The declared frame length exceeds [`MAX_MSG`].
    #[error("request length {len} exceeds the {max} byte limit")]
    TooBig {
        /// The length the client declared.
        len: usize,
        /// The configured limit.
        max: usize,
    },
    /// The declared argument count exceeds [`MAX_ARGS`].
    #[error("request has {n} arguments, exceeding the {max} limit")]
    TooManyArgs {
        /// The argument count the client declared.
        n: usize,
        /// The configured limit.
        max: usize,
    },
    /// The frame's internal structure doesn't add up (truncated length
    /// prefix, argument bytes running past the declared frame length,
    /// trailing bytes left over after the declared arguments, ...).
    #[error("malformed request frame: {0}")]
    Malformed(&'static str),
}
