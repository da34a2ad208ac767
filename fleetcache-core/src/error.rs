//! In-band command errors.
//!
//! These are distinct from [`fleetcache_protocol::FrameError`]: a frame error
//! means the connection's byte stream itself is unparsable and the connection
//! is torn down, while a [`CacheError`] is a normal reply sent back to a
//! client that asked for something invalid (unknown command, wrong arity,
//! wrong value type, ...). It never unwinds and never closes the connection.

use std::fmt;

/// Numeric error codes, stable across protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Unknown command name.
    Unknown = 1,
    /// Request or value exceeded a configured size limit.
    TooBig = 2,
    /// Command applied to a key holding a value of the wrong type.
    WrongType = 3,
    /// Malformed argument (wrong arity, non-integer where one was required, ...).
    Arg = 4,
    /// Malformed request frame.
    Malformed = 5,
}

impl ErrorCode {
    /// The wire-level numeric code.
    pub fn code(self) -> u32 {
        self as u32
    }
}

/// An error reply: a stable numeric code plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable message, sent back to the client verbatim.
    pub message: String,
}

impl CacheError {
    /// Builds an error with an explicit code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `ERR_UNKNOWN`: the command name isn't recognized.
    pub fn unknown_command(name: &[u8]) -> Self {
        Self::new(
            ErrorCode::Unknown,
            format!("unknown command '{}'", String::from_utf8_lossy(name)),
        )
    }

    /// `ERR_TOO_BIG`: a request or value exceeded a configured limit.
    pub fn too_big(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooBig, what)
    }

    /// `ERR_WRONGTYPE`, with the exact message the original server used.
    pub fn wrong_type() -> Self {
        Self::new(
            ErrorCode::WrongType,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        )
    }

    /// `ERR_ARG` for a bad arity.
    pub fn wrong_arity(command: &str) -> Self {
        Self::new(
            ErrorCode::Arg,
            format!("wrong number of arguments for '{command}' command"),
        )
    }

    /// `ERR_ARG` for a value that should have parsed as an integer and didn't.
    pub fn not_an_integer() -> Self {
        Self::new(ErrorCode::Arg, "value is not an integer or out of range")
    }

    /// `ERR_ARG` for a value that should have parsed as a float and didn't.
    pub fn not_a_float() -> Self {
        Self::new(ErrorCode::Arg, "value is not a valid float")
    }

    /// `ERR_MALFORMED` for a structurally invalid request frame.
    pub fn malformed(what: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, what)
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CacheError {}
