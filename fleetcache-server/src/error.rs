//! Errors that end a single connection without affecting any other
//! connection or the keyspace itself.

use thiserror::Error;

/// A fatal error for one connection.
#[derive(Debug, Error)]
pub enum ConnError {
    /// A read or write on the socket failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The peer closed its write half mid-request and never sent the rest.
    #[error("connection closed with a partial request buffered")]
    ClosedMidRequest,
}
