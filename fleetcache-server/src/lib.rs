//! The fleetcache server binary's library surface: per-connection state,
//! the idle list, signal plumbing, and the `mio`-based reactor loop that
//! ties them to [`fleetcache_core::Keyspace`] and
//! [`fleetcache_protocol::dispatch`].
//!
//! `main.rs` is a thin CLI wrapper around [`eventloop::run`]; everything
//! that benefits from being exercised with a real `TcpStream` in a test
//! lives here instead.
#![deny(missing_docs, rustdoc::missing_crate_level_docs)]

/// Command-line and environment-variable configuration.
pub mod config;
/// Per-connection buffers and read/write state machine.
pub mod connection;
/// Connection-level (non-fatal-to-the-process) errors.
pub mod error;
/// The `mio` reactor loop.
pub mod eventloop;
/// The intrusive idle-connection list.
pub mod idle;
/// SIGINT/SIGTERM handling via a self-pipe.
pub mod signal;
