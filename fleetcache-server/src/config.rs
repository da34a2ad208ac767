//! Command-line and environment-variable configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Parser, ValueEnum};

/// Default idle-connection timeout, in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;

/// A single-threaded, in-memory key/value cache server speaking a custom
/// binary protocol over TCP.
#[derive(Parser, Debug, Clone)]
#[command(name = "fleetcache-server", version)]
pub struct Options {
    /// Address to bind the listening socket to.
    #[arg(long = "bind", env = "FLEETCACHE_BIND", default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub bind_addr: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "FLEETCACHE_PORT", default_value_t = 1234)]
    pub port: u16,

    /// Close a connection that hasn't sent a complete request in this many
    /// milliseconds.
    #[arg(long, env = "FLEETCACHE_IDLE_TIMEOUT_MS", default_value_t = DEFAULT_IDLE_TIMEOUT_MS)]
    pub idle_timeout_ms: u64,

    /// Maximum number of simultaneously open connections. Further accepts
    /// are refused (the listener keeps polling, but the connection is
    /// closed immediately) until one drops below this count.
    #[arg(long, env = "FLEETCACHE_MAX_CONNECTIONS", default_value_t = 10_000)]
    pub max_connections: usize,

    /// Upper bound on how many keys to proactively reap from the TTL heap
    /// per event loop iteration, so a large expiry backlog can't stall new
    /// connections from being serviced.
    #[arg(long, env = "FLEETCACHE_REAP_BATCH", default_value_t = 256)]
    pub reap_batch: usize,

    /// Per-connection write-buffer watermark, in bytes. A connection whose
    /// queued responses exceed this is sent a terminal `TOO_BIG` error and
    /// closed after the buffer flushes.
    #[arg(long, env = "FLEETCACHE_WRITE_WATERMARK_BYTES", default_value_t = 8 * 1024 * 1024)]
    pub write_watermark_bytes: usize,

    /// On SIGINT/SIGTERM, how long to wait for in-flight responses to
    /// flush before force-closing any connections still open.
    #[arg(long, env = "FLEETCACHE_SHUTDOWN_GRACE_MS", default_value_t = 1_000)]
    pub shutdown_grace_ms: u64,

    /// Log output format.
    #[arg(long, env = "FLEETCACHE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Tracing filter directive, e.g. `fleetcache_server=debug`. Overrides
    /// the default `info` level for everything in this workspace.
    #[arg(long, env = "FLEETCACHE_LOG_FILTER")]
    pub log_filter: Option<String>,
}

/// Log encoding the server emits on startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text, the default for interactive use.
    Text,
    /// Newline-delimited JSON, for shipping to a log aggregator.
    Json,
}

impl Options {
    /// The socket address to bind, combining `bind_addr` and `port`.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}
