//! The single-threaded reactor: wraps a `mio` poll loop around the
//! keyspace, the connection table, and the idle list, and is the only
//! blocking call in the process.
//!
//! Binding the listening socket is split out from serving it
//! ([`bind`]/[`serve`]) so tests can bind to an ephemeral port, read back
//! the address the OS actually chose, and only then hand the listener to
//! [`serve`] on a background thread.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use fleetcache_core::Keyspace;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;
use socket2::{Domain, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::Options;
use crate::connection::{ConnState, Connection};
use crate::idle::IdleList;
use crate::signal::SignalPipe;

const LISTENER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
const FIRST_CONN_TOKEN: usize = 2;

/// Upper bound on the poll timeout when neither a TTL nor an idle-eviction
/// deadline is pending, so the loop still wakes periodically (e.g. to
/// notice a signal that raced the self-pipe registration).
const POLL_CEILING_MS: u64 = 10_000;

/// How often the reactor wakes while draining connections during shutdown,
/// to re-check whether the grace deadline has elapsed.
const SHUTDOWN_POLL_MS: u64 = 50;

/// Binds the listening socket per `options` (address, `SO_REUSEADDR`,
/// non-blocking, backlog) and returns it without starting the reactor, so
/// callers (tests, `main`) can observe the OS-assigned address when
/// `options.port` is `0`.
pub fn bind(options: &Options) -> io::Result<std::net::TcpListener> {
    let addr = options.socket_addr();
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(socket.into())
}

/// Binds per `options` and runs the reactor until a shutdown signal is
/// received or an unrecoverable OS error occurs.
pub fn run(options: Options) -> io::Result<()> {
    let listener = bind(&options)?;
    serve(options, listener)
}

/// Runs the reactor against an already-bound listening socket.
///
/// This is the entire process's event loop: accepting connections, driving
/// each ready connection's read/write state machine, reaping expired keys,
/// evicting idle connections, and computing the next poll timeout from
/// whichever of those deadlines is soonest. Nothing here spawns a thread;
/// the keyspace, the idle list, and every connection's buffers are touched
/// only from this call.
pub fn serve(options: Options, std_listener: std::net::TcpListener) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let registry = poll.registry().try_clone()?;

    let mut listener = TcpListener::from_std(std_listener);
    registry.register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut signals = SignalPipe::install()?;
    signals.register(&registry, SIGNAL_TOKEN)?;

    let mut connections: Slab<Connection> = Slab::new();
    let mut idle = IdleList::new();
    let mut keyspace = Keyspace::new();
    let mut events = Events::with_capacity(1024);

    let mut shutting_down = false;
    let mut shutdown_deadline_ms: Option<u64> = None;

    info!(addr = %listener.local_addr()?, "fleetcache-server listening");

    loop {
        let now_ms = fleetcache_util::monotonic_now_ms();
        let timeout = poll_timeout(&keyspace, &idle, &options, now_ms, shutting_down);
        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    if !shutting_down {
                        accept_all(&listener, &registry, &mut connections, &mut idle, &options);
                    }
                }
                SIGNAL_TOKEN => {
                    if signals.drain() && !shutting_down {
                        info!("shutdown signal received, draining connections");
                        shutting_down = true;
                        shutdown_deadline_ms =
                            Some(fleetcache_util::monotonic_now_ms() + options.shutdown_grace_ms);
                        let _ = registry.deregister(&mut listener);
                        close_idle_now(&mut connections, &mut idle, &registry);
                    }
                }
                token => {
                    service_connection(
                        token,
                        event,
                        &mut connections,
                        &mut idle,
                        &mut keyspace,
                        &registry,
                        fleetcache_util::monotonic_now_ms(),
                        &options,
                    );
                }
            }
        }

        let now_ms = fleetcache_util::monotonic_now_ms();
        let reaped = keyspace.reap_expired(now_ms, options.reap_batch);
        if reaped > 0 {
            debug!(reaped, "reaped expired keys");
        }
        evict_idle(&mut connections, &mut idle, &registry, &options, now_ms);

        if shutting_down {
            if connections.is_empty() {
                info!("all connections drained, shutting down");
                return Ok(());
            }
            if shutdown_deadline_ms.is_some_and(|deadline| now_ms >= deadline) {
                warn!(
                    open = connections.len(),
                    "shutdown grace period elapsed, force-closing remaining connections"
                );
                for mut conn in connections.drain() {
                    let _ = registry.deregister(conn.stream());
                }
                return Ok(());
            }
        }
    }
}

fn poll_timeout(
    keyspace: &Keyspace,
    idle: &IdleList,
    options: &Options,
    now_ms: u64,
    shutting_down: bool,
) -> Duration {
    if shutting_down {
        return Duration::from_millis(SHUTDOWN_POLL_MS);
    }
    let mut timeout_ms = POLL_CEILING_MS;
    if let Some(expire_at) = keyspace.next_expiry_ms() {
        timeout_ms = timeout_ms.min(expire_at.saturating_sub(now_ms));
    }
    if let Some(idle_ms) = idle.next_deadline_ms(now_ms, options.idle_timeout_ms) {
        timeout_ms = timeout_ms.min(idle_ms);
    }
    Duration::from_millis(timeout_ms)
}

fn accept_all(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut Slab<Connection>,
    idle: &mut IdleList,
    options: &Options,
) {
    loop {
        let now_ms = fleetcache_util::monotonic_now_ms();
        match listener.accept() {
            Ok((mut stream, addr)) => {
                if connections.len() >= options.max_connections {
                    debug!(%addr, limit = options.max_connections, "refusing connection: at max_connections");
                    continue;
                }
                let entry = connections.vacant_entry();
                let token = Token(FIRST_CONN_TOKEN + entry.key());
                if let Err(e) = registry.register(&mut stream, token, Interest::READABLE) {
                    warn!(%addr, error = %e, "failed to register new connection");
                    continue;
                }
                let idle_node = idle.insert(token, now_ms);
                let mut conn = Connection::new(stream, token, now_ms);
                conn.idle_node = Some(idle_node);
                entry.insert(conn);
                debug!(%addr, "accepted connection");
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

fn service_connection(
    token: Token,
    event: &mio::event::Event,
    connections: &mut Slab<Connection>,
    idle: &mut IdleList,
    keyspace: &mut Keyspace,
    registry: &Registry,
    now_ms: u64,
    options: &Options,
) {
    let key = token.0 - FIRST_CONN_TOKEN;
    if !connections.contains(key) {
        return;
    }

    let mut fatal = false;
    {
        let conn = &mut connections[key];
        if event.is_readable() && conn.state() == ConnState::Active {
            match conn.handle_readable(keyspace, now_ms, options.write_watermark_bytes) {
                Ok(()) => {
                    if let Some(node) = conn.idle_node {
                        idle.touch(node, now_ms);
                    }
                }
                Err(e) => {
                    debug!(token = token.0, error = %e, "closing connection after read error");
                    fatal = true;
                }
            }
        }
        if !fatal && event.is_writable() {
            if let Err(e) = conn.handle_writable() {
                debug!(token = token.0, error = %e, "closing connection after write error");
                fatal = true;
            }
        }
    }

    let conn = &mut connections[key];
    if fatal {
        conn.begin_close();
    }
    if conn.is_closed() {
        if let Some(node) = conn.idle_node {
            idle.remove(node);
        }
        let mut conn = connections.remove(key);
        let _ = registry.deregister(conn.stream());
        return;
    }

    let interest = if conn.wants_write() {
        Interest::READABLE | Interest::WRITABLE
    } else {
        Interest::READABLE
    };
    let _ = registry.reregister(conn.stream(), token, interest);
}

fn evict_idle(
    connections: &mut Slab<Connection>,
    idle: &mut IdleList,
    registry: &Registry,
    options: &Options,
    now_ms: u64,
) {
    for token in idle.pop_expired(now_ms, options.idle_timeout_ms) {
        let key = token.0 - FIRST_CONN_TOKEN;
        if connections.contains(key) {
            info!(token = token.0, "evicting idle connection");
            let mut conn = connections.remove(key);
            let _ = registry.deregister(conn.stream());
        }
    }
}

/// Closes every connection with nothing left to write, as soon as a
/// shutdown signal arrives, rather than waiting for it to go idle on its
/// own. Connections with a response still draining are left alone; the
/// shutdown-grace deadline in [`serve`] bounds how long that can take.
fn close_idle_now(connections: &mut Slab<Connection>, idle: &mut IdleList, registry: &Registry) {
    let to_close: Vec<usize> = connections
        .iter()
        .filter(|(_, conn)| !conn.wants_write())
        .map(|(key, _)| key)
        .collect();
    for key in to_close {
        if let Some(node) = connections[key].idle_node {
            idle.remove(node);
        }
        let mut conn = connections.remove(key);
        let _ = registry.deregister(conn.stream());
    }
}
