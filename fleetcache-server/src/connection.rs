//! Per-connection state: the read/write buffers and the small state
//! machine that ties socket readiness to request parsing and response
//! flushing.
//!
//! A connection can have several complete requests buffered at once
//! (pipelining) — `drain_requests` processes every fully-buffered frame in
//! one pass rather than one per `readable` event, so a pipelining client
//! doesn't wait for extra poll cycles.

use std::io::{self, ErrorKind, Read, Write};

use fleetcache_core::{CacheError, Keyspace, Reply};
use fleetcache_protocol::{dispatch, encode_response, try_parse_request, FrameError};
use mio::net::TcpStream;
use mio::Token;

use crate::error::ConnError;

/// How far along the read/write lifecycle a connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Normal operation: read requests, write responses.
    Active,
    /// The peer is gone or sent a malformed frame; flush whatever response
    /// bytes are still buffered, then close.
    ClosingAfterFlush,
    /// Torn down; the event loop should drop this connection.
    Closed,
}

/// One client connection.
pub struct Connection {
    stream: TcpStream,
    token: Token,
    rbuf: Vec<u8>,
    wbuf: Vec<u8>,
    wpos: usize,
    state: ConnState,
    peer_read_closed: bool,
    last_active_ms: u64,
    /// Index into the idle list's intrusive linked list, so touching this
    /// connection can relink it in O(1).
    pub idle_node: Option<usize>,
}

impl Connection {
    /// Wraps a freshly-accepted stream.
    pub fn new(stream: TcpStream, token: Token, now_ms: u64) -> Self {
        Self {
            stream,
            token,
            rbuf: Vec::with_capacity(4096),
            wbuf: Vec::new(),
            wpos: 0,
            state: ConnState::Active,
            peer_read_closed: false,
            last_active_ms: now_ms,
            idle_node: None,
        }
    }

    /// This connection's poll token.
    pub fn token(&self) -> Token {
        self.token
    }

    /// The underlying stream, for (de)registering with the poller.
    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Timestamp of the last byte successfully read from this connection.
    pub fn last_active_ms(&self) -> u64 {
        self.last_active_ms
    }

    /// Whether the event loop should keep a write-readiness registration
    /// for this connection.
    pub fn wants_write(&self) -> bool {
        self.wpos < self.wbuf.len()
    }

    /// Whether this connection is fully torn down and can be dropped.
    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Reads whatever is available, parses every complete request frame
    /// currently buffered, and dispatches each one against `keyspace`,
    /// queuing its response. A malformed frame queues a terminal `ERR`
    /// response and marks the connection to close rather than returning
    /// `Err`; this only returns `Err` on a genuine I/O error or a peer that
    /// closed mid-request.
    ///
    /// `write_watermark_bytes` bounds how large `wbuf` may grow from this
    /// one pass before the connection is cut off with a terminal error (see
    /// [`Self::drain_requests`]).
    pub fn handle_readable(
        &mut self,
        keyspace: &mut Keyspace,
        now_ms: u64,
        write_watermark_bytes: usize,
    ) -> Result<(), ConnError> {
        loop {
            let mut chunk = [0u8; 16 * 1024];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.peer_read_closed = true;
                    break;
                }
                Ok(n) => {
                    self.rbuf.extend_from_slice(&chunk[..n]);
                    self.last_active_ms = now_ms;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnError::Io(e)),
            }
        }

        self.drain_requests(keyspace, now_ms, write_watermark_bytes);

        if self.peer_read_closed {
            if self.rbuf.is_empty() {
                self.begin_close();
            } else {
                return Err(ConnError::ClosedMidRequest);
            }
        }
        Ok(())
    }

    /// Drains every complete frame currently buffered in `rbuf`. If the
    /// responses queued in `wbuf` push it past `write_watermark_bytes`, one
    /// final `TOO_BIG` error is appended, any remaining buffered bytes are
    /// abandoned, and the connection is marked to close once the buffer
    /// flushes — a pipelining client that never reads its responses can't
    /// grow `wbuf` without bound.
    ///
    /// A frame the byte stream itself can't be parsed as gets the same
    /// treatment: a single terminal `ERR` frame is queued before the
    /// connection is marked to close, rather than the socket just going
    /// silent.
    fn drain_requests(
        &mut self,
        keyspace: &mut Keyspace,
        now_ms: u64,
        write_watermark_bytes: usize,
    ) {
        loop {
            if self.wbuf.len() > write_watermark_bytes {
                let err = CacheError::too_big(format!(
                    "write buffer exceeded the {write_watermark_bytes} byte watermark"
                ));
                encode_response(&Reply::Err(err), &mut self.wbuf);
                self.begin_close();
                break;
            }
            match try_parse_request(&self.rbuf) {
                Ok(None) => break,
                Ok(Some((consumed, argv))) => {
                    let reply = dispatch(&argv, keyspace, now_ms);
                    encode_response(&reply, &mut self.wbuf);
                    self.rbuf.drain(..consumed);
                }
                Err(e) => {
                    let err = match e {
                        FrameError::Malformed(msg) => CacheError::malformed(msg),
                        FrameError::TooBig { len, max } => CacheError::too_big(format!(
                            "request length {len} exceeds the {max} byte limit"
                        )),
                        FrameError::TooManyArgs { n, max } => CacheError::too_big(format!(
                            "request has {n} arguments, exceeding the {max} limit"
                        )),
                    };
                    encode_response(&Reply::Err(err), &mut self.wbuf);
                    self.begin_close();
                    break;
                }
            }
        }
    }

    /// Writes as much of the pending response buffer as the socket will
    /// currently accept. Returns `Ok(())` regardless of whether it fully
    /// drained — call `wants_write` to check.
    pub fn handle_writable(&mut self) -> Result<(), ConnError> {
        while self.wpos < self.wbuf.len() {
            match self.stream.write(&self.wbuf[self.wpos..]) {
                Ok(0) => return Err(ConnError::Io(io::Error::from(ErrorKind::WriteZero))),
                Ok(n) => self.wpos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnError::Io(e)),
            }
        }
        if self.wpos == self.wbuf.len() {
            self.wbuf.clear();
            self.wpos = 0;
            if self.state == ConnState::ClosingAfterFlush {
                self.state = ConnState::Closed;
            }
        }
        Ok(())
    }

    /// Marks this connection for close once its write buffer has drained.
    /// A connection with nothing left to write closes immediately.
    pub fn begin_close(&mut self) {
        if self.wants_write() {
            self.state = ConnState::ClosingAfterFlush;
        } else {
            self.state = ConnState::Closed;
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.state
    }
}
