//! SIGINT/SIGTERM handling via a self-pipe.
//!
//! A signal handler may only call a small set of async-signal-safe
//! functions, so it cannot touch the keyspace or even take a lock. The
//! standard trick is a self-pipe: the handler writes one byte to a
//! non-blocking socket, and the reactor polls the read half like any other
//! source. This keeps shutdown detection on the same single thread as every
//! other I/O event instead of spinning up a dedicated signal-handling
//! thread, which would violate the single-threaded design (see §5 of the
//! design doc).

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::atomic::{AtomicI32, Ordering};

use mio::net::UnixStream;
use mio::{Interest, Registry, Token};

static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_signal(_: libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte: u8 = 1;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// The read half of the self-pipe that SIGINT/SIGTERM write a byte to.
///
/// Registered with the reactor like any other pollable source; a readable
/// event on its token means a shutdown was requested.
pub struct SignalPipe {
    read: UnixStream,
}

impl SignalPipe {
    /// Installs SIGINT and SIGTERM handlers and returns the read half of
    /// the self-pipe. Only one `SignalPipe` should exist per process: a
    /// second call would overwrite the first's write-side file descriptor.
    pub fn install() -> io::Result<Self> {
        let (read, write) = StdUnixStream::pair()?;
        read.set_nonblocking(true)?;
        write.set_nonblocking(true)?;

        SIGNAL_WRITE_FD.store(write.as_raw_fd(), Ordering::Relaxed);
        // The write half must outlive every possible signal delivery, which
        // means the rest of the process's life; leaking it is deliberate.
        std::mem::forget(write);

        unsafe {
            libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
        }

        Ok(Self {
            read: UnixStream::from_std(read),
        })
    }

    /// Registers the pipe's read half with the reactor under `token`.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.read, token, Interest::READABLE)
    }

    /// Drains every byte currently buffered in the pipe. Returns `true` if
    /// at least one signal was observed since the last call.
    pub fn drain(&mut self) -> bool {
        let mut buf = [0u8; 64];
        let mut received = false;
        loop {
            match self.read.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => received = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        received
    }
}
