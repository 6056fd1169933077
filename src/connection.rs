//! Byte-stream connection used by endpoint directions.
//!
//! Both directions of an endpoint share one connection, so every operation takes `&self`. A TCP
//! stream satisfies this through the `Read`/`Write` impls on `&TcpStream`.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// Blocking byte stream shared by an endpoint's inbound and outbound directions.
pub trait Connection: Send + Sync + 'static {
    /// Fill `buf` completely or fail.
    fn read_exact(&self, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `buf` or fail.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Shut the stream down in both directions. Calling it again is harmless.
    fn close(&self);

    /// Human-readable remote address for logs.
    fn peer(&self) -> String;
}

impl Connection for TcpStream {
    fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut stream = self;
        Read::read_exact(&mut stream, buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut stream = self;
        Write::write_all(&mut stream, buf)
    }

    fn close(&self) {
        // NotConnected after the peer or the other direction already shut down.
        let _ = self.shutdown(Shutdown::Both);
    }

    fn peer(&self) -> String {
        self.peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<disconnected>".to_string())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory connection for exercising endpoint directions without sockets.

    use super::Connection;
    use parking_lot::Mutex;
    use std::io::{self, Cursor, Read};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Serves a fixed input script, records writes, and can fail writes on demand.
    pub(crate) struct MemoryConnection {
        input: Mutex<Cursor<Vec<u8>>>,
        output: Mutex<Vec<u8>>,
        fail_writes: AtomicBool,
        closed: AtomicBool,
        close_calls: AtomicUsize,
    }

    impl MemoryConnection {
        pub(crate) fn new(input: Vec<u8>) -> Self {
            Self {
                input: Mutex::new(Cursor::new(input)),
                output: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                close_calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing_writes() -> Self {
            let conn = Self::new(Vec::new());
            conn.fail_writes.store(true, Ordering::SeqCst);
            conn
        }

        pub(crate) fn written(&self) -> Vec<u8> {
            self.output.lock().clone()
        }

        pub(crate) fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub(crate) fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    impl Connection for MemoryConnection {
        fn read_exact(&self, buf: &mut [u8]) -> io::Result<()> {
            if self.is_closed() {
                return Err(io::ErrorKind::NotConnected.into());
            }
            self.input.lock().read_exact(buf)
        }

        fn write_all(&self, buf: &[u8]) -> io::Result<()> {
            if self.is_closed() || self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.output.lock().extend_from_slice(buf);
            Ok(())
        }

        fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn peer(&self) -> String {
            "memory".to_string()
        }
    }
}
