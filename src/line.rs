//! Fixed-capacity frame storage circulating through the relay's pool.
//!
//! A [`LineBuffer`] holds one complete wire frame: the length byte, the checksum and the payload.
//! The relay fills it once on the inbound side and from then on only reads it, so every
//! recipient can write the same bytes to its socket without copying.

use crate::buffer_pool::{Lease, Recycle, RefCountedPool, Shared};
use std::fmt;

/// Largest frame the wire format can describe: one length byte plus up to 255 bytes.
pub const FRAME_CAPACITY: usize = 256;

/// Pool of line buffers shared by every connection of a relay.
pub type BufferPool = RefCountedPool<LineBuffer>;

/// A filled line buffer handed to the distributor and fanned out to endpoints.
pub type Message = Shared<LineBuffer>;

/// Writable line buffer owned by an inbound direction while it reads a frame.
pub type LineLease = Lease<LineBuffer>;

/// Byte array plus the length of its valid prefix.
pub struct LineBuffer {
    bytes: [u8; FRAME_CAPACITY],
    len: usize,
}

impl LineBuffer {
    /// Valid bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writable view of the first `len` bytes, which become the valid prefix.
    ///
    /// `len` is capped at [`FRAME_CAPACITY`].
    pub fn fill(&mut self, len: usize) -> &mut [u8] {
        self.len = len.min(FRAME_CAPACITY);
        &mut self.bytes[..self.len]
    }

    /// Replace the contents with a copy of `bytes`, truncated to capacity.
    pub fn copy_from(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(FRAME_CAPACITY);
        self.fill(len).copy_from_slice(&bytes[..len]);
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self {
            bytes: [0; FRAME_CAPACITY],
            len: 0,
        }
    }
}

impl Recycle for LineBuffer {
    fn recycle(&mut self) {
        self.len = 0;
    }
}

impl fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuffer")
            .field("len", &self.len)
            .field("bytes", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_sets_valid_prefix() {
        let mut line = LineBuffer::default();
        line.fill(3).copy_from_slice(b"abc");
        assert_eq!(line.as_bytes(), b"abc");
        assert_eq!(line.len(), 3);
    }

    #[test]
    fn copy_truncates_to_capacity() {
        let mut line = LineBuffer::default();
        line.copy_from(&[7u8; 300]);
        assert_eq!(line.len(), FRAME_CAPACITY);
    }

    #[test]
    fn recycled_buffer_is_empty() {
        let pool = BufferPool::new();
        {
            let mut lease = pool.acquire();
            lease.copy_from(b"hello");
            let message: Message = lease.freeze();
            assert_eq!(message.as_bytes(), b"hello");
        }
        let lease = pool.acquire();
        assert!(lease.is_empty());
        assert_eq!(pool.allocated(), 1);
    }
}
