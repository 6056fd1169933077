//! Wire framing of the line-chat protocol.
//!
//! ```text
//! byte[0]       : L, number of bytes after this one (0-255)
//! bytes[1..5)   : Adler-32 of the payload, big-endian
//! bytes[5..1+L) : payload "<name>:<text>", L - 4 bytes
//! ```
//!
//! The relay only reads `[L]` and the following `L` bytes and forwards them untouched
//! ([`read_frame_into`]). Producers build frames with [`encode_frame`] and receivers verify the
//! checksum with [`decode_frame`] or [`FrameReader`].

use crate::connection::Connection;
use crate::line::{LineBuffer, FRAME_CAPACITY};
use std::io::{self, Read};

/// Checksum width in bytes.
pub const CHECKSUM_LEN: usize = 4;

/// Largest value of the length byte.
pub const MAX_FRAME_BODY: usize = FRAME_CAPACITY - 1;

const SEPARATOR: u8 = b':';

/// Framing failures seen by the relay or by a receiving client.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The length byte is too small to hold the checksum.
    #[error("frame length {0} cannot hold the 4-byte checksum")]
    FrameTooShort(usize),

    /// A complete frame was expected but fewer bytes were supplied.
    #[error("frame declares {declared} bytes but {available} are present")]
    Truncated { declared: usize, available: usize },

    /// The producer's name leaves no room in a frame for any text.
    #[error("name of {0} bytes does not fit in a frame")]
    NameTooLong(usize),

    /// The payload does not match its checksum; the frame is corrupted.
    #[error("checksum mismatch: frame carries {received:08X}, payload hashes to {computed:08X}")]
    ChecksumMismatch { received: u32, computed: u32 },
}

/// Adler-32 over `bytes`.
pub fn adler32(bytes: &[u8]) -> u32 {
    adler::adler32_slice(bytes)
}

/// Adler-32 over `name + ":" + text` without building the payload.
fn payload_checksum(name: &[u8], text: &[u8]) -> u32 {
    let mut hasher = adler::Adler32::new();
    hasher.write_slice(name);
    hasher.write_slice(&[SEPARATOR]);
    hasher.write_slice(text);
    hasher.checksum()
}

/// Longest text a producer called `name` can send in one frame.
pub fn max_text_len(name: &str) -> Result<usize, ProtocolError> {
    MAX_FRAME_BODY
        .checked_sub(CHECKSUM_LEN + 1 + name.len())
        .ok_or(ProtocolError::NameTooLong(name.len()))
}

/// Append one frame carrying `name:text` to `out`, truncating `text` to fit.
///
/// Returns how many bytes of `text` were sent.
pub fn encode_frame(name: &str, text: &[u8], out: &mut Vec<u8>) -> Result<usize, ProtocolError> {
    let text = &text[..text.len().min(max_text_len(name)?)];
    let body = CHECKSUM_LEN + name.len() + 1 + text.len();

    out.reserve(1 + body);
    out.push(body as u8);
    out.extend_from_slice(&payload_checksum(name.as_bytes(), text).to_be_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(text);
    Ok(text.len())
}

/// Block until the next frame's length byte arrives and return it.
pub fn read_frame_header<C>(conn: &C) -> Result<u8, ProtocolError>
where
    C: Connection + ?Sized,
{
    let mut header = [0u8; 1];
    conn.read_exact(&mut header)?;
    if usize::from(header[0]) < CHECKSUM_LEN {
        return Err(ProtocolError::FrameTooShort(usize::from(header[0])));
    }
    Ok(header[0])
}

/// Read the `header` bytes following a length byte into `line`, keeping the length byte in front.
///
/// On failure the contents of `line` are unspecified.
pub fn read_frame_body<C>(conn: &C, header: u8, line: &mut LineBuffer) -> Result<(), ProtocolError>
where
    C: Connection + ?Sized,
{
    let frame = line.fill(1 + usize::from(header));
    frame[0] = header;
    conn.read_exact(&mut frame[1..])?;
    Ok(())
}

/// Read one frame from `conn` into `line` without looking at its checksum.
pub fn read_frame_into<C>(conn: &C, line: &mut LineBuffer) -> Result<(), ProtocolError>
where
    C: Connection + ?Sized,
{
    let header = read_frame_header(conn)?;
    read_frame_body(conn, header, line)
}

/// A frame whose checksum has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub checksum: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Split the payload at the first `:` into sender name and text.
    pub fn split(&self) -> Option<(&[u8], &[u8])> {
        let at = self.payload.iter().position(|&b| b == SEPARATOR)?;
        Some((&self.payload[..at], &self.payload[at + 1..]))
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

fn verify(checksum: u32, payload: Vec<u8>) -> Result<Frame, ProtocolError> {
    let computed = adler32(&payload);
    if computed != checksum {
        return Err(ProtocolError::ChecksumMismatch {
            received: checksum,
            computed,
        });
    }
    Ok(Frame { checksum, payload })
}

/// Decode and verify one complete frame held in `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ProtocolError> {
    let (&header, rest) = bytes.split_first().ok_or(ProtocolError::Truncated {
        declared: 0,
        available: 0,
    })?;
    let body = usize::from(header);
    if body < CHECKSUM_LEN {
        return Err(ProtocolError::FrameTooShort(body));
    }
    if rest.len() < body {
        return Err(ProtocolError::Truncated {
            declared: body,
            available: rest.len(),
        });
    }

    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&rest[..CHECKSUM_LEN]);
    verify(
        u32::from_be_bytes(checksum),
        rest[CHECKSUM_LEN..body].to_vec(),
    )
}

/// Reads and verifies consecutive frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Block until the next frame arrives and verify it.
    pub fn next_frame(&mut self) -> Result<Frame, ProtocolError> {
        let mut header = [0u8; 1 + CHECKSUM_LEN];
        self.inner.read_exact(&mut header[..1])?;
        let body = usize::from(header[0]);
        if body < CHECKSUM_LEN {
            return Err(ProtocolError::FrameTooShort(body));
        }
        self.inner.read_exact(&mut header[1..])?;

        let mut payload = vec![0u8; body - CHECKSUM_LEN];
        self.inner.read_exact(&mut payload)?;

        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(&header[1..]);
        verify(u32::from_be_bytes(checksum), payload)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame, ProtocolError>;

    /// Yields frames until the stream ends cleanly between frames.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Err(ProtocolError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::MemoryConnection;
    use std::io::Cursor;

    fn frame(name: &str, text: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_frame(name, text, &mut out).unwrap();
        out
    }

    #[test]
    fn alice_says_hi() {
        let bytes = frame("alice", b"hi");
        assert_eq!(bytes[0], 12);
        assert_eq!(&bytes[1..5], &adler32(b"alice:hi").to_be_bytes());
        assert_eq!(&bytes[5..], b"alice:hi");

        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.payload, b"alice:hi");
        assert_eq!(decoded.split(), Some((&b"alice"[..], &b"hi"[..])));
    }

    #[test]
    fn adler32_matches_reference_value() {
        // Adler-32 of "Wikipedia" is the textbook example.
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn long_text_is_truncated_to_fit() {
        assert_eq!(max_text_len("bob").unwrap(), 247);

        let mut out = Vec::new();
        let sent = encode_frame("bob", &[b'x'; 253], &mut out).unwrap();
        assert_eq!(sent, 247);
        assert_eq!(out[0], 255);
        assert_eq!(out.len(), 256);
        assert!(decode_frame(&out).is_ok());
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = "n".repeat(251);
        assert!(matches!(
            encode_frame(&name, b"", &mut Vec::new()),
            Err(ProtocolError::NameTooLong(251))
        ));
        assert_eq!(max_text_len(&"n".repeat(250)).unwrap(), 0);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut bytes = frame("carol", b"secret");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x20;
        assert!(matches!(
            decode_frame(&bytes),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn short_and_truncated_frames_are_rejected() {
        assert!(matches!(
            decode_frame(&[3, 0, 0, 0]),
            Err(ProtocolError::FrameTooShort(3))
        ));
        let bytes = frame("dave", b"hello");
        assert!(matches!(
            decode_frame(&bytes[..bytes.len() - 2]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn relay_reads_frame_verbatim() {
        let mut wire = frame("alice", b"hi");
        wire.extend(frame("bob", b"yo"));
        let conn = MemoryConnection::new(wire.clone());

        let mut line = LineBuffer::default();
        read_frame_into(&conn, &mut line).unwrap();
        assert_eq!(line.as_bytes(), &wire[..13]);
        read_frame_into(&conn, &mut line).unwrap();
        assert_eq!(line.as_bytes(), &wire[13..]);
        assert!(matches!(
            read_frame_into(&conn, &mut line),
            Err(ProtocolError::Io(_))
        ));
    }

    #[test]
    fn relay_does_not_check_checksums() {
        let mut wire = frame("eve", b"tampered");
        wire[2] ^= 0xFF;
        let conn = MemoryConnection::new(wire.clone());
        let mut line = LineBuffer::default();
        read_frame_into(&conn, &mut line).unwrap();
        assert_eq!(line.as_bytes(), &wire[..]);
    }

    #[test]
    fn relay_rejects_frame_without_room_for_checksum() {
        let conn = MemoryConnection::new(vec![2, b'a', b'b']);
        let mut line = LineBuffer::default();
        assert!(matches!(
            read_frame_into(&conn, &mut line),
            Err(ProtocolError::FrameTooShort(2))
        ));
    }

    #[test]
    fn frame_reader_iterates_until_clean_eof() {
        let mut wire = frame("alice", b"one");
        wire.extend(frame("alice", b"two"));
        let texts: Vec<String> = FrameReader::new(Cursor::new(wire))
            .map(|frame| frame.unwrap().text())
            .collect();
        assert_eq!(texts, vec!["alice:one", "alice:two"]);
    }
}
