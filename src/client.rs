//! Minimal chat client: frames lines for the relay and verifies what comes back.

use crate::protocol::{encode_frame, FrameReader, ProtocolError};
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// A connection to a relay that sends lines under a fixed name.
pub struct ChatClient {
    stream: TcpStream,
    name: String,
    frame: Vec<u8>,
}

impl ChatClient {
    /// Connect to `addr` and send as `name`.
    ///
    /// Fails with [`ProtocolError::NameTooLong`] before connecting if `name` leaves no room for
    /// text.
    pub fn connect(addr: impl ToSocketAddrs, name: impl Into<String>) -> Result<Self, ProtocolError> {
        let name = name.into();
        crate::protocol::max_text_len(&name)?;
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            name,
            frame: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send one line, truncated to fit a frame. Returns the number of text bytes sent.
    pub fn send_line(&mut self, text: &str) -> Result<usize, ProtocolError> {
        self.frame.clear();
        let sent = encode_frame(&self.name, text.as_bytes(), &mut self.frame)?;
        self.stream.write_all(&self.frame)?;
        Ok(sent)
    }

    /// Reader over a second handle to the same socket, for use on another thread.
    pub fn reader(&self) -> io::Result<FrameReader<TcpStream>> {
        Ok(FrameReader::new(self.stream.try_clone()?))
    }

    /// Close the sending half; the relay will see end of stream.
    pub fn finish(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Write)
    }
}
