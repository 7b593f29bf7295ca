//! Framed packet transport
//!
//! Each packet travels on the stream as a 4-byte big-endian length prefix
//! followed by the packet content (type byte plus payload):
//!
//! ```text
//! +------------+---------+-----------+
//! | uint32 BE  | uint8   | payload   |
//! |  length    |  type   |  bytes    |
//! +------------+---------+-----------+
//!         length = 1 + payload size
//! ```
//!
//! The length excludes its own four bytes. Frames above [`MAX_PACKET_LEN`]
//! are a fatal protocol error. A [`Transport`] exclusively owns its stream;
//! the session isolates command and event traffic by opening two transports
//! to the same daemon socket.

use std::path::Path;

use bytes::BufMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::packet::Packet;

/// Maximum packet length in bytes (type byte plus payload)
pub const MAX_PACKET_LEN: usize = 512 * 1024;

const LENGTH_PREFIX_LEN: usize = 4;

/// Framed packet stream over a connected socket
///
/// Generic over the underlying stream so the command transport can own a
/// whole socket while the event listener splits one into read and write
/// halves, and tests can run against in-memory pipes.
#[derive(Debug)]
pub struct Transport<S> {
    stream: S,
}

impl<S> Transport<S> {
    /// Wrap a connected stream
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Consume the transport, returning the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl Transport<UnixStream> {
    /// Connect to the daemon's Unix socket
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the socket cannot be connected.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await?;
        debug!(path = %path.display(), "connected to vici socket");
        Ok(Self::new(stream))
    }

    /// Split into independently owned read and write transports
    pub fn into_split(self) -> (Transport<OwnedReadHalf>, Transport<OwnedWriteHalf>) {
        let (read, write) = self.stream.into_split();
        (Transport::new(read), Transport::new(write))
    }
}

impl<S: AsyncWrite + Unpin> Transport<S> {
    /// Send one packet, writing the complete frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the packet cannot be serialized or
    /// exceeds [`MAX_PACKET_LEN`], and [`Error::Transport`] on socket
    /// failure. A partial write leaves the stream unusable; transport
    /// errors invalidate the session.
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        let content = packet.encode()?;
        if content.len() > MAX_PACKET_LEN {
            return Err(Error::encode(format!(
                "packet of {} bytes exceeds maximum of {MAX_PACKET_LEN}",
                content.len()
            )));
        }

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + content.len());
        frame.put_u32(content.len() as u32);
        frame.put_slice(&content);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        trace!(packet_type = %packet.packet_type, len = content.len(), "sent packet");
        Ok(())
    }

    /// Shut down the write side of the stream
    ///
    /// Signals end-of-stream to the peer; no further packets can be sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl<S: AsyncRead + Unpin> Transport<S> {
    /// Receive one packet, reading the complete frame
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a zero-length or oversized frame or a
    /// malformed packet, and [`Error::Transport`] on socket failure,
    /// including end-of-stream mid-frame.
    pub async fn receive(&mut self) -> Result<Packet> {
        let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
        self.stream.read_exact(&mut len_buf).await?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(Error::protocol("zero-length packet"));
        }
        if len > MAX_PACKET_LEN {
            return Err(Error::protocol(format!(
                "peer announced packet of {len} bytes, maximum is {MAX_PACKET_LEN}"
            )));
        }

        let mut content = vec![0u8; len];
        self.stream.read_exact(&mut content).await?;

        let packet = Packet::decode(&content)?;
        trace!(packet_type = %packet.packet_type, len, "received packet");
        Ok(packet)
    }
}
