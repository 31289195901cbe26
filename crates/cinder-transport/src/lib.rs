//! Transport abstraction layer for Cinder.
//!
//! Provides the [`Transport`] and [`Connection`] traits plus the framed TCP
//! implementation every server role terminates its clients with.
//!
//! The transport only knows enough about the client wire format to cut the
//! byte stream into frames: each frame starts with a 2-byte magic value and
//! a 2-byte total length, both little-endian. Everything after that prefix
//! (opcode, payload, obfuscation) belongs to `cinder-protocol`.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// Magic value that opens every client frame.
pub const FRAME_MAGIC: u16 = 0xB7E2;

/// Bytes the transport inspects to find a frame boundary: magic + length.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Opaque identifier for a connection.
///
/// Unlike a session's user index this is never reused, which makes it
/// useful for correlating log lines across a connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that exchanges whole frames.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Writes one complete frame to the remote peer.
    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next complete frame, header included.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// on a frame boundary.
    async fn recv(&self) -> Result<Option<Bytes>, Self::Error>;

    /// Closes the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote endpoint address.
    fn peer_addr(&self) -> SocketAddr;
}
