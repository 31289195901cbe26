//! Framed TCP transport built on `tokio::net`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::{
    Connection, ConnectionId, FRAME_MAGIC, FRAME_PREFIX_LEN, MAX_FRAME_LEN,
    Transport, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Initial read buffer capacity per connection.
const READ_BUFFER_CAPACITY: usize = 4096;

/// A TCP [`Transport`] that listens for incoming client connections.
pub struct TcpTransport {
    listener: TcpListener,
    max_frame_len: usize,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    ///
    /// # Errors
    /// Returns [`TransportError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| {
            TransportError::Bind {
                addr: addr.to_string(),
                source,
            }
        })?;
        tracing::info!(addr, "TCP transport listening");
        Ok(Self {
            listener,
            max_frame_len: MAX_FRAME_LEN,
        })
    }

    /// Caps the length a single inbound frame may announce.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.clamp(FRAME_PREFIX_LEN, MAX_FRAME_LEN);
        self
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "failed to set TCP_NODELAY");
        }

        let conn = TcpConnection::new(stream, addr, self.max_frame_len);
        tracing::debug!(id = %conn.id, %addr, "accepted TCP connection");
        Ok(conn)
    }
}

/// Read side of a connection: the socket half plus whatever bytes have
/// arrived but not yet formed a complete frame.
///
/// Partial data lives here rather than on the stack so that a cancelled
/// `recv` never loses bytes.
struct FrameReader {
    half: OwnedReadHalf,
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameReader {
    /// Splits one complete frame off the front of the buffer, if present.
    fn split_frame(
        &mut self,
        peer: SocketAddr,
    ) -> Result<Option<Bytes>, TransportError> {
        if self.buf.len() < FRAME_PREFIX_LEN {
            return Ok(None);
        }

        let magic = u16::from_le_bytes([self.buf[0], self.buf[1]]);
        if magic != FRAME_MAGIC {
            return Err(TransportError::Desync {
                peer,
                reason: format!("bad magic {magic:#06x}"),
            });
        }

        let len = u16::from_le_bytes([self.buf[2], self.buf[3]]) as usize;
        if len < FRAME_PREFIX_LEN {
            return Err(TransportError::Desync {
                peer,
                reason: format!("frame length {len} shorter than prefix"),
            });
        }
        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if self.buf.len() < len {
            self.buf.reserve(len - self.buf.len());
            return Ok(None);
        }

        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

/// A single framed TCP connection.
///
/// Reads and writes are guarded independently, so a session can be
/// blocked in `recv` while other tasks push frames through `send`.
pub struct TcpConnection {
    id: ConnectionId,
    peer: SocketAddr,
    reader: Mutex<FrameReader>,
    writer: Mutex<OwnedWriteHalf>,
    closed: AtomicBool,
}

impl TcpConnection {
    fn new(stream: TcpStream, peer: SocketAddr, max_frame_len: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            peer,
            reader: Mutex::new(FrameReader {
                half: read_half,
                buf: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
                max_frame_len,
            }),
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens an outbound framed connection, mostly useful for clients
    /// and tests that speak the same frame format.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::ConnectionClosed(e.to_string()))?;
        Ok(Self::new(stream, addr, MAX_FRAME_LEN))
    }

    /// Returns `true` once [`close`](Connection::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed(format!(
                "{} already closed",
                self.id
            )));
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(frame)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Bytes>, Self::Error> {
        let mut reader = self.reader.lock().await;
        loop {
            if let Some(frame) = reader.split_frame(self.peer)? {
                return Ok(Some(frame));
            }

            let FrameReader { half, buf, .. } = &mut *reader;
            let n = half
                .read_buf(buf)
                .await
                .map_err(TransportError::ReceiveFailed)?;

            if n == 0 {
                if reader.buf.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::ConnectionClosed(format!(
                    "peer closed with {} bytes of a partial frame",
                    reader.buf.len()
                )));
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
