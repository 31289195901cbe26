//! Fixed-header client frames and their field readers/writers.
//!
//! ```text
//! offset size field
//! 0      2    magic  (u16 LE, always 0xB7E2)
//! 2      2    length (u16 LE, whole frame including this header)
//! 4      2    opcode (u16 LE)
//! 6      n    payload, XOR-obfuscated with the session key
//! ```
//!
//! The header is sent in the clear so the transport can find frame
//! boundaries without knowing any keys. All payload integers are
//! little-endian.
//!
//! Writers and readers advance a cursor by exactly the width asked for.
//! Nothing here knows where a "field" ends; keeping writer calls on one
//! side in step with reader calls on the other is the handler's job.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use cinder_transport::{FRAME_MAGIC, MAX_FRAME_LEN};

use crate::{Opcode, ProtocolError, XorKey};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 6;

// ---------------------------------------------------------------------------
// PacketWriter
// ---------------------------------------------------------------------------

/// Builds the payload of one outbound frame.
///
/// The payload is kept in the clear so one writer can be encoded for many
/// sessions with different keys (see [`encode`](Self::encode)).
///
/// ```rust
/// use cinder_protocol::{Opcode, PacketWriter, XorKey};
///
/// let mut w = PacketWriter::new(Opcode(0x0101));
/// w.write_u8(1).write_u16(500).write_zeros(2);
/// let frame = w.encode(&XorKey::none()).unwrap();
/// assert_eq!(frame.len(), 6 + 5);
/// ```
#[derive(Debug, Clone)]
pub struct PacketWriter {
    opcode: Opcode,
    payload: BytesMut,
}

impl PacketWriter {
    /// Starts an empty payload for `opcode`.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            payload: BytesMut::new(),
        }
    }

    /// Starts an empty payload with room for `capacity` bytes.
    pub fn with_capacity(opcode: Opcode, capacity: usize) -> Self {
        Self {
            opcode,
            payload: BytesMut::with_capacity(capacity),
        }
    }

    /// The opcode this frame will carry.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Payload bytes written so far, unobfuscated.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of payload bytes written so far.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.payload.put_u8(v);
        self
    }

    pub fn write_i8(&mut self, v: i8) -> &mut Self {
        self.payload.put_i8(v);
        self
    }

    /// Writes `0x01` for `true`, `0x00` for `false`.
    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.payload.put_u8(u8::from(v));
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.payload.put_u16_le(v);
        self
    }

    pub fn write_i16(&mut self, v: i16) -> &mut Self {
        self.payload.put_i16_le(v);
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.payload.put_u32_le(v);
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.payload.put_i32_le(v);
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.payload.put_u64_le(v);
        self
    }

    pub fn write_i64(&mut self, v: i64) -> &mut Self {
        self.payload.put_i64_le(v);
        self
    }

    /// Appends a raw block as-is.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.payload.put_slice(bytes);
        self
    }

    /// Appends `n` zero bytes (padding and reserved fields).
    pub fn write_zeros(&mut self, n: usize) -> &mut Self {
        self.payload.put_bytes(0, n);
        self
    }

    /// Appends a string's bytes with no length and no terminator.
    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.payload.put_slice(s.as_bytes());
        self
    }

    /// Appends a string preceded by its byte length as a `u8`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::StringTooLong`] above 255 bytes.
    pub fn write_str_u8(&mut self, s: &str) -> Result<&mut Self, ProtocolError> {
        let len = u8::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong {
            len: s.len(),
            width: 1,
        })?;
        self.payload.put_u8(len);
        Ok(self.write_str(s))
    }

    /// Appends a string preceded by its byte length as a `u16`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::StringTooLong`] above 65535 bytes.
    pub fn write_str_u16(&mut self, s: &str) -> Result<&mut Self, ProtocolError> {
        let len = u16::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong {
            len: s.len(),
            width: 2,
        })?;
        self.payload.put_u16_le(len);
        Ok(self.write_str(s))
    }

    /// Appends a string preceded by its byte length as a `u32`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::StringTooLong`] if the length overflows `u32`.
    pub fn write_str_u32(&mut self, s: &str) -> Result<&mut Self, ProtocolError> {
        let len = u32::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong {
            len: s.len(),
            width: 4,
        })?;
        self.payload.put_u32_le(len);
        Ok(self.write_str(s))
    }

    /// Produces the complete frame: header plus payload obfuscated with `key`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::FrameTooLarge`] if header + payload exceed
    /// what the 16-bit length field can express.
    pub fn encode(&self, key: &XorKey) -> Result<Bytes, ProtocolError> {
        let total = HEADER_LEN + self.payload.len();
        if total > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(total));
        }

        let mut frame = BytesMut::with_capacity(total);
        frame.put_u16_le(FRAME_MAGIC);
        // Checked above.
        frame.put_u16_le(total as u16);
        frame.put_u16_le(self.opcode.0);
        frame.put_slice(&self.payload);
        key.apply(&mut frame[HEADER_LEN..]);
        Ok(frame.freeze())
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One decoded inbound frame: an opcode and its plaintext payload.
///
/// Lives for a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: Opcode,
    payload: Bytes,
}

impl Packet {
    /// Validates a complete frame and removes payload obfuscation.
    ///
    /// # Errors
    /// - [`ProtocolError::ShortFrame`] — fewer bytes than the header
    /// - [`ProtocolError::BadMagic`] — wrong leading magic
    /// - [`ProtocolError::LengthMismatch`] — length field ≠ frame size
    pub fn decode(frame: Bytes, key: &XorKey) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::ShortFrame(frame.len()));
        }

        let mut header = &frame[..HEADER_LEN];
        let magic = header.get_u16_le();
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic(magic));
        }
        let declared = header.get_u16_le() as usize;
        if declared != frame.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: frame.len(),
            });
        }
        let opcode = Opcode(header.get_u16_le());

        let payload = if key.is_empty() {
            frame.slice(HEADER_LEN..)
        } else {
            let mut plain = BytesMut::from(&frame[HEADER_LEN..]);
            key.apply(&mut plain);
            plain.freeze()
        };

        Ok(Self { opcode, payload })
    }

    /// Builds a packet directly from an opcode and plaintext payload.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a reader positioned at the start of the payload.
    pub fn reader(&self) -> PacketReader {
        PacketReader {
            buf: self.payload.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// PacketReader
// ---------------------------------------------------------------------------

/// Sequential, forward-only reader over a packet payload.
///
/// Every read checks the remaining length first and fails with
/// [`ProtocolError::Truncated`] instead of panicking, so a short or
/// forged payload can only ever cost the packet, not the session.
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
}

impl PacketReader {
    /// Wraps a plaintext payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            buf: payload.into(),
        }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Returns `true` when every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    /// Reads one byte; any non-zero value is `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64_le())
    }

    /// Reads a raw block of exactly `n` bytes without copying.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, ProtocolError> {
        self.ensure(n)?;
        Ok(self.buf.split_to(n))
    }

    /// Skips `n` bytes of padding or fields the server ignores.
    pub fn skip(&mut self, n: usize) -> Result<(), ProtocolError> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }

    /// Reads a fixed-width string of `n` bytes.
    ///
    /// Clients pad fixed fields with NULs; everything from the first NUL
    /// on is dropped.
    pub fn read_string(&mut self, n: usize) -> Result<String, ProtocolError> {
        let raw = self.read_bytes(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8(raw[..end].to_vec()).map_err(|_| ProtocolError::InvalidString)
    }

    /// Reads a string preceded by a `u8` byte length.
    pub fn read_str_u8(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u8()? as usize;
        self.read_string(len)
    }

    /// Reads a string preceded by a `u16` byte length.
    pub fn read_str_u16(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u16()? as usize;
        self.read_string(len)
    }

    /// Reads a string preceded by a `u32` byte length.
    pub fn read_str_u32(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u32()? as usize;
        self.read_string(len)
    }
}

// =========================================================================
// Tests
// =========================================================================
