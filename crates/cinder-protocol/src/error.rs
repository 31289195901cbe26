//! Error types for the protocol layer.
//!
//! Each crate in Cinder defines its own error enum. A `ProtocolError`
//! always means the bytes themselves were wrong: a malformed frame, a
//! read past the end of a payload, or a record that failed to
//! (de)serialize. None of these are fatal to a session on their own.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a structured record failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserializing a structured record failed.
    ///
    /// Common causes: missing fields, wrong types, or a peer built with
    /// a different record shape for the same call.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A handler tried to read more bytes than the payload holds.
    ///
    /// Usually a reader/writer call-order mismatch between client and
    /// server, i.e. a protocol bug rather than a transient fault.
    #[error("read of {needed} bytes with only {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// The frame is shorter than the fixed header.
    #[error("frame of {0} bytes is shorter than the header")]
    ShortFrame(usize),

    /// The frame does not start with the expected magic value.
    #[error("bad frame magic {0:#06x}")]
    BadMagic(u16),

    /// The header's length field disagrees with the bytes received.
    #[error("header declares {declared} bytes but frame has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// An outbound frame would not fit the 16-bit length field.
    #[error("frame of {0} bytes exceeds the length field")]
    FrameTooLarge(usize),

    /// A string does not fit the requested length prefix.
    #[error("string of {len} bytes does not fit a {width}-byte prefix")]
    StringTooLong { len: usize, width: usize },

    /// A string field is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidString,
}
