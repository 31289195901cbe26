//! Codec trait and implementations for structured records.
//!
//! Client frames are hand-laid byte by byte (see [`crate::PacketWriter`]),
//! but records exchanged between server roles over RPC are plain data with
//! no fixed legacy layout. Those go through a [`Codec`]: the RPC layer only
//! needs *something* that turns a `Serialize` type into bytes and back.
//!
//! [`JsonCodec`] is the default. It is larger than a binary format but a
//! captured RPC frame can be read with any text tool, which matters more
//! for an inter-role link than a few bytes on loopback.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every task that talks on an RPC link.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// `DeserializeOwned` means the result owns all its data, so the input
    /// buffer can be dropped right after decoding.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or don't
    /// match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// This is behind the `json` feature flag (enabled by default).
///
/// ```rust
/// use cinder_protocol::{Codec, JsonCodec, UserIndex};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&UserIndex(7)).unwrap();
/// assert_eq!(bytes, b"7");
/// let back: UserIndex = codec.decode(&bytes).unwrap();
/// assert_eq!(back, UserIndex(7));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        account: i32,
        name: String,
    }

    #[test]
    fn test_json_codec_decode_wrong_shape_returns_decode_error() {
        let codec = JsonCodec;
        let bytes = codec.encode(&vec![1, 2, 3]).unwrap();

        let result: Result<Record, _> = codec.decode(&bytes);

        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_decode_truncated_returns_decode_error() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&Record {
                account: 9,
                name: "ash".into(),
            })
            .unwrap();

        let result: Result<Record, _> = codec.decode(&bytes[..bytes.len() - 2]);

        assert!(result.is_err());
    }
}
