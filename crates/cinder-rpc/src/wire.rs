//! Framing for the RPC link.
//!
//! ```text
//! ┌──────────────┬───────────────────────────────┐
//! │ len: u32 LE  │ JSON-encoded RpcFrame (len B) │
//! └──────────────┴───────────────────────────────┘
//! ```
//!
//! Payloads stay as `serde_json::Value` at this layer. Only the two ends
//! of a call know the concrete record types, so conversion happens in
//! the client (`call`) and in the registered handler wrapper.

use cinder_protocol::{Codec, JsonCodec, ProtocolError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::RpcError;

/// One message on the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcFrame {
    Request {
        id: u64,
        call: String,
        payload: Value,
    },
    Response {
        id: u64,
        outcome: Outcome,
    },
}

/// How a request ended on the serving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Unregistered(String),
    Failed(String),
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    Ok(serde_json::to_value(value).map_err(ProtocolError::Encode)?)
}

pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    Ok(serde_json::from_value(value).map_err(ProtocolError::Decode)?)
}

/// Serializes `frame` into a length-prefixed buffer ready to write.
pub(crate) fn encode_frame(frame: &RpcFrame, max_frame_len: usize) -> Result<Vec<u8>, RpcError> {
    let body = JsonCodec.encode(frame)?;
    if body.len() > max_frame_len {
        return Err(RpcError::FrameTooLarge {
            len: body.len(),
            max: max_frame_len,
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| RpcError::FrameTooLarge {
        len: body.len(),
        max: max_frame_len,
    })?;

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Reads the next frame.
///
/// Returns `Ok(None)` when the peer closed the link between frames.
/// Not cancel-safe: callers own a dedicated read task per link.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    max_frame_len: usize,
) -> Result<Option<RpcFrame>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_frame_len {
        return Err(RpcError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(JsonCodec.decode(&body)?))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncWrite, AsyncWriteExt};

    use super::*;

    async fn write_frame<W>(writer: &mut W, frame: &RpcFrame, max_frame_len: usize) -> Result<(), RpcError>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = encode_frame(frame, max_frame_len)?;
        writer.write_all(&buf).await?;
        Ok(())
    }

    fn request(id: u64) -> RpcFrame {
        RpcFrame::Request {
            id,
            call: "server_list".into(),
            payload: json!({}),
        }
    }

    #[tokio::test]
    async fn test_read_frame_returns_frames_in_order() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &request(1), 1024).await.unwrap();
        write_frame(
            &mut a,
            &RpcFrame::Response {
                id: 1,
                outcome: Outcome::Unregistered("nope".into()),
            },
            1024,
        )
        .await
        .unwrap();

        assert_eq!(read_frame(&mut b, 1024).await.unwrap(), Some(request(1)));
        assert!(matches!(
            read_frame(&mut b, 1024).await.unwrap(),
            Some(RpcFrame::Response {
                id: 1,
                outcome: Outcome::Unregistered(_)
            })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof_returns_none() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        assert!(read_frame(&mut b, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_eof_mid_body_returns_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_le_bytes()).await.unwrap();
        a.write_all(b"{\"ki").await.unwrap();
        drop(a);

        assert!(matches!(read_frame(&mut b, 1024).await, Err(RpcError::Io(_))));
    }

    #[tokio::test]
    async fn test_read_frame_oversized_prefix_rejected_before_allocating() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();

        assert!(matches!(
            read_frame(&mut b, 1024).await,
            Err(RpcError::FrameTooLarge { max: 1024, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_garbage_body_returns_codec_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&3u32.to_le_bytes()).await.unwrap();
        a.write_all(b"???").await.unwrap();

        assert!(matches!(read_frame(&mut b, 1024).await, Err(RpcError::Codec(_))));
    }

    #[test]
    fn test_encode_frame_over_limit_fails() {
        let frame = RpcFrame::Request {
            id: 1,
            call: "load_character_data".into(),
            payload: json!({ "blob": "x".repeat(200) }),
        };
        assert!(matches!(
            encode_frame(&frame, 64),
            Err(RpcError::FrameTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_frame_json_shape_is_tagged() {
        let bytes = encode_frame(
            &RpcFrame::Response {
                id: 7,
                outcome: Outcome::Failed("db down".into()),
            },
            1024,
        )
        .unwrap();
        let text = std::str::from_utf8(&bytes[4..]).unwrap();
        let value: Value = serde_json::from_str(text).unwrap();

        assert_eq!(value["kind"], "response");
        assert_eq!(value["outcome"]["status"], "failed");
        assert_eq!(value["outcome"]["body"], "db down");
    }
}
