//! Error types for the RPC link.
//!
//! An `RpcError` is always scoped to one call (or one link setup). It is
//! handed back to whoever made the call; nothing in this crate treats it
//! as fatal to the process.

use std::net::SocketAddr;
use std::time::Duration;

use cinder_protocol::ProtocolError;

/// Errors returned by [`RpcClient`](crate::RpcClient) and
/// [`RpcServer`](crate::RpcServer).
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The link is down; the call was never sent.
    #[error("rpc link is not connected")]
    NotConnected,

    /// The link dropped while the call was waiting for its response.
    #[error("rpc link lost before `{0}` was answered")]
    ConnectionLost(&'static str),

    /// No response arrived in time.
    #[error("rpc call `{call}` timed out after {after:?}")]
    Timeout { call: &'static str, after: Duration },

    /// The remote side has no handler registered under this name.
    #[error("rpc call `{0}` is not registered on the remote side")]
    Unregistered(String),

    /// The remote handler ran and reported a failure.
    #[error("rpc call `{call}` failed remotely: {message}")]
    Remote { call: &'static str, message: String },

    /// A handler for this call name is already registered.
    #[error("rpc call `{0}` is already registered")]
    DuplicateCall(&'static str),

    /// A frame exceeded the configured size limit.
    #[error("rpc frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// A request or response failed to (de)serialize.
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// The listener could not be bound.
    #[error("failed to bind rpc listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The initial connection to the remote role failed.
    #[error("failed to connect rpc link to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Socket I/O on an established link failed.
    #[error("rpc i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A failure reported by a call handler.
///
/// The message travels back to the caller, who sees it as
/// [`RpcError::Remote`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CallError(pub String);

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_call() {
        let err = RpcError::Timeout {
            call: "verify_session",
            after: Duration::from_secs(5),
        };
        let text = err.to_string();
        assert!(text.contains("verify_session"));
        assert!(text.contains("5s"));
    }

    #[test]
    fn test_from_protocol_error_wraps_as_codec() {
        let err: RpcError = ProtocolError::Truncated {
            needed: 4,
            remaining: 0,
        }
        .into();
        assert!(matches!(err, RpcError::Codec(_)));
    }
}
