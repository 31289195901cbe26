//! Unified error types for the Cinder framework.

use cinder_protocol::{Opcode, ProtocolError, UserIndex};
use cinder_rpc::RpcError;
use cinder_session::{RegistryError, SessionError};
use cinder_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `cinder` meta-crate, you deal with this single error
/// type instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so `?`
/// converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum CinderError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (bad frame, truncated payload, codec).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (closed, not verified, extension).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The registry refused a connection.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An inter-role call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The opcode table was assembled wrongly.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors raised while building a [`DispatchTable`](crate::DispatchTable).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Two handlers claimed the same opcode.
    #[error("opcode {opcode} already bound to `{existing}`, cannot bind `{name}`")]
    Duplicate {
        opcode: Opcode,
        existing: &'static str,
        name: &'static str,
    },
}

/// Why a packet handler gave up on a packet.
///
/// The dispatcher logs these and keeps the session open. A handler that
/// wants the client gone closes the session itself.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The session is not allowed to send this packet (yet).
    #[error("session {index} is not authorized: {reason}")]
    Unauthorized { index: UserIndex, reason: String },

    /// The payload didn't parse.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Replying or reading session state failed.
    #[error(transparent)]
    Session(SessionError),

    /// A call to another server role failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The request made sense but was refused by game rules.
    #[error("{0}")]
    Rejected(String),
}

impl HandlerError {
    pub fn unauthorized(index: UserIndex, reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            index,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

impl From<SessionError> for HandlerError {
    /// Verification failures surface as [`HandlerError::Unauthorized`] so
    /// the dispatcher can log them with the sender's identity.
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotVerified(index) => Self::Unauthorized {
                index,
                reason: "session not verified".into(),
            },
            other => Self::Session(other),
        }
    }
}
