//! Error types for the session layer.

use cinder_protocol::{ProtocolError, UserIndex};
use cinder_transport::TransportError;

/// Errors raised by operations on a single session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session is closed; nothing more can be sent on it.
    #[error("session {0} is closed")]
    Closed(UserIndex),

    /// The session has not completed verification and login.
    ///
    /// Privileged handlers return this for traffic that arrives before
    /// the handshake finished, whether out of order or forged.
    #[error("session {0} is not verified")]
    NotVerified(UserIndex),

    /// No role extension has been attached to the session yet.
    #[error("session {0} has no extension attached")]
    ExtensionMissing(UserIndex),

    /// The attached extension is not of the requested type.
    #[error("session {index} extension is not a {expected}")]
    ExtensionMismatch {
        index: UserIndex,
        expected: &'static str,
    },

    /// Encoding the outbound frame failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Writing to the socket failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised by the registry as a whole.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Every index in the identity space is held by a live session.
    ///
    /// The new connection is refused; existing sessions are unaffected.
    #[error("no free user index among {capacity} slots")]
    Exhausted { capacity: u16 },
}
