//! Client sessions and the connection registry for Cinder.
//!
//! This crate owns the live side of a server role:
//!
//! 1. **Sessions** — one per client socket ([`Session`]): identity,
//!    obfuscation key, verification flags, and an opaque role extension.
//! 2. **Registry** — the process-wide set of live sessions
//!    ([`ConnectionRegistry`]): index allocation and recycling, lookup,
//!    broadcast, and cleanup.
//! 3. **Lifecycle events** — explicit subscriptions to connect/disconnect
//!    ([`RegistryEvent`]), so other subsystems can react without the
//!    registry knowing about them.
//!
//! # How it fits in the stack
//!
//! ```text
//! Dispatch (above)  ← routes decoded packets to handlers for a session
//!     ↕
//! Session Layer (this crate)  ← who is connected, under which index
//!     ↕
//! Protocol + Transport (below)  ← frames, keys, sockets
//! ```

mod error;
mod events;
mod manager;
mod session;

pub use error::{RegistryError, SessionError};
pub use events::{RegistryEvent, SubscriptionId};
pub use manager::{ConnectionRegistry, RegistryConfig};
pub use session::{Session, SessionState};
