//! Identity types that travel on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The small integer identifying a live session.
///
/// Clients see this value in several packets, and the field that carries
/// it is 16 bits wide, so the server must recycle indexes rather than
/// hand out ever-growing numbers. `u16::MAX` is reserved as
/// [`UserIndex::INVALID`] and is never assigned.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserIndex(pub u16);

impl UserIndex {
    /// Sentinel meaning "no session". Distinct from every valid index.
    pub const INVALID: UserIndex = UserIndex(u16::MAX);

    /// Returns `true` unless this is [`UserIndex::INVALID`].
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for UserIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "U-{}", self.0)
        } else {
            f.write_str("U-invalid")
        }
    }
}

/// Database identity of an account, as issued by the authenticating role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A-{}", self.0)
    }
}

/// Integer tag identifying what a client frame means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Opcode(pub u16);

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
