//! Client opcodes spoken by the demo roles.

use cinder::prelude::{HandlerError, Opcode};

// Login role
pub const HELLO: Opcode = Opcode(0x0065);
pub const LOGIN: Opcode = Opcode(0x0067);
pub const SERVER_LIST: Opcode = Opcode(0x0079);

// Game channel role
pub const HANDOVER: Opcode = Opcode(0x008C);
pub const CHARACTERS: Opcode = Opcode(0x0085);
pub const ENTER_WORLD: Opcode = Opcode(0x008E);
pub const WHO_AM_I: Opcode = Opcode(0x0090);

/// Server → client only.
pub const NOTICE: Opcode = Opcode(0x0078);

/// Status byte leading most replies.
pub mod status {
    pub const OK: u8 = 1;
    pub const REFUSED: u8 = 0;
    pub const ALREADY_ONLINE: u8 = 2;
}

/// Converts a list length into the one-byte count that precedes it.
///
/// # Errors
/// [`HandlerError::Rejected`] if the list has more than 255 entries.
pub fn count_u8(len: usize, what: &str) -> Result<u8, HandlerError> {
    u8::try_from(len).map_err(|_| HandlerError::rejected(format!("{len} {what} do not fit a u8 count")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_u8_at_limit_fits() {
        assert_eq!(count_u8(255, "characters").unwrap(), 255);
    }

    #[test]
    fn test_count_u8_over_limit_is_rejected() {
        let err = count_u8(256, "characters").unwrap_err();
        assert!(matches!(err, HandlerError::Rejected(ref msg) if msg.contains("256 characters")));
    }
}
