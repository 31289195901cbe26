//! Payload obfuscation.
//!
//! The legacy client scrambles frame payloads with a repeating XOR key.
//! This is compatibility, not security: anyone holding one frame and its
//! plaintext recovers the key. The key is session state (it changes on
//! handshake), so it is passed into the codec rather than stored in it.

use std::fmt;
use std::sync::Arc;

/// A repeating XOR key. The empty key leaves bytes unchanged.
///
/// Cloning is cheap: the key bytes are shared.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct XorKey(Arc<[u8]>);

impl XorKey {
    /// Creates a key from raw key material.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(key.into()))
    }

    /// The identity key: no obfuscation.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if this key leaves payloads untouched.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the key material in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// XORs `buf` in place; byte `i` is combined with `key[i % len]`.
    ///
    /// Applying the same key twice restores the original bytes.
    pub fn apply(&self, buf: &mut [u8]) {
        if self.0.is_empty() {
            return;
        }
        for (byte, k) in buf.iter_mut().zip(self.0.iter().cycle()) {
            *byte ^= k;
        }
    }
}

impl fmt::Debug for XorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key bytes stay out of logs.
        f.debug_struct("XorKey").field("len", &self.0.len()).finish()
    }
}
