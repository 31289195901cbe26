use cinder_protocol::XorKey;
use cinder_session::RegistryConfig;
use cinder_transport::MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};

/// Settings for one client-facing server role.
///
/// Loading is left to the embedding binary; every field has a default so
/// a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default: `127.0.0.1:38101`.
    pub bind_addr: String,

    pub registry: RegistryConfig,

    /// Payload key new sessions start with. Empty disables obfuscation.
    pub xor_key: Vec<u8>,

    /// Largest inbound frame accepted, header included. Capped at 65535
    /// by the 16-bit length field.
    pub max_frame_len: usize,
}

impl ServerConfig {
    pub fn xor_key(&self) -> XorKey {
        XorKey::new(self.xor_key.clone())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:38101".to_string(),
            registry: RegistryConfig::default(),
            xor_key: Vec::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}
