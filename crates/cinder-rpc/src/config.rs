use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for both ends of an RPC link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long a caller waits for a response before giving up.
    ///
    /// Default: 5 seconds.
    pub call_timeout: Duration,

    /// Pause between reconnect attempts after the link drops.
    ///
    /// Default: 3 seconds.
    pub reconnect_interval: Duration,

    /// Whether the client re-establishes a dropped link on its own.
    ///
    /// Default: `true`.
    pub reconnect: bool,

    /// Largest frame body accepted or sent, in bytes.
    ///
    /// Default: 16 MiB.
    pub max_frame_len: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(3),
            reconnect: true,
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = RpcConfig::default();
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_interval, Duration::from_secs(3));
        assert!(config.reconnect);
        assert_eq!(config.max_frame_len, 16 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_partial_fills_defaults() {
        let config: RpcConfig = serde_json::from_str(r#"{"reconnect": false}"#).unwrap();
        assert!(!config.reconnect);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
    }
}
