use serde::{Deserialize, Serialize};

/// Connection settings for the pulse message bus.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket URL of the relay.
    pub endpoint: String,
    /// Client API key. Empty when the relay does not enforce one.
    pub api_key: String,
    /// Heartbeat interval in seconds (valid range: 5-300).
    pub heartbeat_interval: u64,
    /// Connection establishment timeout in seconds (valid range: 1-120).
    pub connect_timeout: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9470/ws".into(),
            api_key: String::new(),
            heartbeat_interval: 25,
            connect_timeout: 15,
        }
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
