use serde::{Deserialize, Serialize};

/// Retry policy for transient connection failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed delay between retries in seconds (valid range: 1-3600).
    pub retry_delay: u64,
    /// Maximum automatic retries before giving up (valid range: 0-100).
    /// Manual reconnect remains possible after exhaustion.
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            retry_delay: 5,
            max_retries: 10,
        }
    }
}
