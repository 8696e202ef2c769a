use serde::{Deserialize, Serialize};

/// Durable status storage (the collaboration product's REST API).
///
/// Leaving `base_url` empty disables durable persistence entirely; the
/// engine then runs on real-time state alone.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Base URL of the status API, e.g. `https://app.example.com/api`.
    pub base_url: String,
    /// Bearer token sent with status requests.
    pub access_token: String,
    /// Request timeout in seconds (valid range: 1-120).
    pub request_timeout: u64,
    /// Debounce window for durable writes in milliseconds (50-10000).
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            request_timeout: 10,
            debounce_ms: 400,
        }
    }
}

impl std::fmt::Debug for PersistenceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .field("debounce_ms", &self.debounce_ms)
            .finish()
    }
}
