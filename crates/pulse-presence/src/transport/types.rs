//! Configuration and command types for the transport task.

use std::time::Duration;

use pulse_common::Envelope;

/// Configuration for connecting to the pulse relay.
#[derive(Clone)]
pub struct TransportConfig {
    /// WebSocket URL, e.g. `ws://127.0.0.1:9470/ws`.
    pub endpoint: String,
    /// Client API key. Empty when the relay does not enforce one.
    pub api_key: String,
    /// User id announced in the hello frame.
    pub user_id: String,
    /// Heartbeat interval while connected.
    pub heartbeat_interval: Duration,
    /// Bound on connection establishment.
    pub connect_timeout: Duration,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9470/ws".into(),
            api_key: String::new(),
            user_id: String::new(),
            heartbeat_interval: Duration::from_secs(25),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl TransportConfig {
    /// Build the dial URL, appending the API key when one is configured.
    pub(crate) fn ws_url(&self) -> String {
        if self.api_key.is_empty() {
            self.endpoint.clone()
        } else if self.endpoint.contains('?') {
            format!("{}&apikey={}", self.endpoint, self.api_key)
        } else {
            // A query on a path-less endpoint ("ws://host:port?k=v")
            // yields an invalid HTTP request line; ensure a path first.
            let has_path = self
                .endpoint
                .split_once("://")
                .map_or(self.endpoint.contains('/'), |(_, rest)| rest.contains('/'));
            let sep = if has_path { "?" } else { "/?" };
            format!("{}{}apikey={}", self.endpoint, sep, self.api_key)
        }
    }
}

/// Commands sent from handles to the socket task.
#[derive(Debug)]
pub(crate) enum TransportCommand {
    Connect,
    Disconnect,
    Send(Envelope),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_without_key_is_plain_endpoint() {
        let config = TransportConfig {
            endpoint: "ws://127.0.0.1:9470/ws".into(),
            ..Default::default()
        };
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9470/ws");
    }

    #[test]
    fn ws_url_appends_api_key() {
        let config = TransportConfig {
            endpoint: "ws://127.0.0.1:9470/ws".into(),
            api_key: "pk_dev".into(),
            ..Default::default()
        };
        assert_eq!(config.ws_url(), "ws://127.0.0.1:9470/ws?apikey=pk_dev");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = TransportConfig {
            api_key: "pk_secret".into(),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("pk_secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
