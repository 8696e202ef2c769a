//! Wire envelope for the pulse message bus.
//!
//! Every frame on the socket is one JSON [`Envelope`]. The envelope carries
//! a channel name, an event name, an opaque JSON payload, and an optional
//! client-assigned sequence number that direct replies echo back. Domain
//! payloads (presence records, status events) are defined by the engine;
//! the relay treats them as opaque.

use serde::{Deserialize, Serialize};

/// Reserved channel for connection-level frames (hello, heartbeat).
pub const SYSTEM_CHANNEL: &str = "_system";

/// Events sent by clients.
pub mod client_events {
    /// First frame after connecting: `{"userId": "..."}` on the system channel.
    pub const HELLO: &str = "hello";
    /// Join a channel. Replied to with `joined` or `error`.
    pub const JOIN: &str = "join";
    /// Leave a channel. Replied to with `left`. Unknown channels still get `left`.
    pub const LEAVE: &str = "leave";
    /// Broadcast to a channel: `{"event": name, "payload": {...}}`.
    pub const PUBLISH: &str = "publish";
    /// Publish this connection's presence meta (the payload) on a channel.
    pub const TRACK: &str = "track";
    /// Withdraw this connection's presence meta from a channel.
    pub const UNTRACK: &str = "untrack";
    /// Request a full presence snapshot, replied to with `presence`.
    pub const SYNC: &str = "sync";
    /// Keepalive on the system channel, replied to with `pong`.
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Events sent by the server.
pub mod server_events {
    /// Join acknowledged.
    pub const JOINED: &str = "joined";
    /// Leave acknowledged.
    pub const LEFT: &str = "left";
    /// Request rejected: `{"reason": "..."}`.
    pub const ERROR: &str = "error";
    /// Broadcast delivery: `{"event": name, "payload": {...}}`.
    pub const EVENT: &str = "event";
    /// Full presence snapshot: `{"members": [meta, ...]}`.
    pub const PRESENCE: &str = "presence";
    /// Incremental presence change: `{"joins": [meta, ...], "leaves": [meta, ...]}`.
    pub const PRESENCE_DIFF: &str = "presence_diff";
    /// Heartbeat reply.
    pub const PONG: &str = "pong";
}

/// A single frame on the message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl Envelope {
    pub fn new(
        channel: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            event: event.into(),
            payload,
            seq: None,
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// A reply on the same channel, echoing this envelope's seq.
    pub fn reply(&self, event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: self.channel.clone(),
            event: event.into(),
            payload,
            seq: self.seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() {
        let env = Envelope::new("global-presence", client_events::JOIN, json!({})).with_seq(7);
        let text = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.channel, "global-presence");
        assert_eq!(parsed.event, "join");
        assert_eq!(parsed.seq, Some(7));
    }

    #[test]
    fn seq_omitted_when_absent() {
        let env = Envelope::new("status-updates", client_events::PUBLISH, json!({"x": 1}));
        let text = serde_json::to_string(&env).unwrap();
        assert!(!text.contains("seq"));
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let parsed: Envelope =
            serde_json::from_str(r#"{"channel":"_system","event":"pong"}"#).unwrap();
        assert_eq!(parsed.event, server_events::PONG);
        assert!(parsed.payload.is_null());
        assert_eq!(parsed.seq, None);
    }

    #[test]
    fn reply_echoes_seq_and_channel() {
        let req = Envelope::new("global-presence", client_events::JOIN, json!({})).with_seq(3);
        let reply = req.reply(server_events::JOINED, json!({}));
        assert_eq!(reply.channel, "global-presence");
        assert_eq!(reply.event, "joined");
        assert_eq!(reply.seq, Some(3));
    }
}
