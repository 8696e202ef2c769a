//! Low-latency fan-out of status transitions on a dedicated channel.
//!
//! Status changes are frequent and latency-sensitive, so they bypass the
//! heavier presence roster: a `status-update` broadcast is applied to the
//! roster as a cheap field patch while the presence record itself is
//! republished asynchronously afterward.

use pulse_common::Envelope;
use tracing::debug;

use crate::transport::ChannelHandle;
use crate::types::StatusEvent;

/// Well-known channel carrying status broadcasts.
pub const STATUS_CHANNEL: &str = "status-updates";

/// Application event name inside `publish`/`event` payloads.
pub const STATUS_EVENT: &str = "status-update";

pub(crate) struct StatusChannel {
    handle: ChannelHandle,
}

impl StatusChannel {
    pub(crate) fn new(handle: ChannelHandle) -> Self {
        Self { handle }
    }

    pub(crate) async fn join(&self) {
        self.handle.join().await;
    }

    pub(crate) async fn publish(&self, event: &StatusEvent) {
        match serde_json::to_value(event) {
            Ok(payload) => self.handle.publish(STATUS_EVENT, payload).await,
            Err(e) => debug!(error = %e, "failed to encode status event"),
        }
    }

    /// Parse an inbound broadcast delivery into a [`StatusEvent`].
    /// Deliveries carrying other application events are ignored.
    pub(crate) fn parse(envelope: &Envelope) -> Option<StatusEvent> {
        let event = envelope.payload.get("event")?.as_str()?;
        if event != STATUS_EVENT {
            debug!(event = %event, "unhandled broadcast event");
            return None;
        }
        let payload = envelope.payload.get("payload")?.clone();
        serde_json::from_value(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;
    use pulse_common::wire::server_events;
    use serde_json::json;

    #[test]
    fn parse_extracts_status_event() {
        let envelope = Envelope::new(
            STATUS_CHANNEL,
            server_events::EVENT,
            json!({
                "event": STATUS_EVENT,
                "payload": {
                    "userId": "u1",
                    "state": "focused",
                    "timestamp": "2026-02-01T10:00:00Z"
                }
            }),
        );
        let event = StatusChannel::parse(&envelope).unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.state, Status::Focused);
    }

    #[test]
    fn parse_ignores_other_events() {
        let envelope = Envelope::new(
            STATUS_CHANNEL,
            server_events::EVENT,
            json!({ "event": "chat-message", "payload": {} }),
        );
        assert!(StatusChannel::parse(&envelope).is_none());
    }

    #[test]
    fn parse_rejects_malformed_payload() {
        let envelope = Envelope::new(
            STATUS_CHANNEL,
            server_events::EVENT,
            json!({ "event": STATUS_EVENT, "payload": { "userId": 42 } }),
        );
        assert!(StatusChannel::parse(&envelope).is_none());
    }
}
