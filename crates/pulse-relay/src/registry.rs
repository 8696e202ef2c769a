//! Channel registry: subscribers and presence metas per channel.
//!
//! Each connected client may subscribe to any number of channels and
//! publish at most one presence meta per channel. The registry treats
//! metas as opaque JSON; the engine defines their shape.

use std::collections::HashMap;
use std::sync::Arc;

use pulse_common::wire::server_events;
use pulse_common::Envelope;
use tokio::sync::{mpsc, RwLock};

/// Relay-local connection identifier.
pub type ConnId = u64;

#[derive(Default)]
struct Channel {
    subscribers: HashMap<ConnId, mpsc::UnboundedSender<Envelope>>,
    metas: HashMap<ConnId, serde_json::Value>,
}

/// Thread-safe channel registry shared by all connection handlers.
#[derive(Clone, Default)]
pub struct Registry {
    channels: Arc<RwLock<HashMap<String, Channel>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a channel. Idempotent.
    pub async fn join(&self, channel: &str, conn: ConnId, tx: mpsc::UnboundedSender<Envelope>) {
        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_default()
            .subscribers
            .insert(conn, tx);
    }

    /// Unsubscribe a connection. Returns the presence meta it had
    /// tracked on this channel, if any, so the caller can broadcast the
    /// leave diff.
    pub async fn leave(&self, channel: &str, conn: ConnId) -> Option<serde_json::Value> {
        let mut channels = self.channels.write().await;
        let entry = channels.get_mut(channel)?;
        entry.subscribers.remove(&conn);
        let meta = entry.metas.remove(&conn);
        if entry.subscribers.is_empty() && entry.metas.is_empty() {
            channels.remove(channel);
        }
        meta
    }

    /// Whether a connection is subscribed to a channel.
    pub async fn is_subscribed(&self, channel: &str, conn: ConnId) -> bool {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|c| c.subscribers.contains_key(&conn))
            .unwrap_or(false)
    }

    /// Send an envelope to every subscriber of a channel, optionally
    /// excluding one connection (the publisher).
    pub async fn broadcast(&self, channel: &str, envelope: Envelope, exclude: Option<ConnId>) {
        let channels = self.channels.read().await;
        if let Some(entry) = channels.get(channel) {
            for (conn, tx) in &entry.subscribers {
                if Some(*conn) == exclude {
                    continue;
                }
                // Closed receivers are cleaned up on disconnect.
                let _ = tx.send(envelope.clone());
            }
        }
    }

    /// Store a connection's presence meta. Requires a prior join.
    /// Returns false when the connection is not subscribed.
    pub async fn track(&self, channel: &str, conn: ConnId, meta: serde_json::Value) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get_mut(channel) {
            Some(entry) if entry.subscribers.contains_key(&conn) => {
                entry.metas.insert(conn, meta);
                true
            }
            _ => false,
        }
    }

    /// Withdraw a connection's presence meta. Returns it if present.
    pub async fn untrack(&self, channel: &str, conn: ConnId) -> Option<serde_json::Value> {
        let mut channels = self.channels.write().await;
        channels.get_mut(channel)?.metas.remove(&conn)
    }

    /// All presence metas currently tracked on a channel.
    pub async fn members(&self, channel: &str) -> Vec<serde_json::Value> {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|c| c.metas.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove a connection everywhere. Returns `(channel, meta)` pairs
    /// for every channel where it had tracked presence, so leave diffs
    /// can be broadcast. A dropped connection implies untrack.
    pub async fn drop_connection(&self, conn: ConnId) -> Vec<(String, serde_json::Value)> {
        let mut channels = self.channels.write().await;
        let mut departures = Vec::new();
        channels.retain(|name, entry| {
            entry.subscribers.remove(&conn);
            if let Some(meta) = entry.metas.remove(&conn) {
                departures.push((name.clone(), meta));
            }
            !(entry.subscribers.is_empty() && entry.metas.is_empty())
        });
        departures
    }

    /// Number of live channels (for logging).
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// Build a `presence_diff` envelope for a single join or leave.
pub fn presence_diff(
    channel: &str,
    joins: Vec<serde_json::Value>,
    leaves: Vec<serde_json::Value>,
) -> Envelope {
    Envelope::new(
        channel,
        server_events::PRESENCE_DIFF,
        serde_json::json!({ "joins": joins, "leaves": leaves }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriber() -> (
        mpsc::UnboundedSender<Envelope>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn track_requires_join() {
        let registry = Registry::new();
        assert!(!registry.track("room", 1, json!({"id": "a"})).await);

        let (tx, _rx) = subscriber();
        registry.join("room", 1, tx).await;
        assert!(registry.track("room", 1, json!({"id": "a"})).await);
        assert_eq!(registry.members("room").await.len(), 1);
    }

    #[tokio::test]
    async fn broadcast_excludes_publisher() {
        let registry = Registry::new();
        let (tx1, mut rx1) = subscriber();
        let (tx2, mut rx2) = subscriber();
        registry.join("room", 1, tx1).await;
        registry.join("room", 2, tx2).await;

        let envelope = Envelope::new("room", "event", json!({"n": 1}));
        registry.broadcast("room", envelope, Some(1)).await;

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().event, "event");
    }

    #[tokio::test]
    async fn retrack_replaces_meta() {
        let registry = Registry::new();
        let (tx, _rx) = subscriber();
        registry.join("room", 1, tx).await;
        registry.track("room", 1, json!({"id": "a", "status": "available"})).await;
        registry.track("room", 1, json!({"id": "a", "status": "busy"})).await;

        let members = registry.members("room").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0]["status"], "busy");
    }

    #[tokio::test]
    async fn drop_connection_reports_departures() {
        let registry = Registry::new();
        let (tx, _rx) = subscriber();
        registry.join("a", 7, tx.clone()).await;
        registry.join("b", 7, tx).await;
        registry.track("a", 7, json!({"id": "u"})).await;

        let departures = registry.drop_connection(7).await;
        assert_eq!(departures.len(), 1);
        assert_eq!(departures[0].0, "a");
        assert_eq!(registry.channel_count().await, 0);
    }

    #[tokio::test]
    async fn leave_returns_meta_and_prunes_channel() {
        let registry = Registry::new();
        let (tx, _rx) = subscriber();
        registry.join("room", 1, tx).await;
        registry.track("room", 1, json!({"id": "u"})).await;

        let meta = registry.leave("room", 1).await;
        assert!(meta.is_some());
        assert_eq!(registry.channel_count().await, 0);
        // Leaving again is harmless.
        assert!(registry.leave("room", 1).await.is_none());
    }
}
