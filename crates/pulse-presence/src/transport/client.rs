//! Public handle for the transport task and per-channel handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pulse_common::wire::client_events;
use pulse_common::Envelope;
use tokio::sync::{mpsc, watch};

use crate::types::ConnectionState;

use super::connection::socket_task;
use super::types::{TransportCommand, TransportConfig};

/// Handle for the single transport connection.
///
/// All methods are non-blocking and send commands to the background
/// socket task. Channel handles are cached by name so repeated
/// acquisition returns an equivalent handle.
#[derive(Clone)]
pub struct TransportClient {
    command_tx: mpsc::Sender<TransportCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    channels: Arc<Mutex<HashMap<String, ChannelHandle>>>,
    seq: Arc<AtomicU64>,
}

impl TransportClient {
    /// Start the background socket task. Returns the handle and the
    /// stream of inbound frames.
    pub fn spawn(config: TransportConfig) -> (Self, mpsc::Receiver<Envelope>) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(socket_task(config, state_tx, event_tx, command_rx));

        let client = Self {
            command_tx,
            state_rx,
            channels: Arc::new(Mutex::new(HashMap::new())),
            seq: Arc::new(AtomicU64::new(1)),
        };
        (client, event_rx)
    }

    /// Ask the task to dial. A no-op while already connected.
    pub async fn connect(&self) {
        let _ = self.command_tx.send(TransportCommand::Connect).await;
    }

    /// Close the connection deliberately (state goes to `Disconnected`,
    /// not `Failed`, so the supervisor will not retry).
    pub async fn disconnect(&self) {
        let _ = self.command_tx.send(TransportCommand::Disconnect).await;
    }

    /// Acquire the handle for a named channel. Cached by name.
    pub fn channel(&self, name: &str) -> ChannelHandle {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(name.to_string())
            .or_insert_with(|| ChannelHandle {
                name: name.to_string(),
                command_tx: self.command_tx.clone(),
                seq: Arc::clone(&self.seq),
            })
            .clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to connection-state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// Handle for one named pub/sub channel.
#[derive(Clone)]
pub struct ChannelHandle {
    name: String,
    command_tx: mpsc::Sender<TransportCommand>,
    seq: Arc<AtomicU64>,
}

impl ChannelHandle {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, event: &str, payload: serde_json::Value) {
        let envelope = Envelope::new(&self.name, event, payload).with_seq(self.next_seq());
        let _ = self.command_tx.send(TransportCommand::Send(envelope)).await;
    }

    /// Subscribe to this channel. The relay replies with `joined`.
    pub async fn join(&self) {
        self.send(client_events::JOIN, serde_json::json!({})).await;
    }

    /// Unsubscribe. The relay replies with `left`.
    pub async fn leave(&self) {
        self.send(client_events::LEAVE, serde_json::json!({})).await;
    }

    /// Broadcast an application event to the channel's subscribers.
    pub async fn publish(&self, event: &str, payload: serde_json::Value) {
        self.send(
            client_events::PUBLISH,
            serde_json::json!({ "event": event, "payload": payload }),
        )
        .await;
    }

    /// Publish this connection's presence meta on the channel.
    pub async fn track(&self, meta: serde_json::Value) {
        self.send(client_events::TRACK, meta).await;
    }

    /// Withdraw this connection's presence meta.
    pub async fn untrack(&self) {
        self.send(client_events::UNTRACK, serde_json::json!({})).await;
    }

    /// Request a full presence snapshot (`presence` reply).
    pub async fn sync(&self) {
        self.send(client_events::SYNC, serde_json::json!({})).await;
    }
}
