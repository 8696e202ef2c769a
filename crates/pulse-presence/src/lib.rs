//! Presence and status synchronization engine.
//!
//! Keeps every connected client's view of "who is online" and "what
//! state each user is in" consistent over a reconnecting pub/sub
//! transport. The roster lives on the `global-presence` channel; status
//! transitions fan out on the dedicated `status-updates` channel and are
//! applied as cheap field patches, with the roster reconciled eventually
//! via coalesced full refreshes.
//!
//! Start the engine with [`SyncEngine::start`]; interact through the
//! returned [`SyncHandle`] and consume [`SyncEvent`]s from the event
//! stream.

pub mod engine;
pub mod error;
pub mod identity;
pub mod reconnect;
pub mod roster;
pub mod status;
pub mod store;
pub mod transport;
pub mod types;

pub use engine::{OwnStatus, PresenceTuning, SyncConfig, SyncEngine, SyncHandle};
pub use error::SyncError;
pub use identity::Identity;
pub use reconnect::RetryPolicy;
pub use roster::{Roster, PRESENCE_CHANNEL};
pub use status::{STATUS_CHANNEL, STATUS_EVENT};
pub use store::{HttpStatusStore, StatusStore, StoredStatus};
pub use transport::{ChannelHandle, TransportClient, TransportConfig};
pub use types::{
    ConnectionState, FailureKind, FailureReason, PresenceRecord, PresenceUser, RecordPatch,
    Status, StatusEvent, SyncEvent,
};
