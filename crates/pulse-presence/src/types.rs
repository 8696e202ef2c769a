//! Core data model: statuses, presence records, status events, and
//! connection state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Fallback label when a member carries no identifying field at all.
pub const FALLBACK_NAME: &str = "User";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// A user's availability state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Available,
    Busy,
    Focused,
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(Status::Available),
            "busy" => Ok(Status::Busy),
            "focused" => Ok(Status::Focused),
            other => Err(format!("unknown status: {other:?}")),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Available => write!(f, "available"),
            Status::Busy => write!(f, "busy"),
            Status::Focused => write!(f, "focused"),
        }
    }
}

// ---------------------------------------------------------------------------
// Presence records and roster entries
// ---------------------------------------------------------------------------

/// The raw wire record tracked on the `global-presence` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub status: Status,
    pub last_seen: DateTime<Utc>,
}

/// A partial record; fields left `None` are retained from the previous
/// record on merge.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub avatar_ref: Option<String>,
    pub status: Option<Status>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Resolve a display name: explicit name, then the local part of the
    /// contact identifier, then a sentinel label. Never fails.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            if !name.is_empty() {
                return name.clone();
            }
        }
        if let Some(contact) = &self.contact {
            let local = contact.split('@').next().unwrap_or("");
            if !local.is_empty() {
                return local.to_string();
            }
        }
        FALLBACK_NAME.to_string()
    }

    /// Merge a partial record into this one, retaining unset fields.
    pub fn merge(&mut self, patch: RecordPatch) {
        if let Some(name) = patch.name {
            self.name = Some(name);
        }
        if let Some(contact) = patch.contact {
            self.contact = Some(contact);
        }
        if let Some(avatar_ref) = patch.avatar_ref {
            self.avatar_ref = Some(avatar_ref);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(last_seen) = patch.last_seen {
            self.last_seen = last_seen;
        }
    }

    /// Resolve into the roster entry consumers see.
    pub fn resolve(&self) -> PresenceUser {
        PresenceUser {
            id: self.id.clone(),
            name: self.display_name(),
            avatar_ref: self.avatar_ref.clone(),
            status: self.status,
            last_seen: self.last_seen,
        }
    }
}

/// One resolved roster entry, keyed by the stable user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub id: String,
    pub name: String,
    pub avatar_ref: Option<String>,
    pub status: Status,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Ephemeral fan-out message on the `status-updates` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub user_id: String,
    pub state: Status,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// How a connection failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Retryable: drops, timeouts, refused connections.
    Transient,
    /// Permanent configuration problem; retrying cannot succeed.
    Config,
}

/// A classified connection failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Config,
            message: message.into(),
        }
    }
}

/// Lifecycle of the single transport connection.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed(FailureReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

// ---------------------------------------------------------------------------
// Engine events
// ---------------------------------------------------------------------------

/// Events emitted by the engine for the embedding application to consume.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Roster entry completed; the first full snapshot arrived.
    Connected { online_count: usize },
    /// Real-time capability lost; the roster has been cleared.
    Disconnected,
    UserOnline(PresenceUser),
    UserOffline { user_id: String, name: String },
    StatusChanged(PresenceUser),
    /// A transient failure was observed; a retry is scheduled.
    ReconnectScheduled { attempt: u32, max: u32 },
    /// Automatic retries exhausted. Manual reconnect remains possible.
    RetriesExhausted,
    /// Permanent configuration failure; no retry will be attempted.
    Fatal(SyncError),
}
