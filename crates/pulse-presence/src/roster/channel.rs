//! Manager for our own record on the `global-presence` channel.
//!
//! Entry is a supervised join: the engine loop arms a deadline when the
//! join frame goes out and calls back into [`PresenceChannel`] when the
//! `joined` acknowledgment arrives or the deadline fires.

use tracing::{debug, warn};

use crate::transport::ChannelHandle;
use crate::types::{PresenceRecord, RecordPatch};

/// Where we are in the entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// Not on the roster, no join in flight.
    Idle,
    /// Join sent, awaiting the `joined` acknowledgment.
    Joining { attempt: u32 },
    /// Waiting out a linear backoff before the next attempt.
    Backoff { attempt: u32 },
    /// Join acknowledged, our record is tracked.
    Entered,
}

pub(crate) struct PresenceChannel {
    handle: ChannelHandle,
    record: PresenceRecord,
    entry: EntryState,
}

impl PresenceChannel {
    pub(crate) fn new(handle: ChannelHandle, record: PresenceRecord) -> Self {
        Self {
            handle,
            record,
            entry: EntryState::Idle,
        }
    }

    pub(crate) fn entry(&self) -> EntryState {
        self.entry
    }

    pub(crate) fn entered(&self) -> bool {
        self.entry == EntryState::Entered
    }

    pub(crate) fn record(&self) -> &PresenceRecord {
        &self.record
    }

    /// Send a join frame and move to `Joining`. Calling this while
    /// already entered is treated as an update instead.
    pub(crate) async fn begin_entry(&mut self) -> u32 {
        if self.entered() {
            debug!("already entered, re-tracking instead");
            self.handle.track(self.wire_record()).await;
            return 0;
        }
        let attempt = match self.entry {
            EntryState::Joining { attempt } | EntryState::Backoff { attempt } => attempt + 1,
            _ => 1,
        };
        self.entry = EntryState::Joining { attempt };
        self.handle.join().await;
        attempt
    }

    /// The `joined` acknowledgment arrived: publish our record and pull
    /// the authoritative roster.
    pub(crate) async fn confirm_entry(&mut self) {
        if self.entered() {
            return;
        }
        self.entry = EntryState::Entered;
        self.handle.track(self.wire_record()).await;
        self.handle.sync().await;
    }

    /// The entry deadline fired without an acknowledgment. Returns the
    /// attempt count that timed out, or `None` when no join was in
    /// flight.
    pub(crate) fn entry_timed_out(&mut self) -> Option<u32> {
        match self.entry {
            EntryState::Joining { attempt } => {
                warn!(attempt, "presence entry timed out");
                self.entry = EntryState::Backoff { attempt };
                Some(attempt)
            }
            _ => None,
        }
    }

    /// Exhausted entry attempts: treat as not entered until the next
    /// connection event.
    pub(crate) fn abandon_entry(&mut self) {
        self.entry = EntryState::Idle;
    }

    /// Merge a partial record and republish when entered. Fields not
    /// supplied are retained.
    pub(crate) async fn update(&mut self, patch: RecordPatch) {
        self.record.merge(patch);
        if self.entered() {
            self.handle.track(self.wire_record()).await;
        }
    }

    /// Remove ourselves from the roster. Idempotent: calling while not
    /// entered is a no-op.
    pub(crate) async fn leave(&mut self) {
        if !self.entered() {
            self.entry = EntryState::Idle;
            return;
        }
        self.entry = EntryState::Idle;
        self.handle.untrack().await;
        self.handle.leave().await;
    }

    /// Request a full roster snapshot.
    pub(crate) async fn request_sync(&self) {
        if self.entered() {
            self.handle.sync().await;
        }
    }

    /// Connection lost: a future reconnect performs a fresh entry.
    pub(crate) fn reset(&mut self) {
        self.entry = EntryState::Idle;
    }

    fn wire_record(&self) -> serde_json::Value {
        serde_json::to_value(&self.record).unwrap_or_default()
    }
}
