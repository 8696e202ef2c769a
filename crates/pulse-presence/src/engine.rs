//! The synchronization engine: a single reconciliation loop that is the
//! sole writer of the roster and the two-phase own-status state.
//!
//! Everything else communicates with the loop through messages: UI
//! intents arrive as commands, transport frames as envelopes, connection
//! transitions on a watch channel. All timers (persist debounce,
//! coalesced roster refresh, entry deadline) are deadlines polled in the
//! loop's `select!`, so handlers stay short and non-blocking.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pulse_common::wire::server_events;
use pulse_common::Envelope;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::identity::Identity;
use crate::reconnect::{self, RetryPolicy};
use crate::roster::{EntryState, PresenceChannel, Roster, PRESENCE_CHANNEL};
use crate::status::{StatusChannel, STATUS_CHANNEL};
use crate::store::StatusStore;
use crate::transport::{TransportClient, TransportConfig};
use crate::types::{
    ConnectionState, PresenceRecord, PresenceUser, RecordPatch, Status, StatusEvent, SyncEvent,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing knobs for roster entry and reconciliation.
#[derive(Debug, Clone)]
pub struct PresenceTuning {
    /// Deadline for the `joined` acknowledgment after sending a join.
    pub enter_timeout: Duration,
    /// Re-attempts after the first entry failure.
    pub enter_retries: u32,
    /// Base delay between entry attempts; grows linearly per attempt.
    pub enter_retry_delay: Duration,
    /// Delay before the coalesced full-roster refresh after a presence
    /// event burst.
    pub refresh_delay: Duration,
    /// Slow periodic full-roster refresh bounding staleness.
    pub refresh_interval: Duration,
    /// How long teardown waits for the leave acknowledgment.
    pub leave_grace: Duration,
}

impl Default for PresenceTuning {
    fn default() -> Self {
        Self {
            enter_timeout: Duration::from_secs(10),
            enter_retries: 3,
            enter_retry_delay: Duration::from_secs(2),
            refresh_delay: Duration::from_millis(750),
            refresh_interval: Duration::from_secs(45),
            leave_grace: Duration::from_millis(1500),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    pub tuning: PresenceTuning,
    /// Debounce window for durable status writes.
    pub persist_debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
            tuning: PresenceTuning::default(),
            persist_debounce: Duration::from_millis(400),
        }
    }
}

// ---------------------------------------------------------------------------
// Two-phase own status
// ---------------------------------------------------------------------------

/// Our own status as `{confirmed, optimistic}`, reconciled by timestamp
/// rather than by arrival order.
#[derive(Debug, Clone, Default)]
pub struct OwnStatus {
    /// Last value confirmed by an inbound event or the durable store.
    pub confirmed: Option<StatusEvent>,
    /// Local edit applied before network confirmation.
    pub optimistic: Option<StatusEvent>,
}

impl OwnStatus {
    /// The state consumers should see right now.
    pub fn current(&self) -> Status {
        self.optimistic
            .as_ref()
            .or(self.confirmed.as_ref())
            .map(|e| e.state)
            .unwrap_or_default()
    }

    fn newest_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let opt = self.optimistic.as_ref().map(|e| e.timestamp);
        let conf = self.confirmed.as_ref().map(|e| e.timestamp);
        match (opt, conf) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Reconcile an inbound self event, last-write-wins by timestamp.
    /// An event older than the newest local value never overwrites it.
    /// Returns whether the visible state changed.
    pub fn reconcile(&mut self, inbound: StatusEvent) -> bool {
        if let Some(newest) = self.newest_timestamp() {
            if inbound.timestamp < newest {
                // Confirmation of a superseded edit: keep it as confirmed
                // if it is at least as new as the previous confirmation,
                // but the optimistic value still wins.
                if self
                    .confirmed
                    .as_ref()
                    .map(|c| inbound.timestamp >= c.timestamp)
                    .unwrap_or(true)
                {
                    self.confirmed = Some(inbound);
                }
                return false;
            }
        }
        let before = self.current();
        if self
            .optimistic
            .as_ref()
            .map(|o| o.timestamp <= inbound.timestamp)
            .unwrap_or(false)
        {
            self.optimistic = None;
        }
        self.confirmed = Some(inbound);
        self.current() != before
    }
}

// ---------------------------------------------------------------------------
// Engine surface
// ---------------------------------------------------------------------------

pub(crate) struct Shared {
    pub(crate) roster: RwLock<Roster>,
    pub(crate) own: RwLock<OwnStatus>,
}

enum EngineCommand {
    SetStatus(Status),
    Reconnect,
    Shutdown { ack: oneshot::Sender<()> },
}

/// Cheap-to-clone handle for interacting with a running engine.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SyncHandle {
    /// Apply a new own status: optimistic local update, status
    /// broadcast, presence re-track, debounced durable write.
    pub async fn set_status(&self, state: Status) -> Result<(), SyncError> {
        self.command_tx
            .send(EngineCommand::SetStatus(state))
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Manually trigger a reconnect, resetting the retry counter.
    pub async fn reconnect(&self) -> Result<(), SyncError> {
        self.command_tx
            .send(EngineCommand::Reconnect)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Tear down: leave the roster (waiting briefly for the
    /// acknowledgment), then close the connection. Idempotent.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(EngineCommand::Shutdown { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }

    /// The current deduplicated roster.
    pub async fn snapshot(&self) -> Vec<PresenceUser> {
        self.shared.roster.read().await.snapshot()
    }

    /// Our own current status (optimistic value preferred).
    pub async fn own_status(&self) -> Status {
        self.shared.own.read().await.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }
}

/// The presence and status synchronization engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Start the engine: spawns the transport, the reconnect supervisor,
    /// and the reconciliation loop. Returns a handle plus the event
    /// stream for the embedding application.
    pub fn start(
        identity: Identity,
        config: SyncConfig,
        store: Option<Arc<dyn StatusStore>>,
    ) -> (SyncHandle, mpsc::Receiver<SyncEvent>) {
        let mut transport_config = config.transport.clone();
        transport_config.user_id = identity.user_id.clone();

        let (transport, frames) = TransportClient::spawn(transport_config);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let (reset_tx, reset_rx) = mpsc::channel(4);

        let supervisor = reconnect::spawn(
            transport.clone(),
            transport.state_watch(),
            config.retry.clone(),
            event_tx.clone(),
            reset_rx,
        );

        let shared = Arc::new(Shared {
            roster: RwLock::new(Roster::new()),
            own: RwLock::new(OwnStatus::default()),
        });

        let presence = PresenceChannel::new(
            transport.channel(PRESENCE_CHANNEL),
            identity.to_record(Status::default()),
        );
        let status_channel = StatusChannel::new(transport.channel(STATUS_CHANNEL));

        let handle = SyncHandle {
            command_tx,
            shared: Arc::clone(&shared),
            state_rx: transport.state_watch(),
        };

        let engine = EngineLoop {
            identity,
            tuning: config.tuning,
            persist_debounce: config.persist_debounce,
            state_rx: transport.state_watch(),
            transport,
            frames,
            commands: command_rx,
            presence,
            status_channel,
            shared,
            events: event_tx,
            store,
            reset_tx,
            supervisor,
            debounce_at: None,
            pending_persist: None,
            refresh_at: None,
            entry_at: None,
            announced: false,
            tearing_down: false,
        };
        tokio::spawn(engine.run());

        (handle, event_rx)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation loop
// ---------------------------------------------------------------------------

struct EngineLoop {
    identity: Identity,
    tuning: PresenceTuning,
    persist_debounce: Duration,
    transport: TransportClient,
    state_rx: watch::Receiver<ConnectionState>,
    frames: mpsc::Receiver<Envelope>,
    commands: mpsc::Receiver<EngineCommand>,
    presence: PresenceChannel,
    status_channel: StatusChannel,
    shared: Arc<Shared>,
    events: mpsc::Sender<SyncEvent>,
    store: Option<Arc<dyn StatusStore>>,
    reset_tx: mpsc::Sender<()>,
    supervisor: JoinHandle<()>,
    /// Single pending persist deadline; replaced on every status edit.
    debounce_at: Option<Instant>,
    pending_persist: Option<Status>,
    /// Coalesced full-roster refresh deadline.
    refresh_at: Option<Instant>,
    /// Entry acknowledgment deadline or backoff expiry.
    entry_at: Option<Instant>,
    /// Whether the `Connected` event was emitted for this connection.
    announced: bool,
    tearing_down: bool,
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl EngineLoop {
    async fn run(mut self) {
        self.seed_from_store().await;
        self.transport.connect().await;

        let mut refresh_tick = tokio::time::interval(self.tuning.refresh_interval);
        refresh_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        refresh_tick.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(EngineCommand::SetStatus(state)) => self.set_own_status(state).await,
                    Some(EngineCommand::Reconnect) => {
                        let _ = self.reset_tx.send(()).await;
                    }
                    Some(EngineCommand::Shutdown { ack }) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                frame = self.frames.recv() => match frame {
                    Some(envelope) => self.handle_frame(envelope).await,
                    None => break, // transport task gone
                },
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = self.state_rx.borrow_and_update().clone();
                    self.handle_state_change(state).await;
                }
                _ = maybe_sleep(self.debounce_at) => self.fire_persist(),
                _ = maybe_sleep(self.refresh_at) => {
                    self.refresh_at = None;
                    self.presence.request_sync().await;
                }
                _ = maybe_sleep(self.entry_at) => self.handle_entry_deadline().await,
                _ = refresh_tick.tick() => {
                    self.presence.request_sync().await;
                }
            }
        }

        self.supervisor.abort();
    }

    // -- commands ----------------------------------------------------------

    async fn set_own_status(&mut self, state: Status) {
        let now = Utc::now();
        let event = StatusEvent {
            user_id: self.identity.user_id.clone(),
            state,
            timestamp: now,
        };

        // (a) optimistic local view, pre-network
        {
            let mut own = self.shared.own.write().await;
            own.optimistic = Some(event.clone());
        }

        // (b) immediate roster self-patch
        let patched = {
            let mut roster = self.shared.roster.write().await;
            roster.patch_status(&self.identity.user_id, state, now)
        };
        if let Some(user) = patched {
            let _ = self.events.send(SyncEvent::StatusChanged(user)).await;
        }

        // (c) low-latency broadcast
        if self.transport.state().is_connected() {
            self.status_channel.publish(&event).await;
        }

        // (d) presence record update, non-blocking; not user-facing on
        // failure
        self.presence
            .update(RecordPatch {
                status: Some(state),
                last_seen: Some(now),
                ..Default::default()
            })
            .await;

        // (e) debounced durable write; only the latest state survives
        // the window
        self.pending_persist = Some(state);
        self.debounce_at = Some(Instant::now() + self.persist_debounce);
        debug!(state = %state, "own status set");
    }

    // -- inbound frames ----------------------------------------------------

    async fn handle_frame(&mut self, envelope: Envelope) {
        match envelope.channel.as_str() {
            PRESENCE_CHANNEL => self.handle_presence_frame(envelope).await,
            STATUS_CHANNEL => {
                if envelope.event == server_events::EVENT {
                    if let Some(event) = StatusChannel::parse(&envelope) {
                        self.apply_inbound_status(event).await;
                    }
                }
            }
            _ => {} // system frames (pong) need no handling
        }
    }

    async fn handle_presence_frame(&mut self, envelope: Envelope) {
        match envelope.event.as_str() {
            server_events::JOINED => {
                self.entry_at = None;
                self.presence.confirm_entry().await;
                info!("entered presence roster");
            }
            server_events::PRESENCE => {
                let members = parse_members(&envelope.payload);
                let count = members.len();
                {
                    let mut roster = self.shared.roster.write().await;
                    roster.replace_all(members);
                }
                if !self.announced {
                    self.announced = true;
                    let _ = self
                        .events
                        .send(SyncEvent::Connected {
                            online_count: count,
                        })
                        .await;
                }
            }
            server_events::PRESENCE_DIFF => {
                self.apply_presence_diff(&envelope.payload).await;
            }
            server_events::ERROR => {
                let reason = envelope
                    .payload
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown");
                warn!(reason = %reason, "presence channel error");
                if matches!(self.presence.entry(), EntryState::Joining { .. }) {
                    self.handle_entry_failure();
                }
            }
            server_events::LEFT => {}
            other => debug!(event = %other, "unhandled presence frame"),
        }
    }

    /// The optimistic incremental patch: apply the diff immediately,
    /// then schedule one coalesced full refresh to correct missed or
    /// out-of-order events.
    async fn apply_presence_diff(&mut self, payload: &serde_json::Value) {
        let joins = parse_meta_list(payload.get("joins"));
        let leaves = parse_meta_list(payload.get("leaves"));

        let mut outgoing: Vec<SyncEvent> = Vec::new();
        {
            let mut roster = self.shared.roster.write().await;
            for record in joins {
                let user = record.resolve();
                let existed = roster.contains(&user.id);
                if roster.apply(user.clone()) && user.id != self.identity.user_id {
                    if existed {
                        outgoing.push(SyncEvent::StatusChanged(user));
                    } else {
                        outgoing.push(SyncEvent::UserOnline(user));
                    }
                }
            }
            for record in leaves {
                if let Some(user) = roster.remove(&record.id) {
                    if user.id != self.identity.user_id {
                        outgoing.push(SyncEvent::UserOffline {
                            user_id: user.id,
                            name: user.name,
                        });
                    }
                }
            }
        }
        for event in outgoing {
            let _ = self.events.send(event).await;
        }

        // Coalesce: one refresh per burst.
        if self.refresh_at.is_none() && self.presence.entered() {
            self.refresh_at = Some(Instant::now() + self.tuning.refresh_delay);
        }
    }

    async fn apply_inbound_status(&mut self, event: StatusEvent) {
        if event.user_id == self.identity.user_id {
            let changed = self.shared.own.write().await.reconcile(event.clone());
            if changed {
                let patched = {
                    let mut roster = self.shared.roster.write().await;
                    roster.patch_status(&event.user_id, event.state, event.timestamp)
                };
                if let Some(user) = patched {
                    let _ = self.events.send(SyncEvent::StatusChanged(user)).await;
                }
            }
            return;
        }

        let patched = {
            let mut roster = self.shared.roster.write().await;
            roster.patch_status(&event.user_id, event.state, event.timestamp)
        };
        match patched {
            Some(user) => {
                let _ = self.events.send(SyncEvent::StatusChanged(user)).await;
            }
            None => {
                // Not on the roster yet; the coalesced refresh will
                // reconcile membership.
                debug!(user = %event.user_id, "status event for unknown user");
                if self.refresh_at.is_none() && self.presence.entered() {
                    self.refresh_at = Some(Instant::now() + self.tuning.refresh_delay);
                }
            }
        }
    }

    // -- connection lifecycle ----------------------------------------------

    async fn handle_state_change(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                info!("transport connected, entering roster");
                self.announced = false;
                self.status_channel.join().await;
                self.presence.begin_entry().await;
                self.entry_at = Some(Instant::now() + self.tuning.enter_timeout);
            }
            ConnectionState::Connecting => {}
            ConnectionState::Disconnected | ConnectionState::Failed(_) => {
                self.on_connection_lost().await;
            }
        }
    }

    /// Clear the local view and mark "not entered" so a future
    /// reconnect performs a fresh enter rather than a stale update.
    async fn on_connection_lost(&mut self) {
        self.entry_at = None;
        self.refresh_at = None;
        self.presence.reset();

        let had_members = {
            let mut roster = self.shared.roster.write().await;
            let had = !roster.is_empty();
            roster.clear();
            had
        };
        if self.announced || had_members {
            self.announced = false;
            let _ = self.events.send(SyncEvent::Disconnected).await;
        }
    }

    async fn handle_entry_deadline(&mut self) {
        self.entry_at = None;
        match self.presence.entry() {
            EntryState::Joining { attempt } => {
                self.presence.entry_timed_out();
                self.schedule_entry_retry(attempt);
            }
            EntryState::Backoff { .. } => {
                self.presence.begin_entry().await;
                self.entry_at = Some(Instant::now() + self.tuning.enter_timeout);
            }
            _ => {}
        }
    }

    fn handle_entry_failure(&mut self) {
        if let Some(attempt) = self.presence.entry_timed_out() {
            self.schedule_entry_retry(attempt);
        }
    }

    fn schedule_entry_retry(&mut self, attempt: u32) {
        if attempt > self.tuning.enter_retries {
            let err = SyncError::Entry(format!("no acknowledgment after {attempt} attempts"));
            warn!(error = %err, "giving up on presence entry until next connection");
            self.presence.abandon_entry();
        } else {
            // Linear backoff per attempt.
            let delay = self.tuning.enter_retry_delay * attempt;
            self.entry_at = Some(Instant::now() + delay);
        }
    }

    // -- persistence -------------------------------------------------------

    async fn seed_from_store(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        match store.fetch_initial(&self.identity.user_id).await {
            Ok(Some(stored)) => {
                {
                    let mut own = self.shared.own.write().await;
                    if own.optimistic.is_none() && own.confirmed.is_none() {
                        own.confirmed = Some(StatusEvent {
                            user_id: self.identity.user_id.clone(),
                            state: stored.state,
                            timestamp: stored.updated_at,
                        });
                    }
                }
                self.presence
                    .update(RecordPatch {
                        status: Some(stored.state),
                        ..Default::default()
                    })
                    .await;
                info!(state = %stored.state, "seeded status from durable store");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to fetch initial status"),
        }
    }

    fn fire_persist(&mut self) {
        self.debounce_at = None;
        let Some(state) = self.pending_persist.take() else {
            return;
        };
        let Some(store) = self.store.clone() else {
            return;
        };
        let user_id = self.identity.user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.persist(&user_id, state).await {
                warn!(error = %e, "durable status write failed");
            }
        });
    }

    // -- teardown ----------------------------------------------------------

    async fn shutdown(&mut self) {
        if self.tearing_down {
            return;
        }
        self.tearing_down = true;
        info!("engine teardown");

        // Flush a pending durable write rather than dropping it.
        self.fire_persist();

        let was_entered = self.presence.entered();
        self.presence.leave().await;

        if was_entered {
            // The channel must not be released while the leave is in
            // flight: wait for the acknowledgment or the grace period.
            let grace = tokio::time::sleep(self.tuning.leave_grace);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    _ = &mut grace => break,
                    frame = self.frames.recv() => match frame {
                        Some(envelope)
                            if envelope.channel == PRESENCE_CHANNEL
                                && envelope.event == server_events::LEFT =>
                        {
                            break;
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        self.transport.disconnect().await;
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

fn parse_members(payload: &serde_json::Value) -> Vec<PresenceUser> {
    payload
        .get("members")
        .and_then(|m| m.as_array())
        .map(|metas| {
            metas
                .iter()
                .filter_map(|meta| serde_json::from_value::<PresenceRecord>(meta.clone()).ok())
                .map(|record| record.resolve())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_meta_list(value: Option<&serde_json::Value>) -> Vec<PresenceRecord> {
    value
        .and_then(|v| v.as_array())
        .map(|metas| {
            metas
                .iter()
                .filter_map(|meta| serde_json::from_value::<PresenceRecord>(meta.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
