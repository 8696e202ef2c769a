//! Reconnect supervisor: a dedicated task owning the retry counter and
//! delay schedule.
//!
//! The transport never retries on its own; this task observes its state
//! watch, classifies failures, and issues `connect()` for transient ones
//! with a fixed delay up to a bounded count. Permanent configuration
//! failures are surfaced as fatal and never retried. A manual reconnect
//! resets the counter and clears the fatal latch.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::SyncError;
use crate::transport::TransportClient;
use crate::types::{ConnectionState, FailureKind, FailureReason, SyncEvent};

/// Retry policy for transient connection failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Maximum automatic attempts before surfacing exhaustion.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_retries: 10,
        }
    }
}

/// Whether a failure is worth retrying.
pub(crate) fn should_retry(reason: &FailureReason) -> bool {
    reason.kind == FailureKind::Transient
}

pub(crate) fn spawn(
    transport: TransportClient,
    mut state_rx: watch::Receiver<ConnectionState>,
    policy: RetryPolicy,
    events: mpsc::Sender<SyncEvent>,
    mut reset_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempts: u32 = 0;
        // Latched on a config failure; only a manual reconnect clears it.
        let mut fatal = false;

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let state = state_rx.borrow_and_update().clone();
                    match state {
                        ConnectionState::Connected => {
                            attempts = 0;
                            fatal = false;
                        }
                        ConnectionState::Failed(reason) => {
                            if !should_retry(&reason) {
                                fatal = true;
                                error!(message = %reason.message, "permanent configuration failure, not retrying");
                                let _ = events
                                    .send(SyncEvent::Fatal(SyncError::Transport(reason.message)))
                                    .await;
                            } else if fatal {
                                // Still latched; wait for a manual reconnect.
                            } else if attempts < policy.max_retries {
                                attempts += 1;
                                info!(
                                    attempt = attempts,
                                    max = policy.max_retries,
                                    delay = ?policy.delay,
                                    "scheduling reconnect"
                                );
                                let _ = events
                                    .send(SyncEvent::ReconnectScheduled {
                                        attempt: attempts,
                                        max: policy.max_retries,
                                    })
                                    .await;
                                // The delay is interruptible by a manual
                                // reconnect, which resets the counter.
                                tokio::select! {
                                    _ = tokio::time::sleep(policy.delay) => {
                                        transport.connect().await;
                                    }
                                    reset = reset_rx.recv() => {
                                        if reset.is_none() {
                                            return;
                                        }
                                        attempts = 0;
                                        transport.connect().await;
                                    }
                                }
                            } else {
                                warn!(attempts, "automatic retries exhausted");
                                let _ = events.send(SyncEvent::RetriesExhausted).await;
                            }
                        }
                        ConnectionState::Disconnected | ConnectionState::Connecting => {}
                    }
                }
                reset = reset_rx.recv() => {
                    match reset {
                        Some(()) => {
                            info!("manual reconnect requested");
                            attempts = 0;
                            fatal = false;
                            transport.connect().await;
                        }
                        None => return,
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(should_retry(&FailureReason::transient("connection reset")));
    }

    #[test]
    fn config_failures_are_not_retryable() {
        assert!(!should_retry(&FailureReason::config("HTTP 403")));
    }
}
