use serde::{Deserialize, Serialize};

/// Timing knobs for roster entry and reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Deadline for the roster entry acknowledgment in seconds (1-120).
    pub enter_timeout: u64,
    /// How many times entry is re-attempted before giving up (0-10).
    pub enter_retries: u32,
    /// Base delay between entry attempts in seconds; grows linearly (1-60).
    pub enter_retry_delay: u64,
    /// Delay before the coalesced full-roster refresh after a presence
    /// event, in milliseconds (50-10000).
    pub refresh_delay_ms: u64,
    /// Slow periodic full-roster refresh interval in seconds (5-3600).
    pub refresh_interval: u64,
    /// Grace period to wait for the leave acknowledgment on teardown,
    /// in milliseconds (0-10000).
    pub leave_grace_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enter_timeout: 10,
            enter_retries: 3,
            enter_retry_delay: 2,
            refresh_delay_ms: 750,
            refresh_interval: 45,
            leave_grace_ms: 1500,
        }
    }
}
