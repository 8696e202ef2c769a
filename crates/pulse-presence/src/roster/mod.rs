//! The presence roster: pure deduplicated state plus the channel manager
//! that maintains our own record on `global-presence`.

mod channel;
mod state;

pub use state::Roster;

pub(crate) use channel::{EntryState, PresenceChannel};

/// Well-known channel carrying the shared roster.
pub const PRESENCE_CHANNEL: &str = "global-presence";
