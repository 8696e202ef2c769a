//! Configuration schema types for Pulse.
//!
//! All structs use `serde(default)` so partial configs work correctly.
//! Missing fields are filled with defaults matching the agent's built-in
//! behavior.

mod identity;
mod logging;
mod persistence;
mod presence;
mod reconnect;
mod transport;

pub use identity::*;
pub use logging::*;
pub use persistence::*;
pub use presence::*;
pub use reconnect::*;
pub use transport::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for Pulse.
///
/// All options have sensible defaults matching current behavior.
/// Only override what you want to change.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PulseConfig {
    pub identity: IdentityConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub presence: PresenceConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================
