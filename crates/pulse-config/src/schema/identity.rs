use serde::{Deserialize, Serialize};

/// Who this agent appears as on the presence roster.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentityConfig {
    /// Stable user id. Generated on first run if empty.
    pub user_id: String,
    /// Display name shown to other users.
    pub name: String,
    /// Contact identifier (e.g. email), used as a display-name fallback.
    pub contact: String,
    /// Optional avatar reference (URL or asset id).
    pub avatar_ref: String,
}
