use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PresenceRecord, Status};

/// Stable per-session user identity. Authentication happens upstream;
/// the engine only needs the resolved fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    /// Contact identifier (e.g. email), used for display-name fallback.
    pub contact: Option<String>,
    pub avatar_ref: Option<String>,
}

impl Identity {
    /// Create an identity with a generated user id.
    pub fn generate(name: &str) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            contact: None,
            avatar_ref: None,
        }
    }

    /// The presence record initially tracked for this identity.
    pub fn to_record(&self, status: Status) -> PresenceRecord {
        PresenceRecord {
            id: self.user_id.clone(),
            name: if self.name.is_empty() {
                None
            } else {
                Some(self.name.clone())
            },
            contact: self.contact.clone(),
            avatar_ref: self.avatar_ref.clone(),
            status,
            last_seen: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_unique_ids() {
        let a = Identity::generate("Ada");
        let b = Identity::generate("Ada");
        assert_ne!(a.user_id, b.user_id);
        assert_eq!(a.name, "Ada");
    }

    #[test]
    fn empty_name_omitted_from_record() {
        let mut id = Identity::generate("");
        id.contact = Some("grace@example.com".into());
        let record = id.to_record(Status::Available);
        assert!(record.name.is_none());
        assert_eq!(record.display_name(), "grace");
    }
}
