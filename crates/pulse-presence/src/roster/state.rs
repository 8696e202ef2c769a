//! Pure roster state: at most one entry per user id, preferring the most
//! recently seen record on conflict.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{PresenceUser, Status};

/// Deduplicated set of currently-online users.
#[derive(Debug, Default)]
pub struct Roster {
    members: HashMap<String, PresenceUser>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a member. An older record never replaces a newer
    /// one for the same id (events are not causally ordered across
    /// receivers).
    pub fn apply(&mut self, user: PresenceUser) -> bool {
        match self.members.get(&user.id) {
            Some(existing) if user.last_seen < existing.last_seen => false,
            _ => {
                self.members.insert(user.id.clone(), user);
                true
            }
        }
    }

    /// Patch a member's status in place. Returns the updated entry, or
    /// `None` when the user is not on the roster.
    pub fn patch_status(
        &mut self,
        user_id: &str,
        status: Status,
        timestamp: DateTime<Utc>,
    ) -> Option<PresenceUser> {
        let entry = self.members.get_mut(user_id)?;
        entry.status = status;
        if timestamp > entry.last_seen {
            entry.last_seen = timestamp;
        }
        Some(entry.clone())
    }

    /// Remove a member. Returns the removed entry if present.
    pub fn remove(&mut self, user_id: &str) -> Option<PresenceUser> {
        self.members.remove(user_id)
    }

    /// Replace the whole roster from an authoritative member list,
    /// deduplicating by id and preferring the most recent record.
    pub fn replace_all(&mut self, users: impl IntoIterator<Item = PresenceUser>) {
        self.members.clear();
        for user in users {
            self.apply(user);
        }
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The current roster, sorted by display name then id for stable
    /// output.
    pub fn snapshot(&self) -> Vec<PresenceUser> {
        let mut users: Vec<PresenceUser> = self.members.values().cloned().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user(id: &str, name: &str, status: Status, secs: i64) -> PresenceUser {
        PresenceUser {
            id: id.into(),
            name: name.into(),
            avatar_ref: None,
            status,
            last_seen: Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn one_entry_per_id() {
        let mut roster = Roster::new();
        roster.apply(user("a", "Ada", Status::Available, 0));
        roster.apply(user("a", "Ada", Status::Busy, 1));
        roster.apply(user("a", "Ada", Status::Focused, 2));
        let snapshot = roster.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, Status::Focused);
    }

    #[test]
    fn older_record_does_not_replace_newer() {
        let mut roster = Roster::new();
        assert!(roster.apply(user("a", "Ada", Status::Busy, 10)));
        assert!(!roster.apply(user("a", "Ada", Status::Available, 5)));
        assert_eq!(roster.snapshot()[0].status, Status::Busy);
    }

    #[test]
    fn equal_timestamp_replaces() {
        // Re-track (update) events can carry the same lastSeen.
        let mut roster = Roster::new();
        roster.apply(user("a", "Ada", Status::Available, 10));
        assert!(roster.apply(user("a", "Ada", Status::Busy, 10)));
        assert_eq!(roster.snapshot()[0].status, Status::Busy);
    }

    #[test]
    fn patch_status_updates_existing_entry() {
        let mut roster = Roster::new();
        roster.apply(user("a", "Ada", Status::Available, 0));
        let patched = roster
            .patch_status("a", Status::Busy, Utc.timestamp_opt(1_760_000_005, 0).unwrap())
            .unwrap();
        assert_eq!(patched.status, Status::Busy);
        assert!(roster.patch_status("ghost", Status::Busy, Utc::now()).is_none());
    }

    #[test]
    fn leave_then_reenter() {
        let mut roster = Roster::new();
        roster.apply(user("a", "Ada", Status::Available, 0));
        roster.apply(user("b", "Bob", Status::Busy, 0));

        let removed = roster.remove("b").unwrap();
        assert_eq!(removed.name, "Bob");
        assert_eq!(roster.snapshot().len(), 1);
        assert_eq!(roster.snapshot()[0].id, "a");

        roster.apply(user("b", "Bob", Status::Available, 10));
        let snapshot = roster.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].status, Status::Available);
    }

    #[test]
    fn replace_all_dedups_preferring_latest() {
        let mut roster = Roster::new();
        roster.apply(user("stale", "Old", Status::Busy, 0));
        roster.replace_all(vec![
            user("a", "Ada", Status::Available, 1),
            user("a", "Ada", Status::Busy, 3),
            user("a", "Ada", Status::Focused, 2),
        ]);
        let snapshot = roster.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, Status::Busy);
        assert!(!roster.contains("stale"));
    }

    #[test]
    fn snapshot_is_sorted_by_name() {
        let mut roster = Roster::new();
        roster.apply(user("1", "Zoe", Status::Available, 0));
        roster.apply(user("2", "Ada", Status::Available, 0));
        roster.apply(user("3", "Mia", Status::Available, 0));
        let names: Vec<_> = roster.snapshot().into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["Ada", "Mia", "Zoe"]);
    }
}
