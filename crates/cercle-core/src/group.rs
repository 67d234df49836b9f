//! The group replica: one log plus the state derived from it.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info};

use cercle_shared::constants::JOINING_PLACEHOLDER;
use cercle_shared::{Event, EventId, EventKind, GroupId, PeerId};
use cercle_store::PersistedGroup;

use crate::log::EventLog;

/// One replica of a group: identity, local peer id and the event log.
///
/// Everything else (members, name, chat history) is derived from the log,
/// so merging events is the only way remote activity changes a replica.
#[derive(Debug)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub my_peer_id: PeerId,
    log: EventLog,
}

impl Group {
    /// Create a brand-new group: fresh ids and the genesis event already in
    /// the log. Returns the genesis event for broadcast (there is nobody to
    /// receive it yet, but the caller treats all appends uniformly).
    pub fn create(name: &str, now: i64) -> (Self, Event) {
        let my_peer_id = PeerId::new();
        let genesis = Event::group_created(EventId::new(), now, my_peer_id, name);
        let mut log = EventLog::new();
        log.insert(genesis.clone());

        let group = Self {
            id: GroupId::new(),
            name: name.to_string(),
            my_peer_id,
            log,
        };
        info!(group = %group.id, peer = %my_peer_id, name = %name, "group created");
        (group, genesis)
    }

    /// Join an existing group known only by id: fresh local peer id, empty
    /// log, placeholder name until the genesis event arrives via sync.
    pub fn join(id: GroupId) -> Self {
        let my_peer_id = PeerId::new();
        info!(group = %id, peer = %my_peer_id, "joining group");
        Self {
            id,
            name: JOINING_PLACEHOLDER.to_string(),
            my_peer_id,
            log: EventLog::new(),
        }
    }

    pub fn from_persisted(persisted: PersistedGroup) -> Self {
        Self {
            id: persisted.id,
            name: persisted.name,
            my_peer_id: persisted.my_peer_id,
            log: EventLog::from_events(persisted.events),
        }
    }

    pub fn to_persisted(&self) -> PersistedGroup {
        PersistedGroup {
            id: self.id,
            name: self.name.clone(),
            my_peer_id: self.my_peer_id,
            events: self.log.events().to_vec(),
        }
    }

    /// Author a new event locally and insert it. The returned event is what
    /// the caller broadcasts.
    pub fn append_local(&mut self, kind: EventKind, payload: Value, now: i64) -> Event {
        let event = Event::new(EventId::new(), now, self.my_peer_id, kind, payload);
        self.log.insert(event.clone());
        event
    }

    /// Author a chat message.
    pub fn append_message(&mut self, text: &str, now: i64) -> Event {
        let event = Event::message(EventId::new(), now, self.my_peer_id, text);
        self.log.insert(event.clone());
        event
    }

    /// Author the best-effort goodbye event.
    pub fn append_member_left(&mut self, now: i64) -> Event {
        let event = Event::member_left(EventId::new(), now, self.my_peer_id);
        self.log.insert(event.clone());
        event
    }

    /// Merge remote events idempotently; returns the subset that was new.
    /// The first incoming genesis event resolves the placeholder name.
    pub fn merge_remote(&mut self, events: Vec<Event>) -> Vec<Event> {
        let mut fresh = Vec::new();
        for event in events {
            if self.log.insert(event.clone()) {
                if let Some(name) = event.group_name() {
                    if self.name != name {
                        debug!(group = %self.id, name = %name, "group name adopted from log");
                        self.name = name;
                    }
                }
                fresh.push(event);
            }
        }
        fresh
    }

    /// Purge every event authored by `peer` from the local log. Not
    /// broadcast, not remembered: a later sync with a peer that still holds
    /// those events will re-deliver them.
    pub fn forget(&mut self, peer: &PeerId) -> usize {
        let removed = self.log.remove_by_author(peer);
        if removed > 0 {
            info!(group = %self.id, peer = %peer, removed, "forgot member locally");
        }
        removed
    }

    /// Current membership: the distinct authors present in the log.
    pub fn member_set(&self) -> BTreeSet<PeerId> {
        self.log.iter().map(|e| e.author).collect()
    }

    /// The name recorded in the genesis event, if present.
    pub fn name_from_log(&self) -> Option<String> {
        self.log
            .iter()
            .find(|e| e.kind == EventKind::GroupCreated)
            .and_then(|e| e.group_name())
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_seeds_genesis() {
        let (group, genesis) = Group::create("demo", 1_000);
        assert_eq!(group.name, "demo");
        assert_eq!(group.log().len(), 1);
        assert_eq!(genesis.author, group.my_peer_id);
        assert_eq!(genesis.group_name().as_deref(), Some("demo"));
        assert_eq!(group.name_from_log().as_deref(), Some("demo"));
    }

    #[test]
    fn test_join_starts_with_placeholder() {
        let group = Group::join(GroupId::new());
        assert_eq!(group.name, JOINING_PLACEHOLDER);
        assert!(group.log().is_empty());
        assert!(group.member_set().is_empty());
    }

    #[test]
    fn test_merge_adopts_name_once_genesis_arrives() {
        let (creator, genesis) = Group::create("demo", 5);
        let mut joiner = Group::join(creator.id);

        let fresh = joiner.merge_remote(vec![genesis.clone()]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(joiner.name, "demo");

        // Re-merging is a no-op.
        assert!(joiner.merge_remote(vec![genesis]).is_empty());
        assert_eq!(joiner.log().len(), 1);
    }

    #[test]
    fn test_membership_is_derived_from_authors() {
        let (mut group, genesis) = Group::create("demo", 1);
        let other = PeerId::new();
        group.merge_remote(vec![Event::message(EventId::new(), 2, other, "hi")]);

        let members = group.member_set();
        assert!(members.contains(&genesis.author));
        assert!(members.contains(&other));
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_forget_removes_only_that_author() {
        let (mut group, _genesis) = Group::create("demo", 1);
        let b = PeerId::new();
        let c = PeerId::new();
        group.merge_remote(vec![
            Event::message(EventId::new(), 2, b, "from b"),
            Event::message(EventId::new(), 3, c, "from c"),
            Event::message(EventId::new(), 4, b, "b again"),
        ]);

        assert_eq!(group.forget(&b), 2);
        assert!(!group.member_set().contains(&b));
        assert!(group.member_set().contains(&c));
        assert_eq!(group.log().len(), 2);

        // Forgotten events come back if a peer re-delivers them.
        let again = Event::message(EventId::new(), 5, b, "replayed");
        assert_eq!(group.merge_remote(vec![again]).len(), 1);
        assert!(group.member_set().contains(&b));
    }

    #[test]
    fn test_append_message_is_authored_locally() {
        let (mut group, _) = Group::create("demo", 1);
        let event = group.append_message("hello", 100);
        assert_eq!(event.author, group.my_peer_id);
        assert_eq!(event.message_text().as_deref(), Some("hello"));
        assert_eq!(group.log().len(), 2);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let (mut group, _) = Group::create("demo", 1);
        group.append_message("hello", 2);

        let restored = Group::from_persisted(group.to_persisted());
        assert_eq!(restored.id, group.id);
        assert_eq!(restored.my_peer_id, group.my_peer_id);
        assert_eq!(restored.log().events(), group.log().events());
    }
}
