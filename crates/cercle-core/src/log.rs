//! The append-only, deduplicating, totally-ordered event log.

use std::collections::HashSet;

use cercle_shared::{event_order, Event, EventId, PeerId};

/// Per-group event log, kept sorted by `(timestamp, author)` at all times.
///
/// Insertion is idempotent on event id; two logs holding the same set of
/// events are identical sequences, which is what makes replicas converge.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
    ids: HashSet<EventId>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from stored events, restoring order and dropping any
    /// duplicates that crept into the blob.
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut log = Self::new();
        for event in events {
            log.insert(event);
        }
        log
    }

    /// Insert an event at its ordered position. Returns `false` (and
    /// changes nothing) when the id is already present.
    pub fn insert(&mut self, event: Event) -> bool {
        if !self.ids.insert(event.id) {
            return false;
        }
        let pos = self
            .events
            .partition_point(|e| event_order(e, &event) != std::cmp::Ordering::Greater);
        self.events.insert(pos, event);
        true
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.ids.contains(id)
    }

    /// Every local event whose id is not in `known`, in log order. This is
    /// the payload of a sync response.
    pub fn missing_relative_to(&self, known: &HashSet<EventId>) -> Vec<Event> {
        self.events
            .iter()
            .filter(|e| !known.contains(&e.id))
            .cloned()
            .collect()
    }

    /// All event ids, in log order. This is the payload of a sync request.
    pub fn ids(&self) -> Vec<EventId> {
        self.events.iter().map(|e| e.id).collect()
    }

    /// Remove every event authored by `author`, preserving the relative
    /// order of the rest. Returns how many were removed.
    pub fn remove_by_author(&mut self, author: &PeerId) -> usize {
        let before = self.events.len();
        self.events.retain(|e| {
            let keep = e.author != *author;
            if !keep {
                self.ids.remove(&e.id);
            }
            keep
        });
        before - self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ts: i64, author: PeerId, text: &str) -> Event {
        Event::message(EventId::new(), ts, author, text)
    }

    #[test]
    fn test_insert_keeps_timestamp_order() {
        let author = PeerId::new();
        let mut log = EventLog::new();
        log.insert(msg(300, author, "c"));
        log.insert(msg(100, author, "a"));
        log.insert(msg(200, author, "b"));

        let texts: Vec<_> = log.iter().filter_map(|e| e.message_text()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut log = EventLog::new();
        let event = msg(1, PeerId::new(), "once");
        assert!(log.insert(event.clone()));
        assert!(!log.insert(event.clone()));
        assert_eq!(log.len(), 1);
        assert!(log.contains(&event.id));
    }

    #[test]
    fn test_equal_timestamps_break_tie_on_author() {
        let mut authors = [PeerId::new(), PeerId::new()];
        authors.sort();

        // Insert the larger author first; it must still sort second.
        let mut log = EventLog::new();
        log.insert(msg(5000, authors[1], "second"));
        log.insert(msg(5000, authors[0], "first"));

        let order: Vec<_> = log.iter().map(|e| e.author).collect();
        assert_eq!(order, authors);
    }

    #[test]
    fn test_same_event_set_means_same_sequence() {
        let a = PeerId::new();
        let b = PeerId::new();
        let events = vec![
            msg(3, a, "x"),
            msg(1, b, "y"),
            msg(2, a, "z"),
            msg(1, a, "w"),
        ];

        let forward = EventLog::from_events(events.clone());
        let mut reversed = events;
        reversed.reverse();
        let backward = EventLog::from_events(reversed);

        assert_eq!(forward.events(), backward.events());
    }

    #[test]
    fn test_missing_relative_to() {
        let author = PeerId::new();
        let mut log = EventLog::new();
        let e1 = msg(1, author, "a");
        let e2 = msg(2, author, "b");
        let e3 = msg(3, author, "c");
        for e in [&e1, &e2, &e3] {
            log.insert(e.clone());
        }

        let known: HashSet<EventId> = [e2.id].into_iter().collect();
        let missing = log.missing_relative_to(&known);
        assert_eq!(missing, vec![e1, e3]);

        let all: HashSet<EventId> = log.ids().into_iter().collect();
        assert!(log.missing_relative_to(&all).is_empty());
    }

    #[test]
    fn test_remove_by_author_preserves_rest() {
        let keep = PeerId::new();
        let gone = PeerId::new();
        let mut log = EventLog::new();
        let k1 = msg(1, keep, "k1");
        let g1 = msg(2, gone, "g1");
        let k2 = msg(3, keep, "k2");
        let g2 = msg(4, gone, "g2");
        for e in [&k1, &g1, &k2, &g2] {
            log.insert(e.clone());
        }

        assert_eq!(log.remove_by_author(&gone), 2);
        assert_eq!(log.events(), &[k1.clone(), k2.clone()]);
        assert!(!log.contains(&g1.id));

        // Removing again is a no-op.
        assert_eq!(log.remove_by_author(&gone), 0);
    }

    #[test]
    fn test_from_events_dedups() {
        let event = msg(1, PeerId::new(), "dup");
        let log = EventLog::from_events(vec![event.clone(), event]);
        assert_eq!(log.len(), 1);
    }
}
