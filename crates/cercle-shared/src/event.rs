//! The replicated event record and its deterministic ordering.
//!
//! Events are the atomic unit of replicated state. Every group member holds
//! the same set of events sorted by [`event_order`]; the comparator is the
//! single total-order rule of the whole system and must behave identically
//! on every node.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{EventId, PeerId};

/// Wire name of the genesis event carried by every non-empty group.
pub const KIND_GROUP_CREATED: &str = "GROUP_CREATED";

/// Wire name of a chat message event.
pub const KIND_MESSAGE_ADDED: &str = "MESSAGE_ADDED";

/// Wire name of the best-effort goodbye emitted by a leaving member.
pub const KIND_MEMBER_LEFT: &str = "MEMBER_LEFT";

/// Discriminator of an event.
///
/// Unknown wire strings deserialize to [`EventKind::Other`] so that events
/// produced by newer nodes still merge into the log; they simply derive no
/// local state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    GroupCreated,
    MessageAdded,
    MemberLeft,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::GroupCreated => KIND_GROUP_CREATED,
            EventKind::MessageAdded => KIND_MESSAGE_ADDED,
            EventKind::MemberLeft => KIND_MEMBER_LEFT,
            EventKind::Other(s) => s,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            KIND_GROUP_CREATED => EventKind::GroupCreated,
            KIND_MESSAGE_ADDED => EventKind::MessageAdded,
            KIND_MEMBER_LEFT => EventKind::MemberLeft,
            _ => EventKind::Other(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Payload of a `GROUP_CREATED` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCreatedPayload {
    pub name: String,
}

/// Payload of a `MESSAGE_ADDED` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAddedPayload {
    pub text: String,
}

/// An immutable record of a user-level action, replicated to all members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: i64,
    #[serde(rename = "authorPeerId")]
    pub author: PeerId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Event {
    pub fn new(id: EventId, timestamp: i64, author: PeerId, kind: EventKind, payload: Value) -> Self {
        Self {
            id,
            timestamp,
            author,
            kind,
            payload,
        }
    }

    pub fn group_created(id: EventId, timestamp: i64, author: PeerId, name: &str) -> Self {
        Self::new(
            id,
            timestamp,
            author,
            EventKind::GroupCreated,
            serde_json::json!({ "name": name }),
        )
    }

    pub fn message(id: EventId, timestamp: i64, author: PeerId, text: &str) -> Self {
        Self::new(
            id,
            timestamp,
            author,
            EventKind::MessageAdded,
            serde_json::json!({ "text": text }),
        )
    }

    pub fn member_left(id: EventId, timestamp: i64, author: PeerId) -> Self {
        Self::new(id, timestamp, author, EventKind::MemberLeft, Value::Null)
    }

    /// The group name carried by a `GROUP_CREATED` event.
    pub fn group_name(&self) -> Option<String> {
        if self.kind != EventKind::GroupCreated {
            return None;
        }
        serde_json::from_value::<GroupCreatedPayload>(self.payload.clone())
            .ok()
            .map(|p| p.name)
    }

    /// The text carried by a `MESSAGE_ADDED` event.
    pub fn message_text(&self) -> Option<String> {
        if self.kind != EventKind::MessageAdded {
            return None;
        }
        serde_json::from_value::<MessageAddedPayload>(self.payload.clone())
            .ok()
            .map(|p| p.text)
    }

    pub fn sort_key(&self) -> (i64, PeerId) {
        (self.timestamp, self.author)
    }
}

/// The sole total-order rule of the system: timestamp ascending, then
/// author peer id ascending. Not causal; merely deterministic.
pub fn event_order(a: &Event, b: &Event) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then_with(|| a.author.cmp(&b.author))
}
