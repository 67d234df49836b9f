//! Derived read models handed to the operator surface.

use serde::Serialize;

use cercle_shared::{EventKind, GroupId, PeerId};

use crate::group::Group;

/// A chat message as the UI renders it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// `"You"` for messages authored under this group's local peer id.
    pub author: String,
    pub text: String,
    pub timestamp: i64,
}

/// One group as the UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: GroupId,
    pub name: String,
    pub my_peer_id: PeerId,
    pub members: Vec<PeerId>,
    pub online: Vec<PeerId>,
    pub chat_messages: Vec<ChatMessage>,
}

/// Snapshot of the whole node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub groups: Vec<GroupView>,
    pub active_group_id: Option<GroupId>,
}

impl NodeSnapshot {
    pub fn group(&self, id: GroupId) -> Option<&GroupView> {
        self.groups.iter().find(|g| g.id == id)
    }
}

/// Map the log's `MESSAGE_ADDED` events to the chat view, in log order.
pub fn chat_messages(group: &Group) -> Vec<ChatMessage> {
    group
        .log()
        .iter()
        .filter(|e| e.kind == EventKind::MessageAdded)
        .map(|e| ChatMessage {
            id: e.id.to_string(),
            author: if e.author == group.my_peer_id {
                "You".to_string()
            } else {
                e.author.to_string()
            },
            text: e.message_text().unwrap_or_default(),
            timestamp: e.timestamp,
        })
        .collect()
}

/// Build the full view of one group, given who is currently online.
pub fn group_view(group: &Group, online: Vec<PeerId>) -> GroupView {
    GroupView {
        id: group.id,
        name: group.name.clone(),
        my_peer_id: group.my_peer_id,
        members: group.member_set().into_iter().collect(),
        online,
        chat_messages: chat_messages(group),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cercle_shared::{Event, EventId};

    #[test]
    fn test_own_messages_render_as_you() {
        let (mut group, _) = Group::create("demo", 1);
        group.append_message("mine", 10);
        let other = PeerId::new();
        group.merge_remote(vec![Event::message(EventId::new(), 20, other, "theirs")]);

        let chat = chat_messages(&group);
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[0].author, "You");
        assert_eq!(chat[0].text, "mine");
        assert_eq!(chat[1].author, other.to_string());
    }

    #[test]
    fn test_unknown_event_types_produce_no_chat() {
        let (mut group, _) = Group::create("demo", 1);
        group.merge_remote(vec![Event::new(
            EventId::new(),
            5,
            PeerId::new(),
            EventKind::Other("TASK_ADDED".to_string()),
            serde_json::json!({"title": "later"}),
        )]);

        assert!(chat_messages(&group).is_empty());
        // But the author still counts as a member.
        assert_eq!(group.member_set().len(), 2);
    }

    #[test]
    fn test_group_view_members_sorted() {
        let (mut group, _) = Group::create("demo", 1);
        for i in 0..4 {
            group.merge_remote(vec![Event::message(EventId::new(), i, PeerId::new(), "x")]);
        }
        let view = group_view(&group, vec![]);
        let mut sorted = view.members.clone();
        sorted.sort();
        assert_eq!(view.members, sorted);
        assert_eq!(view.members.len(), 5);
    }
}
