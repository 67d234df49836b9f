//! Invite codes: the out-of-band bootstrap into a group.
//!
//! An invite is the JSON string `{"groupId": ..., "peerId": ...}` shared by
//! copy-paste or rendered as a QR code. The peer id is the inviter's id
//! within that group; the joiner dials it to run the first sync.

use serde::{Deserialize, Serialize};

use crate::types::{GroupId, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteCode {
    pub group_id: GroupId,
    pub peer_id: PeerId,
}

impl InviteCode {
    pub fn new(group_id: GroupId, peer_id: PeerId) -> Self {
        Self { group_id, peer_id }
    }

    /// Encode as the shareable JSON string.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("invite serialization")
    }

    /// Decode a shared string back into an invite.
    ///
    /// Leading/trailing whitespace is tolerated, as are unknown fields.
    pub fn decode(code: &str) -> Result<Self, InviteError> {
        serde_json::from_str(code.trim()).map_err(|_| InviteError::InvalidFormat)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("Invalid invite format")]
    InvalidFormat,
}
