//! Wire frames exchanged between peer sessions.
//!
//! All frames are UTF-8 JSON objects `{"type": ..., "payload": ...}`; the
//! payload key is omitted for the heartbeat frames.

use serde::{Deserialize, Serialize};

use crate::event::Event;
use crate::types::EventId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    /// Opening half of the anti-entropy handshake: every event id the
    /// sender holds. Sent by both ends of a freshly opened session.
    #[serde(rename_all = "camelCase")]
    SyncRequest { event_ids: Vec<EventId> },

    /// Answer to a sync request: every local event the requester lacked.
    /// Never sent empty; silence means "you are up-to-date".
    #[serde(rename_all = "camelCase")]
    SyncResponse { missing_events: Vec<Event> },

    /// A freshly authored event, pushed to every open session once.
    /// Receivers merge and do not re-forward.
    EventBroadcast { event: Event },

    Ping,
    Pong,
}

impl Frame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        serde_json::to_vec(self).map_err(FrameError::Encode)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        serde_json::from_slice(data).map_err(FrameError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Frame encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Frame decode error: {0}")]
    Decode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PeerId;

    #[test]
    fn test_frame_roundtrip() {
        let frames = vec![
            Frame::SyncRequest {
                event_ids: vec![EventId::new(), EventId::new()],
            },
            Frame::SyncResponse {
                missing_events: vec![Event::message(EventId::new(), 7, PeerId::new(), "hi")],
            },
            Frame::EventBroadcast {
                event: Event::group_created(EventId::new(), 1, PeerId::new(), "demo"),
            },
            Frame::Ping,
            Frame::Pong,
        ];

        for frame in frames {
            let bytes = frame.to_bytes().unwrap();
            let restored = Frame::from_bytes(&bytes).unwrap();
            assert_eq!(restored, frame);
        }
    }

    #[test]
    fn test_wire_names() {
        let frame = Frame::SyncRequest {
            event_ids: vec![EventId::new()],
        };
        let json: serde_json::Value = serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "SYNC_REQUEST");
        assert!(json["payload"]["eventIds"].is_array());

        let frame = Frame::SyncResponse {
            missing_events: vec![],
        };
        let json: serde_json::Value = serde_json::from_slice(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "SYNC_RESPONSE");
        assert!(json["payload"]["missingEvents"].is_array());
    }

    #[test]
    fn test_ping_omits_payload() {
        let json: serde_json::Value =
            serde_json::from_slice(&Frame::Ping.to_bytes().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "PING" }));
    }

    #[test]
    fn test_malformed_frame_is_error() {
        assert!(Frame::from_bytes(b"not json").is_err());
        assert!(Frame::from_bytes(br#"{"type":"NO_SUCH_FRAME"}"#).is_err());
    }
}
