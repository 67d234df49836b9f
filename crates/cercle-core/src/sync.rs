//! The wire state machine: anti-entropy handshake, broadcast, heartbeat.
//!
//! Handlers are pure with respect to the transport: they mutate the group
//! replica and return what the caller should send and whom it should dial.
//! The node loop owns delivery, stamping and persistence.

use std::collections::HashSet;

use tracing::debug;

use cercle_shared::{Event, EventId, Frame, PeerId};

use crate::group::Group;

/// What handling one frame produced.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    /// Events that were new to the local log, in arrival order.
    pub merged: Vec<Event>,
    /// Members discovered by this merge, to be dialed.
    pub newcomers: Vec<PeerId>,
    /// Frame to send back on the same session, if any.
    pub reply: Option<Frame>,
}

/// The greeting both ends send on a freshly opened session: every event id
/// we hold. Each side answers the other's request independently.
pub fn open_handshake(group: &Group) -> Frame {
    Frame::SyncRequest {
        event_ids: group.log().ids(),
    }
}

pub fn handle_frame(group: &mut Group, frame: Frame, from: PeerId) -> SyncOutcome {
    match frame {
        Frame::SyncRequest { event_ids } => {
            let known: HashSet<EventId> = event_ids.into_iter().collect();
            let missing = group.log().missing_relative_to(&known);
            debug!(
                group = %group.id,
                peer = %from,
                theirs = known.len(),
                missing = missing.len(),
                "sync request"
            );
            SyncOutcome {
                // An empty answer is not sent: silence means up-to-date.
                reply: (!missing.is_empty()).then_some(Frame::SyncResponse {
                    missing_events: missing,
                }),
                ..SyncOutcome::default()
            }
        }

        Frame::SyncResponse { missing_events } => {
            let before = group.member_set();
            let merged = group.merge_remote(missing_events);
            let me = group.my_peer_id;
            let newcomers: Vec<PeerId> = group
                .member_set()
                .into_iter()
                .filter(|p| *p != me && *p != from && !before.contains(p))
                .collect();
            debug!(
                group = %group.id,
                peer = %from,
                merged = merged.len(),
                newcomers = newcomers.len(),
                "sync response applied"
            );
            SyncOutcome {
                merged,
                newcomers,
                reply: None,
            }
        }

        Frame::EventBroadcast { event } => {
            // Merge only; re-forwarding would flood the mesh, since the
            // author already pushed to every peer it can reach.
            let merged = group.merge_remote(vec![event]);
            SyncOutcome {
                merged,
                ..SyncOutcome::default()
            }
        }

        Frame::Ping => SyncOutcome {
            reply: Some(Frame::Pong),
            ..SyncOutcome::default()
        },

        Frame::Pong => SyncOutcome::default(),
    }
}
