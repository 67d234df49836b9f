// Shared domain model: identifiers, replicated events, wire frames, invites.

pub mod constants;
pub mod event;
pub mod invite;
pub mod protocol;
pub mod types;

pub use event::{event_order, Event, EventKind, GroupCreatedPayload, MessageAddedPayload};
pub use invite::{InviteCode, InviteError};
pub use protocol::{Frame, FrameError};
pub use types::{EventId, GroupId, PeerId};
