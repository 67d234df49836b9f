//! One live peer session and its lifecycle.

use tracing::{debug, warn};

use cercle_fabric::{SessionHandle, SessionId};
use cercle_shared::{Frame, PeerId};

/// Lifecycle of a session. `Closed` is terminal; a session never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirection {
    /// We dialed the remote peer.
    Outbound,
    /// The remote peer dialed us.
    Inbound,
}

/// A fabric session plus the bookkeeping the connection manager needs.
#[derive(Debug)]
pub struct PeerSession {
    handle: SessionHandle,
    state: SessionState,
    direction: SessionDirection,
    /// When the session entered `Connecting`; ages unanswered dials.
    since: i64,
}

impl PeerSession {
    pub fn outbound(handle: SessionHandle, now: i64) -> Self {
        Self {
            handle,
            state: SessionState::Connecting,
            direction: SessionDirection::Outbound,
            since: now,
        }
    }

    pub fn inbound(handle: SessionHandle, now: i64) -> Self {
        Self {
            handle,
            state: SessionState::Connecting,
            direction: SessionDirection::Inbound,
            since: now,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    pub fn peer(&self) -> PeerId {
        self.handle.peer()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn direction(&self) -> SessionDirection {
        self.direction
    }

    pub fn since(&self) -> i64 {
        self.since
    }

    /// Transition to `Open`. Returns `false` when the session was already
    /// closed (a late open on a torn-down session stays dead).
    pub fn mark_open(&mut self) -> bool {
        match self.state {
            SessionState::Connecting => {
                self.state = SessionState::Open;
                true
            }
            SessionState::Open => true,
            SessionState::Closed => false,
        }
    }

    /// Close the underlying stream and enter the terminal state.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.handle.close();
            self.state = SessionState::Closed;
        }
    }

    /// Serialize and send a frame. Silently dropped unless `Open`; the sync
    /// protocol repairs any gap on the next session anyway.
    pub fn send(&self, frame: &Frame) -> bool {
        if self.state != SessionState::Open {
            debug!(peer = %self.peer(), state = ?self.state, "dropping frame on non-open session");
            return false;
        }
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(peer = %self.peer(), error = %e, "frame serialization failed");
                return false;
            }
        };
        if let Err(e) = self.handle.send(bytes) {
            debug!(peer = %self.peer(), error = %e, "session send failed");
            return false;
        }
        true
    }
}
