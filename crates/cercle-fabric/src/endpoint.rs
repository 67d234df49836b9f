//! The consumed fabric contract.
//!
//! An endpoint is one registration of a peer id on the signaling layer; a
//! session is one reliable bidirectional byte stream between two endpoints.
//! All endpoint and session activity is delivered on a single event channel
//! per endpoint, so a consumer can drive many endpoints from one task.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use cercle_shared::PeerId;

use crate::error::Result;

/// Process-unique identifier of one session half.
///
/// When both sides of a pair dial each other simultaneously, two distinct
/// sessions to the same remote peer exist until one is closed; the session
/// id is what tells them apart.
pub type SessionId = u64;

/// A STUN/TURN server entry handed to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Configuration for creating an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    pub ice_servers: Vec<IceServer>,
    pub debug_level: u8,
}

/// Everything an endpoint reports, in delivery order.
#[derive(Debug)]
pub enum EndpointEvent {
    /// The endpoint is registered on the fabric and may dial.
    Ready,
    /// A remote peer opened a session to us.
    Incoming(SessionHandle),
    /// A session (either direction) finished opening.
    SessionOpened { session: SessionId },
    /// A frame arrived on an open session. FIFO per session.
    SessionData { session: SessionId, data: Vec<u8> },
    /// A session closed; terminal for that session.
    SessionClosed { session: SessionId },
    /// A session failed; terminal for that session.
    SessionError { session: SessionId, message: String },
    /// The signaling layer lost the registration; sessions are dead.
    Disconnected,
    /// Endpoint-level failure.
    Error(String),
    /// The endpoint was destroyed.
    Closed,
}

/// Transport half of a session, provided by the fabric implementation.
pub trait SessionTransport: Send + Sync {
    fn send(&self, data: Vec<u8>) -> Result<()>;
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// A handle to one reliable byte stream to one remote peer.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    peer: PeerId,
    transport: Arc<dyn SessionTransport>,
}

impl SessionHandle {
    pub fn new(id: SessionId, peer: PeerId, transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            id,
            peer,
            transport,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The remote peer this session is connected to.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn send(&self, data: Vec<u8>) -> Result<()> {
        self.transport.send(data)
    }

    pub fn close(&self) {
        self.transport.close();
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Transport half of an endpoint, provided by the fabric implementation.
pub trait EndpointTransport: Send + Sync {
    fn connect(&self, remote: PeerId) -> Result<SessionHandle>;
    fn destroy(&self);
    fn is_destroyed(&self) -> bool;
}

/// A handle to one registered endpoint.
#[derive(Clone)]
pub struct EndpointHandle {
    peer: PeerId,
    transport: Arc<dyn EndpointTransport>,
}

impl EndpointHandle {
    pub fn new(peer: PeerId, transport: Arc<dyn EndpointTransport>) -> Self {
        Self { peer, transport }
    }

    /// The local peer id this endpoint is registered under.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Dial a remote peer. The returned session is not yet open; wait for
    /// `SessionOpened` (or abandon the dial after a timeout).
    pub fn connect(&self, remote: PeerId) -> Result<SessionHandle> {
        self.transport.connect(remote)
    }

    /// Tear the endpoint down. Idempotent.
    pub fn destroy(&self) {
        self.transport.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.transport.is_destroyed()
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("peer", &self.peer)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

/// A transport capable of registering endpoints.
pub trait Fabric: Send + Sync {
    /// Register `peer_id` and return the endpoint handle plus its event
    /// stream. A `Ready` event is delivered once the registration is live.
    fn create_endpoint(
        &self,
        peer_id: PeerId,
        config: &EndpointConfig,
    ) -> Result<(EndpointHandle, mpsc::UnboundedReceiver<EndpointEvent>)>;
}
