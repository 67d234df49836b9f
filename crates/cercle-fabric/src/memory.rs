//! In-process fabric: endpoints in one process wired together over channels.
//!
//! Sessions between two registered endpoints open instantly; dials to an
//! unregistered peer stay pending forever, which is exactly what a dial to
//! an offline peer looks like to the consumer. `set_link` and
//! `kill_endpoint` inject the partition and signaling-loss faults the
//! connection manager has to survive.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use cercle_shared::constants::MAX_FRAME_SIZE;
use cercle_shared::PeerId;

use crate::endpoint::{
    EndpointConfig, EndpointEvent, EndpointHandle, EndpointTransport, Fabric, SessionHandle,
    SessionId, SessionTransport,
};
use crate::error::{FabricError, Result};

#[derive(Default)]
pub struct MemoryFabric {
    hub: Arc<Mutex<Hub>>,
    next_session: Arc<AtomicU64>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<PeerId, Slot>,
    down_links: HashSet<(PeerId, PeerId)>,
}

struct Slot {
    events: mpsc::UnboundedSender<EndpointEvent>,
    sessions: Vec<Arc<Pair>>,
}

/// One live session: two halves sharing an open flag.
struct Pair {
    open: AtomicBool,
    initiator: Half,
    acceptor: Half,
}

struct Half {
    session: SessionId,
    peer: PeerId,
    events: mpsc::UnboundedSender<EndpointEvent>,
}

impl Pair {
    fn involves(&self, peer: PeerId) -> bool {
        self.initiator.peer == peer || self.acceptor.peer == peer
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.initiator.events.send(EndpointEvent::SessionClosed {
                session: self.initiator.session,
            });
            let _ = self.acceptor.events.send(EndpointEvent::SessionClosed {
                session: self.acceptor.session,
            });
        }
    }
}

fn link_key(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl MemoryFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sever or restore connectivity between two peers. Severing closes any
    /// live sessions between them and makes new dials hang until restored.
    pub fn set_link(&self, a: PeerId, b: PeerId, up: bool) {
        let mut hub = self.hub.lock().expect("fabric hub lock");
        let key = link_key(a, b);
        if up {
            hub.down_links.remove(&key);
            debug!(a = %a, b = %b, "link restored");
            return;
        }
        hub.down_links.insert(key);
        debug!(a = %a, b = %b, "link severed");
        if let Some(slot) = hub.endpoints.get(&a) {
            for pair in slot.sessions.iter().filter(|p| p.involves(b)) {
                pair.close();
            }
        }
        if let Some(slot) = hub.endpoints.get(&b) {
            for pair in slot.sessions.iter().filter(|p| p.involves(a)) {
                pair.close();
            }
        }
    }

    /// Simulate loss of the signaling registration for `peer`: its sessions
    /// close and its endpoint reports `Disconnected`. The id becomes free
    /// again, so a later `create_endpoint` for the same peer succeeds.
    pub fn kill_endpoint(&self, peer: PeerId) {
        let mut hub = self.hub.lock().expect("fabric hub lock");
        if let Some(slot) = hub.endpoints.remove(&peer) {
            for pair in &slot.sessions {
                pair.close();
            }
            let _ = slot.events.send(EndpointEvent::Disconnected);
            debug!(peer = %peer, "endpoint killed");
        }
    }

    /// Whether `peer` currently has a live registration.
    pub fn is_registered(&self, peer: PeerId) -> bool {
        self.hub
            .lock()
            .expect("fabric hub lock")
            .endpoints
            .contains_key(&peer)
    }
}

impl Fabric for MemoryFabric {
    fn create_endpoint(
        &self,
        peer_id: PeerId,
        config: &EndpointConfig,
    ) -> Result<(EndpointHandle, mpsc::UnboundedReceiver<EndpointEvent>)> {
        let mut hub = self.hub.lock().expect("fabric hub lock");
        if hub.endpoints.contains_key(&peer_id) {
            return Err(FabricError::IdTaken(peer_id));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(EndpointEvent::Ready);
        hub.endpoints.insert(
            peer_id,
            Slot {
                events: tx,
                sessions: Vec::new(),
            },
        );
        debug!(
            peer = %peer_id,
            ice_servers = config.ice_servers.len(),
            debug_level = config.debug_level,
            "endpoint registered"
        );

        let transport = Arc::new(MemoryEndpoint {
            peer: peer_id,
            hub: Arc::clone(&self.hub),
            next_session: Arc::clone(&self.next_session),
            destroyed: AtomicBool::new(false),
        });
        Ok((EndpointHandle::new(peer_id, transport), rx))
    }
}

struct MemoryEndpoint {
    peer: PeerId,
    hub: Arc<Mutex<Hub>>,
    next_session: Arc<AtomicU64>,
    destroyed: AtomicBool,
}

impl MemoryEndpoint {
    fn alloc_session(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

impl EndpointTransport for MemoryEndpoint {
    fn connect(&self, remote: PeerId) -> Result<SessionHandle> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(FabricError::EndpointDestroyed);
        }

        let mut hub = self.hub.lock().expect("fabric hub lock");
        let local_session = self.alloc_session();

        let reachable = remote != self.peer
            && hub.endpoints.contains_key(&remote)
            && hub.endpoints.contains_key(&self.peer)
            && !hub.down_links.contains(&link_key(self.peer, remote));
        if !reachable {
            // Dial never completes; the caller's dial timeout reclaims it.
            debug!(local = %self.peer, remote = %remote, "dial pending (peer unreachable)");
            return Ok(SessionHandle::new(
                local_session,
                remote,
                Arc::new(DeadSession),
            ));
        }

        let remote_session = self.alloc_session();
        let local_events = hub.endpoints[&self.peer].events.clone();
        let remote_events = hub.endpoints[&remote].events.clone();

        let pair = Arc::new(Pair {
            open: AtomicBool::new(true),
            initiator: Half {
                session: local_session,
                peer: self.peer,
                events: local_events.clone(),
            },
            acceptor: Half {
                session: remote_session,
                peer: remote,
                events: remote_events.clone(),
            },
        });

        for slot_peer in [self.peer, remote] {
            let slot = hub.endpoints.get_mut(&slot_peer).expect("slot just checked");
            slot.sessions.retain(|p| p.open.load(Ordering::SeqCst));
            slot.sessions.push(Arc::clone(&pair));
        }

        let local_handle = SessionHandle::new(
            local_session,
            remote,
            Arc::new(MemorySession {
                pair: Arc::clone(&pair),
                is_initiator: true,
            }),
        );
        let remote_handle = SessionHandle::new(
            remote_session,
            self.peer,
            Arc::new(MemorySession {
                pair: Arc::clone(&pair),
                is_initiator: false,
            }),
        );

        let _ = remote_events.send(EndpointEvent::Incoming(remote_handle));
        let _ = remote_events.send(EndpointEvent::SessionOpened {
            session: remote_session,
        });
        let _ = local_events.send(EndpointEvent::SessionOpened {
            session: local_session,
        });
        debug!(local = %self.peer, remote = %remote, session = local_session, "dial connected");

        Ok(local_handle)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut hub = self.hub.lock().expect("fabric hub lock");
        if let Some(slot) = hub.endpoints.remove(&self.peer) {
            for pair in &slot.sessions {
                pair.close();
            }
            let _ = slot.events.send(EndpointEvent::Closed);
            debug!(peer = %self.peer, "endpoint destroyed");
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

struct MemorySession {
    pair: Arc<Pair>,
    is_initiator: bool,
}

impl MemorySession {
    fn remote_half(&self) -> &Half {
        if self.is_initiator {
            &self.pair.acceptor
        } else {
            &self.pair.initiator
        }
    }
}

impl SessionTransport for MemorySession {
    fn send(&self, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(FabricError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        if !self.pair.open.load(Ordering::SeqCst) {
            return Err(FabricError::NotOpen);
        }
        let remote = self.remote_half();
        remote
            .events
            .send(EndpointEvent::SessionData {
                session: remote.session,
                data,
            })
            .map_err(|_| FabricError::NotOpen)
    }

    fn close(&self) {
        self.pair.close();
    }

    fn is_open(&self) -> bool {
        self.pair.open.load(Ordering::SeqCst)
    }
}

/// Session half handed out for a dial that can never complete.
struct DeadSession;

impl SessionTransport for DeadSession {
    fn send(&self, _data: Vec<u8>) -> Result<()> {
        Err(FabricError::NotOpen)
    }

    fn close(&self) {}

    fn is_open(&self) -> bool {
        false
    }
}
