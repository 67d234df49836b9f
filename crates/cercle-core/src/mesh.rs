//! The per-group connection manager.
//!
//! Keeps a full mesh of sessions to the group's members: dials anyone
//! missing, detects dead sessions by aging `last_heard_from` stamps against
//! a single supervisor tick, and resolves the duplicate sessions produced
//! by simultaneous dials. There are no per-peer timers; every timeout is a
//! comparison against a stamped timestamp.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use cercle_fabric::{EndpointHandle, SessionHandle, SessionId};
use cercle_shared::{Frame, PeerId};

use crate::config::NodeConfig;
use crate::session::{PeerSession, SessionDirection, SessionState};

/// Result of opening a session, after duplicate resolution.
#[derive(Debug, Clone, Copy)]
pub struct Opened {
    pub session: SessionId,
    pub peer: PeerId,
    /// True when this peer had no open session before.
    pub newly_online: bool,
}

/// What one supervisor sweep did, for logging and notifications.
#[derive(Debug, Default)]
pub struct TickReport {
    pub pinged: Vec<PeerId>,
    pub closed: Vec<PeerId>,
    pub abandoned: Vec<PeerId>,
    pub dialed: Vec<PeerId>,
}

pub struct Mesh {
    my_peer_id: PeerId,
    endpoint: Option<EndpointHandle>,
    ready: bool,
    sessions: HashMap<SessionId, PeerSession>,
    /// In-flight outbound dial per remote peer: single-flight guard.
    is_connecting: HashMap<PeerId, SessionId>,
    last_heard_from: HashMap<PeerId, i64>,
    ping_idle_ms: i64,
    session_timeout_ms: i64,
    dial_timeout_ms: i64,
}

impl Mesh {
    pub fn new(my_peer_id: PeerId, config: &NodeConfig) -> Self {
        Self {
            my_peer_id,
            endpoint: None,
            ready: false,
            sessions: HashMap::new(),
            is_connecting: HashMap::new(),
            last_heard_from: HashMap::new(),
            ping_idle_ms: config.ping_idle_ms,
            session_timeout_ms: config.session_timeout_ms,
            dial_timeout_ms: config.dial_timeout_ms,
        }
    }

    pub fn set_endpoint(&mut self, endpoint: EndpointHandle) {
        self.endpoint = Some(endpoint);
        self.ready = false;
    }

    pub fn has_endpoint(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Tear everything down: endpoint, sessions, stamps. Called on fabric
    /// failure and on group teardown; the supervisor recreates the endpoint
    /// on its next sweep if the group still exists.
    pub fn reset(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            endpoint.destroy();
        }
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
        self.is_connecting.clear();
        self.last_heard_from.clear();
        self.ready = false;
    }

    fn open_session_to(&self, peer: PeerId) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| s.peer() == peer && s.state() == SessionState::Open)
            .map(|s| s.id())
    }

    /// Dial `peer` unless a session is already open or in flight.
    pub fn ensure_dial(&mut self, peer: PeerId, now: i64) -> bool {
        if peer == self.my_peer_id {
            return false;
        }
        if self.open_session_to(peer).is_some() || self.is_connecting.contains_key(&peer) {
            return false;
        }
        let Some(endpoint) = &self.endpoint else {
            return false;
        };
        if !self.ready {
            return false;
        }

        match endpoint.connect(peer) {
            Ok(handle) => {
                let session = handle.id();
                debug!(peer = %peer, session, "dialing");
                self.sessions.insert(session, PeerSession::outbound(handle, now));
                self.is_connecting.insert(peer, session);
                true
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "dial failed");
                false
            }
        }
    }

    /// Dial every wanted peer that is neither open nor connecting.
    pub fn dial_missing(&mut self, peers: &BTreeSet<PeerId>, now: i64) -> Vec<PeerId> {
        let mut dialed = Vec::new();
        for peer in peers {
            if self.ensure_dial(*peer, now) {
                dialed.push(*peer);
            }
        }
        dialed
    }

    /// Track an incoming session; it opens via `on_session_opened`.
    pub fn on_incoming(&mut self, handle: SessionHandle, now: i64) {
        debug!(peer = %handle.peer(), session = handle.id(), "incoming session");
        self.sessions
            .insert(handle.id(), PeerSession::inbound(handle, now));
    }

    /// A session finished opening. Returns the surviving session to greet
    /// with a sync handshake, or `None` when the session was already dead
    /// or lost the duplicate tie-break.
    pub fn on_session_opened(&mut self, session: SessionId, now: i64) -> Option<Opened> {
        let peer = {
            let entry = self.sessions.get_mut(&session)?;
            if !entry.mark_open() {
                return None;
            }
            entry.peer()
        };
        let was_online = self
            .sessions
            .values()
            .any(|s| s.peer() == peer && s.state() == SessionState::Open && s.id() != session);

        if self.is_connecting.get(&peer) == Some(&session) {
            self.is_connecting.remove(&peer);
        }
        self.last_heard_from.entry(peer).or_insert(now);

        self.resolve_duplicates(peer);
        if self.sessions.get(&session).map(|s| s.state()) != Some(SessionState::Open) {
            // This session lost the tie-break; the peer stays connected
            // through the survivor.
            return None;
        }

        info!(peer = %peer, session, "session open");
        Some(Opened {
            session,
            peer,
            newly_online: !was_online,
        })
    }

    /// When both sides dial each other, two open sessions to the same peer
    /// exist for a moment. Both ends deterministically keep the one that
    /// was initiated by the larger peer id and close the other.
    fn resolve_duplicates(&mut self, peer: PeerId) {
        let open: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.peer() == peer && s.state() == SessionState::Open)
            .map(|s| s.id())
            .collect();
        if open.len() <= 1 {
            return;
        }

        let keep_direction = if self.my_peer_id > peer {
            SessionDirection::Outbound
        } else {
            SessionDirection::Inbound
        };
        let winner = open
            .iter()
            .copied()
            .find(|id| self.sessions[id].direction() == keep_direction)
            .unwrap_or(open[0]);

        for id in open {
            if id == winner {
                continue;
            }
            if let Some(mut loser) = self.sessions.remove(&id) {
                debug!(peer = %peer, session = id, "closing duplicate session");
                loser.close();
            }
        }
    }

    /// A session closed or errored. Returns the peer when it just went
    /// offline (no remaining open session).
    pub fn on_session_closed(&mut self, session: SessionId, _now: i64) -> Option<PeerId> {
        let mut entry = self.sessions.remove(&session)?;
        let peer = entry.peer();
        let was_open = entry.state() == SessionState::Open;
        entry.close();

        if self.is_connecting.get(&peer) == Some(&session) {
            self.is_connecting.remove(&peer);
        }

        let still_open = self.open_session_to(peer).is_some();
        if !still_open {
            self.last_heard_from.remove(&peer);
        }
        if was_open && !still_open {
            info!(peer = %peer, session, "peer offline");
            Some(peer)
        } else {
            None
        }
    }

    /// Close every session to `peer` (used when a member is forgotten).
    /// Returns true when the peer had an open session.
    pub fn close_peer(&mut self, peer: PeerId) -> bool {
        let ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.peer() == peer)
            .map(|s| s.id())
            .collect();
        let mut was_online = false;
        for id in ids {
            if let Some(mut session) = self.sessions.remove(&id) {
                was_online |= session.state() == SessionState::Open;
                session.close();
            }
        }
        self.is_connecting.remove(&peer);
        self.last_heard_from.remove(&peer);
        was_online
    }

    pub fn session_peer(&self, session: SessionId) -> Option<PeerId> {
        self.sessions.get(&session).map(|s| s.peer())
    }

    pub fn stamp_heard(&mut self, peer: PeerId, now: i64) {
        self.last_heard_from.insert(peer, now);
    }

    pub fn send_on(&self, session: SessionId, frame: &Frame) -> bool {
        self.sessions
            .get(&session)
            .map(|s| s.send(frame))
            .unwrap_or(false)
    }

    pub fn send_to(&self, peer: PeerId, frame: &Frame) -> bool {
        self.open_session_to(peer)
            .map(|id| self.send_on(id, frame))
            .unwrap_or(false)
    }

    /// Send to every open session. Returns how many sends went out.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state() == SessionState::Open)
            .filter(|s| s.send(frame))
            .count()
    }

    pub fn open_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|s| s.state() == SessionState::Open)
            .map(|s| s.peer())
            .collect();
        peers.sort();
        peers.dedup();
        peers
    }

    /// One supervisor sweep: abandon stale dials, ping or close idle
    /// sessions, redial missing members.
    pub fn tick(&mut self, now: i64, want: &BTreeSet<PeerId>) -> TickReport {
        let mut report = TickReport::default();

        // Unanswered dials are abandoned so the next sweep can retry.
        let stale: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                s.state() == SessionState::Connecting && now - s.since() > self.dial_timeout_ms
            })
            .map(|s| s.id())
            .collect();
        for id in stale {
            if let Some(mut session) = self.sessions.remove(&id) {
                let peer = session.peer();
                debug!(peer = %peer, session = id, "abandoning stale dial");
                session.close();
                if self.is_connecting.get(&peer) == Some(&id) {
                    self.is_connecting.remove(&peer);
                }
                report.abandoned.push(peer);
            }
        }

        // Liveness: ping quiet sessions, close dead ones.
        let open: Vec<(SessionId, PeerId)> = self
            .sessions
            .values()
            .filter(|s| s.state() == SessionState::Open)
            .map(|s| (s.id(), s.peer()))
            .collect();
        for (id, peer) in open {
            let last = *self.last_heard_from.entry(peer).or_insert(now);
            let idle = now - last;
            if idle > self.session_timeout_ms {
                warn!(peer = %peer, idle_ms = idle, "session timed out");
                if let Some(mut session) = self.sessions.remove(&id) {
                    session.close();
                }
                if self.open_session_to(peer).is_none() {
                    self.last_heard_from.remove(&peer);
                    report.closed.push(peer);
                }
            } else if idle > self.ping_idle_ms {
                self.send_on(id, &Frame::Ping);
                report.pinged.push(peer);
            }
        }

        // Full-mesh maintenance: dial anyone wanted but absent.
        report.dialed = self.dial_missing(want, now);

        report
    }
}
