//! Node orchestration with a command/notification channel pattern.
//!
//! All mutable state lives in one tokio task: commands from the API, fabric
//! events from every group endpoint, and the supervisor tick are serialized
//! through one `select!` loop, so the engine needs no locks. External code
//! talks to the node through [`NodeHandle`] and listens on the notification
//! channel.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use cercle_fabric::{EndpointEvent, Fabric};
use cercle_shared::{EventId, Frame, GroupId, InviteCode, PeerId};
use cercle_store::{PersistedState, Store};

use crate::clock::Clock;
use crate::config::NodeConfig;
use crate::error::CoreError;
use crate::group::Group;
use crate::mesh::Mesh;
use crate::sync;
use crate::views::{self, ChatMessage, NodeSnapshot};

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the node task.
#[derive(Debug)]
pub enum NodeCommand {
    /// Create a new group and become its first member.
    CreateGroup {
        name: String,
        reply: oneshot::Sender<Result<GroupId, CoreError>>,
    },
    /// Join a group from an invite code, or re-dial its bootstrap peer if
    /// the group is already known.
    JoinGroup {
        invite: String,
        reply: oneshot::Sender<Result<GroupId, CoreError>>,
    },
    /// Announce departure, then destroy the local replica after a grace
    /// period.
    LeaveGroup {
        group_id: GroupId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    /// Persisted UI hint.
    SetActiveGroup {
        group_id: GroupId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    /// Author and broadcast a chat message.
    SendMessage {
        group_id: GroupId,
        text: String,
        reply: oneshot::Sender<Result<EventId, CoreError>>,
    },
    /// Purge a member's events locally and drop their sessions.
    ForgetMember {
        group_id: GroupId,
        peer_id: PeerId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    /// Produce the shareable invite code for a group.
    Invite {
        group_id: GroupId,
        reply: oneshot::Sender<Result<String, CoreError>>,
    },
    /// Read-only view of all groups and the active-group hint.
    Snapshot {
        reply: oneshot::Sender<NodeSnapshot>,
    },
    /// Stop the node task, tearing down every endpoint.
    Shutdown,
}

/// Notifications sent *from* the node task to the application.
#[derive(Debug, Clone)]
pub enum NodeNotification {
    /// A group's derived state changed (log, name or membership).
    GroupUpdated { group_id: GroupId },
    /// A remote chat message arrived.
    MessageReceived {
        group_id: GroupId,
        message: ChatMessage,
    },
    /// A member came online.
    PeerOnline { group_id: GroupId, peer_id: PeerId },
    /// A member went offline.
    PeerOffline { group_id: GroupId, peer_id: PeerId },
}

/// Cloneable handle wrapping the command channel with typed methods.
#[derive(Clone)]
pub struct NodeHandle {
    cmd_tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| CoreError::NodeStopped)?;
        rx.await.map_err(|_| CoreError::NodeStopped)
    }

    pub async fn create_group(&self, name: &str) -> Result<GroupId, CoreError> {
        let name = name.to_string();
        self.request(|reply| NodeCommand::CreateGroup { name, reply })
            .await?
    }

    pub async fn join_group(&self, invite: &str) -> Result<GroupId, CoreError> {
        let invite = invite.to_string();
        self.request(|reply| NodeCommand::JoinGroup { invite, reply })
            .await?
    }

    pub async fn leave_group(&self, group_id: GroupId) -> Result<(), CoreError> {
        self.request(|reply| NodeCommand::LeaveGroup { group_id, reply })
            .await?
    }

    pub async fn set_active_group(&self, group_id: GroupId) -> Result<(), CoreError> {
        self.request(|reply| NodeCommand::SetActiveGroup { group_id, reply })
            .await?
    }

    pub async fn send_message(&self, group_id: GroupId, text: &str) -> Result<EventId, CoreError> {
        let text = text.to_string();
        self.request(|reply| NodeCommand::SendMessage {
            group_id,
            text,
            reply,
        })
        .await?
    }

    pub async fn forget_member(
        &self,
        group_id: GroupId,
        peer_id: PeerId,
    ) -> Result<(), CoreError> {
        self.request(|reply| NodeCommand::ForgetMember {
            group_id,
            peer_id,
            reply,
        })
        .await?
    }

    pub async fn invite(&self, group_id: GroupId) -> Result<String, CoreError> {
        self.request(|reply| NodeCommand::Invite { group_id, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<NodeSnapshot, CoreError> {
        self.request(|reply| NodeCommand::Snapshot { reply }).await
    }

    /// Ask the node task to stop. Safe to call on a stopped node.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(NodeCommand::Shutdown).await;
    }
}

// ---------------------------------------------------------------------------
// Node task
// ---------------------------------------------------------------------------

/// Deferred work the loop schedules for itself.
enum Internal {
    FinishLeave(GroupId),
}

/// One group replica plus its connection mesh and bootstrap seed.
struct GroupRuntime {
    group: Group,
    mesh: Mesh,
    /// The invite's bootstrap peer: dialed alongside the members so a
    /// joiner can reach a group it has no events from yet.
    bootstrap: Option<PeerId>,
}

impl GroupRuntime {
    fn want_peers(&self) -> BTreeSet<PeerId> {
        let mut want = self.group.member_set();
        if let Some(bootstrap) = self.bootstrap {
            want.insert(bootstrap);
        }
        want.remove(&self.group.my_peer_id);
        want
    }
}

struct Node {
    fabric: Arc<dyn Fabric>,
    store: Store,
    clock: Arc<dyn Clock>,
    config: NodeConfig,
    groups: HashMap<GroupId, GroupRuntime>,
    active_group_id: Option<GroupId>,
    fabric_tx: mpsc::UnboundedSender<(GroupId, EndpointEvent)>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    notif_tx: mpsc::Sender<NodeNotification>,
}

/// Load persisted state, rebuild every group with its stored peer id and
/// log, start their endpoints, and spawn the node task.
///
/// Returns the command handle and the notification stream.
pub fn spawn_node(
    fabric: Arc<dyn Fabric>,
    store: Store,
    clock: Arc<dyn Clock>,
    config: NodeConfig,
) -> Result<(NodeHandle, mpsc::Receiver<NodeNotification>), CoreError> {
    let state = store.load_state()?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<NodeCommand>(256);
    let (notif_tx, notif_rx) = mpsc::channel::<NodeNotification>(256);
    let (fabric_tx, fabric_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let mut node = Node {
        fabric,
        store,
        clock,
        config,
        groups: HashMap::new(),
        active_group_id: state.active_group_id,
        fabric_tx,
        internal_tx,
        notif_tx,
    };

    for (group_id, persisted) in state.groups {
        let group = Group::from_persisted(persisted);
        let mut runtime = GroupRuntime {
            mesh: Mesh::new(group.my_peer_id, &node.config),
            group,
            bootstrap: None,
        };
        Node::start_endpoint(
            &node.fabric,
            &node.config,
            &node.fabric_tx,
            group_id,
            &mut runtime,
        );
        node.groups.insert(group_id, runtime);
    }
    info!(groups = node.groups.len(), "node initialized");

    tokio::spawn(node.run(cmd_rx, fabric_rx, internal_rx));

    Ok((NodeHandle { cmd_tx }, notif_rx))
}

impl Node {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<NodeCommand>,
        mut fabric_rx: mpsc::UnboundedReceiver<(GroupId, EndpointEvent)>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(NodeCommand::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
                Some((group_id, event)) = fabric_rx.recv() => {
                    self.handle_endpoint_event(group_id, event).await;
                }
                Some(internal) = internal_rx.recv() => {
                    match internal {
                        Internal::FinishLeave(group_id) => self.finish_leave(group_id).await,
                    }
                }
                _ = tick.tick() => self.on_tick().await,
            }
        }

        for (_, mut runtime) in self.groups.drain() {
            runtime.mesh.reset();
        }
        info!("node loop terminated");
    }

    fn start_endpoint(
        fabric: &Arc<dyn Fabric>,
        config: &NodeConfig,
        fabric_tx: &mpsc::UnboundedSender<(GroupId, EndpointEvent)>,
        group_id: GroupId,
        runtime: &mut GroupRuntime,
    ) {
        match fabric.create_endpoint(runtime.group.my_peer_id, &config.endpoint) {
            Ok((endpoint, mut events)) => {
                runtime.mesh.set_endpoint(endpoint);
                let tx = fabric_tx.clone();
                tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if tx.send((group_id, event)).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => {
                warn!(group = %group_id, error = %e, "endpoint creation failed, retrying next tick");
            }
        }
    }

    // -- commands ----------------------------------------------------------

    async fn handle_command(&mut self, cmd: NodeCommand) {
        match cmd {
            NodeCommand::CreateGroup { name, reply } => {
                let now = self.clock.now_ms();
                let (group, _genesis) = Group::create(&name, now);
                let group_id = group.id;
                let mut runtime = GroupRuntime {
                    mesh: Mesh::new(group.my_peer_id, &self.config),
                    group,
                    bootstrap: None,
                };
                Self::start_endpoint(
                    &self.fabric,
                    &self.config,
                    &self.fabric_tx,
                    group_id,
                    &mut runtime,
                );
                self.groups.insert(group_id, runtime);
                self.persist();
                let _ = reply.send(Ok(group_id));
                Node::notify(&self.notif_tx, NodeNotification::GroupUpdated { group_id }).await;
            }

            NodeCommand::JoinGroup { invite, reply } => {
                let invite = match InviteCode::decode(&invite) {
                    Ok(invite) => invite,
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                        return;
                    }
                };
                let now = self.clock.now_ms();

                if let Some(runtime) = self.groups.get_mut(&invite.group_id) {
                    // Already a member: the invite is just a dial hint.
                    runtime.bootstrap = Some(invite.peer_id);
                    runtime.mesh.ensure_dial(invite.peer_id, now);
                    let _ = reply.send(Ok(invite.group_id));
                    return;
                }

                let group = Group::join(invite.group_id);
                let group_id = group.id;
                let mut runtime = GroupRuntime {
                    mesh: Mesh::new(group.my_peer_id, &self.config),
                    group,
                    bootstrap: Some(invite.peer_id),
                };
                Self::start_endpoint(
                    &self.fabric,
                    &self.config,
                    &self.fabric_tx,
                    group_id,
                    &mut runtime,
                );
                self.groups.insert(group_id, runtime);
                self.persist();
                let _ = reply.send(Ok(group_id));
                Node::notify(&self.notif_tx, NodeNotification::GroupUpdated { group_id }).await;
            }

            NodeCommand::LeaveGroup { group_id, reply } => {
                let Some(runtime) = self.groups.get_mut(&group_id) else {
                    let _ = reply.send(Err(CoreError::UnknownGroup(group_id)));
                    return;
                };
                let now = self.clock.now_ms();
                let goodbye = runtime.group.append_member_left(now);
                let sent = runtime
                    .mesh
                    .broadcast(&Frame::EventBroadcast { event: goodbye });
                debug!(group = %group_id, sessions = sent, "goodbye broadcast");

                // Give the goodbye a moment on the wire, then tear down.
                let internal_tx = self.internal_tx.clone();
                let grace = self.config.leave_grace_ms;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(grace)).await;
                    let _ = internal_tx.send(Internal::FinishLeave(group_id));
                });
                let _ = reply.send(Ok(()));
            }

            NodeCommand::SetActiveGroup { group_id, reply } => {
                if !self.groups.contains_key(&group_id) {
                    let _ = reply.send(Err(CoreError::UnknownGroup(group_id)));
                    return;
                }
                self.active_group_id = Some(group_id);
                self.persist();
                let _ = reply.send(Ok(()));
            }

            NodeCommand::SendMessage {
                group_id,
                text,
                reply,
            } => {
                let Some(runtime) = self.groups.get_mut(&group_id) else {
                    let _ = reply.send(Err(CoreError::UnknownGroup(group_id)));
                    return;
                };
                let now = self.clock.now_ms();
                let event = runtime.group.append_message(&text, now);
                let event_id = event.id;
                runtime.mesh.broadcast(&Frame::EventBroadcast { event });
                self.persist();
                let _ = reply.send(Ok(event_id));
                Node::notify(&self.notif_tx, NodeNotification::GroupUpdated { group_id }).await;
            }

            NodeCommand::ForgetMember {
                group_id,
                peer_id,
                reply,
            } => {
                let Some(runtime) = self.groups.get_mut(&group_id) else {
                    let _ = reply.send(Err(CoreError::UnknownGroup(group_id)));
                    return;
                };
                runtime.group.forget(&peer_id);
                let was_online = runtime.mesh.close_peer(peer_id);
                self.persist();
                let _ = reply.send(Ok(()));
                if was_online {
                    Node::notify(
                        &self.notif_tx,
                        NodeNotification::PeerOffline { group_id, peer_id },
                    )
                    .await;
                }
                Node::notify(&self.notif_tx, NodeNotification::GroupUpdated { group_id }).await;
            }

            NodeCommand::Invite { group_id, reply } => {
                let result = match self.groups.get(&group_id) {
                    Some(runtime) => {
                        Ok(InviteCode::new(group_id, runtime.group.my_peer_id).encode())
                    }
                    None => Err(CoreError::UnknownGroup(group_id)),
                };
                let _ = reply.send(result);
            }

            NodeCommand::Snapshot { reply } => {
                let mut groups: Vec<_> = self
                    .groups
                    .values()
                    .map(|rt| views::group_view(&rt.group, rt.mesh.open_peers()))
                    .collect();
                groups.sort_by_key(|g| g.id);
                let _ = reply.send(NodeSnapshot {
                    groups,
                    active_group_id: self.active_group_id,
                });
            }

            NodeCommand::Shutdown => unreachable!("handled by the loop"),
        }
    }

    async fn finish_leave(&mut self, group_id: GroupId) {
        let Some(mut runtime) = self.groups.remove(&group_id) else {
            return;
        };
        runtime.mesh.reset();
        if self.active_group_id == Some(group_id) {
            self.active_group_id = None;
        }
        self.persist();
        info!(group = %group_id, "group left");
        Node::notify(&self.notif_tx, NodeNotification::GroupUpdated { group_id }).await;
    }

    // -- fabric events -----------------------------------------------------

    async fn handle_endpoint_event(&mut self, group_id: GroupId, event: EndpointEvent) {
        let now = self.clock.now_ms();
        let mut notes: Vec<NodeNotification> = Vec::new();
        let mut dirty = false;

        {
            // The group may have been left while events were in flight.
            let Some(runtime) = self.groups.get_mut(&group_id) else {
                return;
            };

            match event {
                EndpointEvent::Ready => {
                    debug!(group = %group_id, "endpoint ready");
                    runtime.mesh.mark_ready();
                    let want = runtime.want_peers();
                    runtime.mesh.dial_missing(&want, now);
                }

                EndpointEvent::Incoming(handle) => {
                    runtime.mesh.on_incoming(handle, now);
                }

                EndpointEvent::SessionOpened { session } => {
                    if let Some(opened) = runtime.mesh.on_session_opened(session, now) {
                        // Anti-entropy starts on every surviving session.
                        let greeting = sync::open_handshake(&runtime.group);
                        runtime.mesh.send_on(opened.session, &greeting);
                        if opened.newly_online {
                            notes.push(NodeNotification::PeerOnline {
                                group_id,
                                peer_id: opened.peer,
                            });
                        }
                    }
                }

                EndpointEvent::SessionData { session, data } => {
                    let Some(peer) = runtime.mesh.session_peer(session) else {
                        return;
                    };
                    runtime.mesh.stamp_heard(peer, now);

                    let frame = match Frame::from_bytes(&data) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(group = %group_id, peer = %peer, error = %e, "dropping malformed frame");
                            return;
                        }
                    };

                    let outcome = sync::handle_frame(&mut runtime.group, frame, peer);
                    if let Some(reply) = outcome.reply {
                        runtime.mesh.send_on(session, &reply);
                    }
                    if !outcome.merged.is_empty() {
                        dirty = true;
                        for event in &outcome.merged {
                            if let Some(text) = event.message_text() {
                                notes.push(NodeNotification::MessageReceived {
                                    group_id,
                                    message: ChatMessage {
                                        id: event.id.to_string(),
                                        author: if event.author == runtime.group.my_peer_id {
                                            "You".to_string()
                                        } else {
                                            event.author.to_string()
                                        },
                                        text,
                                        timestamp: event.timestamp,
                                    },
                                });
                            }
                        }
                        notes.push(NodeNotification::GroupUpdated { group_id });
                    }
                    for newcomer in outcome.newcomers {
                        runtime.mesh.ensure_dial(newcomer, now);
                    }
                }

                EndpointEvent::SessionClosed { session } => {
                    if let Some(peer) = runtime.mesh.on_session_closed(session, now) {
                        notes.push(NodeNotification::PeerOffline {
                            group_id,
                            peer_id: peer,
                        });
                    }
                }

                EndpointEvent::SessionError { session, message } => {
                    warn!(group = %group_id, session, error = %message, "session error");
                    if let Some(peer) = runtime.mesh.on_session_closed(session, now) {
                        notes.push(NodeNotification::PeerOffline {
                            group_id,
                            peer_id: peer,
                        });
                    }
                }

                EndpointEvent::Error(message) => {
                    warn!(group = %group_id, error = %message, "endpoint error, rebuilding next tick");
                    runtime.mesh.reset();
                }

                EndpointEvent::Disconnected | EndpointEvent::Closed => {
                    warn!(group = %group_id, "endpoint lost, rebuilding next tick");
                    runtime.mesh.reset();
                }
            }
        }

        if dirty {
            self.persist();
        }
        for note in notes {
            Node::notify(&self.notif_tx, note).await;
        }
    }

    // -- supervisor --------------------------------------------------------

    async fn on_tick(&mut self) {
        let now = self.clock.now_ms();
        let mut notes: Vec<NodeNotification> = Vec::new();

        let group_ids: Vec<GroupId> = self.groups.keys().copied().collect();
        for group_id in group_ids {
            let Some(runtime) = self.groups.get_mut(&group_id) else {
                continue;
            };

            // A group without an endpoint lost it to a fabric failure (or
            // never got one); recreate here.
            if !runtime.mesh.has_endpoint() {
                Self::start_endpoint(
                    &self.fabric,
                    &self.config,
                    &self.fabric_tx,
                    group_id,
                    runtime,
                );
            }

            let want = runtime.want_peers();
            let report = runtime.mesh.tick(now, &want);
            for peer_id in report.closed {
                notes.push(NodeNotification::PeerOffline { group_id, peer_id });
            }
        }

        for note in notes {
            Node::notify(&self.notif_tx, note).await;
        }
    }

    // -- helpers -----------------------------------------------------------

    fn persist(&self) {
        let state = PersistedState {
            groups: self
                .groups
                .iter()
                .map(|(id, runtime)| (*id, runtime.group.to_persisted()))
                .collect(),
            active_group_id: self.active_group_id,
        };
        if let Err(e) = self.store.save_state(&state) {
            warn!(error = %e, "state save failed");
        }
    }

    async fn notify(notif_tx: &mpsc::Sender<NodeNotification>, note: NodeNotification) {
        let _ = notif_tx.send(note).await;
    }
}
