//! Shared harness: nodes on one in-process fabric with a hand-driven clock.
#![allow(dead_code)] // not every suite uses every helper

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cercle_core::{
    spawn_node, ManualClock, NodeConfig, NodeHandle, NodeNotification, NodeSnapshot,
};
use cercle_fabric::{Fabric, MemoryFabric};
use cercle_shared::{GroupId, PeerId};
use cercle_store::Store;

pub struct TestNode {
    pub handle: NodeHandle,
    /// Kept alive so the node never sees a closed notification channel.
    pub notifications: mpsc::Receiver<NodeNotification>,
}

impl TestNode {
    pub fn drain_notifications(&mut self) -> Vec<NodeNotification> {
        let mut out = Vec::new();
        while let Ok(note) = self.notifications.try_recv() {
            out.push(note);
        }
        out
    }
}

/// Opt-in test logging: `RUST_LOG=cercle_core=debug cargo test -- --nocapture`.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spawn a node whose store lives at `<dir>/<name>.db`. Spawning the same
/// name again after a shutdown is a restart.
pub fn spawn(fabric: &Arc<MemoryFabric>, clock: &ManualClock, dir: &Path, name: &str) -> TestNode {
    init_tracing();
    let store = Store::open_at(&dir.join(format!("{name}.db"))).expect("open store");
    let fabric: Arc<dyn Fabric> = Arc::clone(fabric) as Arc<dyn Fabric>;
    let (handle, notifications) = spawn_node(
        fabric,
        store,
        Arc::new(clock.clone()),
        NodeConfig::default(),
    )
    .expect("spawn node");
    TestNode {
        handle,
        notifications,
    }
}

/// Let queued messages and ready tasks drain without moving time.
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// Advance the protocol clock and paused tokio time together, settling the
/// mesh after every step so timers and channels interleave realistically.
pub async fn run_for(clock: &ManualClock, ms: u64) {
    let step: u64 = 100;
    let mut elapsed = 0;
    while elapsed < ms {
        let d = step.min(ms - elapsed);
        clock.advance(d as i64);
        tokio::time::advance(Duration::from_millis(d)).await;
        settle().await;
        elapsed += d;
    }
}

pub async fn snapshot_of(handle: &NodeHandle) -> NodeSnapshot {
    handle.snapshot().await.expect("snapshot")
}

pub async fn my_peer_id(handle: &NodeHandle, group: GroupId) -> PeerId {
    snapshot_of(handle)
        .await
        .group(group)
        .expect("group present")
        .my_peer_id
}

/// Chat texts of one group, in log order.
pub async fn chat_texts(handle: &NodeHandle, group: GroupId) -> Vec<String> {
    snapshot_of(handle)
        .await
        .group(group)
        .map(|g| g.chat_messages.iter().map(|m| m.text.clone()).collect())
        .unwrap_or_default()
}

/// Convergence fingerprint: name, sorted members, chat message ids in order.
pub async fn fingerprint(
    handle: &NodeHandle,
    group: GroupId,
) -> (String, Vec<PeerId>, Vec<String>) {
    let snapshot = snapshot_of(handle).await;
    let view = snapshot.group(group).expect("group present");
    (
        view.name.clone(),
        view.members.clone(),
        view.chat_messages.iter().map(|m| m.id.clone()).collect(),
    )
}
