//! Node lifecycle: restart with durable state, leaving, forgetting members,
//! offline bootstraps and signaling loss.

mod common;

use std::sync::Arc;

use cercle_core::{CoreError, ManualClock};
use cercle_fabric::MemoryFabric;

use common::*;

#[tokio::test(start_paused = true)]
async fn restart_restores_log_and_peer_identity() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let a = spawn(&fabric, &clock, dir.path(), "a");
    let b = spawn(&fabric, &clock, dir.path(), "b");

    let group = a.handle.create_group("durable").await.unwrap();
    let invite = a.handle.invite(group).await.unwrap();
    settle().await;
    b.handle.join_group(&invite).await.unwrap();
    run_for(&clock, 500).await;

    a.handle.send_message(group, "one").await.unwrap();
    clock.advance(1);
    b.handle.send_message(group, "two").await.unwrap();
    run_for(&clock, 500).await;

    let a_peer = my_peer_id(&a.handle, group).await;
    let fp_before = fingerprint(&a.handle, group).await;

    a.handle.shutdown().await;
    run_for(&clock, 500).await;
    assert!(!fabric.is_registered(a_peer), "endpoint released on shutdown");
    assert!(matches!(
        a.handle.snapshot().await,
        Err(CoreError::NodeStopped)
    ));

    // Same store, fresh process: identical peer id and log, and the other
    // node sees us back within a couple of supervisor sweeps.
    let a2 = spawn(&fabric, &clock, dir.path(), "a");
    assert_eq!(my_peer_id(&a2.handle, group).await, a_peer);
    assert_eq!(fingerprint(&a2.handle, group).await, fp_before);

    run_for(&clock, 12_000).await;
    let snap_b = snapshot_of(&b.handle).await;
    assert!(snap_b.group(group).unwrap().online.contains(&a_peer));
}

#[tokio::test(start_paused = true)]
async fn forget_is_local_and_resync_redelivers() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let a = spawn(&fabric, &clock, dir.path(), "a");
    let b = spawn(&fabric, &clock, dir.path(), "b");
    let c = spawn(&fabric, &clock, dir.path(), "c");

    let group = a.handle.create_group("memory").await.unwrap();
    let invite = a.handle.invite(group).await.unwrap();
    settle().await;

    // Sequential joins so C's first sync reveals B and closes the mesh.
    b.handle.join_group(&invite).await.unwrap();
    run_for(&clock, 500).await;
    b.handle.send_message(group, "b1").await.unwrap();
    run_for(&clock, 500).await;
    c.handle.join_group(&invite).await.unwrap();
    run_for(&clock, 500).await;

    clock.advance(1);
    c.handle.send_message(group, "c1").await.unwrap();
    clock.advance(1);
    b.handle.send_message(group, "b2").await.unwrap();
    run_for(&clock, 500).await;
    assert_eq!(chat_texts(&a.handle, group).await, ["b1", "c1", "b2"]);
    assert_eq!(chat_texts(&c.handle, group).await, ["b1", "c1", "b2"]);

    let b_peer = my_peer_id(&b.handle, group).await;
    a.handle.forget_member(group, b_peer).await.unwrap();

    // Locally purged, relative order preserved; other replicas untouched.
    let snap_a = snapshot_of(&a.handle).await;
    let view = snap_a.group(group).unwrap();
    assert_eq!(
        view.chat_messages
            .iter()
            .map(|m| m.text.clone())
            .collect::<Vec<_>>(),
        ["c1"]
    );
    assert!(!view.members.contains(&b_peer));
    assert_eq!(chat_texts(&b.handle, group).await, ["b1", "c1", "b2"]);
    assert_eq!(chat_texts(&c.handle, group).await, ["b1", "c1", "b2"]);

    // Forget is not remembered: any peer that still holds B's events hands
    // them back on the next anti-entropy exchange.
    run_for(&clock, 30_000).await;
    assert_eq!(chat_texts(&a.handle, group).await, ["b1", "c1", "b2"]);
    assert!(snapshot_of(&a.handle)
        .await
        .group(group)
        .unwrap()
        .members
        .contains(&b_peer));
}

#[tokio::test(start_paused = true)]
async fn join_with_offline_bootstrap_retries_until_it_lands() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let a = spawn(&fabric, &clock, dir.path(), "a");
    let group = a.handle.create_group("patience").await.unwrap();
    let invite = a.handle.invite(group).await.unwrap();
    settle().await;
    let a_peer = my_peer_id(&a.handle, group).await;

    // The inviter drops off the signaling layer before the joiner scans.
    fabric.kill_endpoint(a_peer);
    settle().await;

    let b = spawn(&fabric, &clock, dir.path(), "b");
    b.handle.join_group(&invite).await.unwrap();
    run_for(&clock, 2_000).await;

    // Still waiting: placeholder name, nothing synced, but the replica is
    // durable.
    let snap_b = snapshot_of(&b.handle).await;
    assert_eq!(snap_b.group(group).unwrap().name, "Joining…");

    // A's supervisor rebuilds its endpoint; B's abandons the dead dial and
    // redials until the handshake lands.
    run_for(&clock, 30_000).await;
    let snap_b = snapshot_of(&b.handle).await;
    assert_eq!(snap_b.group(group).unwrap().name, "patience");
    assert!(snap_b.group(group).unwrap().online.contains(&a_peer));
}

#[tokio::test(start_paused = true)]
async fn leave_group_purges_replica_after_goodbye() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let a = spawn(&fabric, &clock, dir.path(), "a");
    let b = spawn(&fabric, &clock, dir.path(), "b");

    let group = a.handle.create_group("ephemeral").await.unwrap();
    let invite = a.handle.invite(group).await.unwrap();
    settle().await;
    b.handle.join_group(&invite).await.unwrap();
    run_for(&clock, 500).await;
    let b_peer = my_peer_id(&b.handle, group).await;

    b.handle.leave_group(group).await.unwrap();
    run_for(&clock, 1_000).await;

    // B's replica, endpoint and persistence entry are gone.
    assert!(snapshot_of(&b.handle).await.group(group).is_none());
    assert!(!fabric.is_registered(b_peer));

    // A heard the goodbye broadcast before the endpoint died.
    let snap_a = snapshot_of(&a.handle).await;
    assert!(snap_a.group(group).unwrap().members.contains(&b_peer));

    // The departure survives B's restart: no groups come back.
    b.handle.shutdown().await;
    settle().await;
    let b2 = spawn(&fabric, &clock, dir.path(), "b");
    assert!(snapshot_of(&b2.handle).await.groups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn active_group_hint_is_persisted() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let a = spawn(&fabric, &clock, dir.path(), "a");
    let group = a.handle.create_group("focus").await.unwrap();
    a.handle.set_active_group(group).await.unwrap();
    assert_eq!(snapshot_of(&a.handle).await.active_group_id, Some(group));

    a.handle.shutdown().await;
    settle().await;

    let a2 = spawn(&fabric, &clock, dir.path(), "a");
    assert_eq!(snapshot_of(&a2.handle).await.active_group_id, Some(group));
}

#[tokio::test(start_paused = true)]
async fn malformed_invite_is_rejected_without_state_change() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let b = spawn(&fabric, &clock, dir.path(), "b");
    let result = b.handle.join_group("definitely not an invite").await;
    assert!(matches!(result, Err(CoreError::InvalidInvite(_))));
    assert!(snapshot_of(&b.handle).await.groups.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_group_operations_fail_cleanly() {
    let fabric = Arc::new(MemoryFabric::new());
    let clock = ManualClock::new(1_000);
    let dir = tempfile::tempdir().unwrap();

    let a = spawn(&fabric, &clock, dir.path(), "a");
    let ghost = cercle_shared::GroupId::new();

    assert!(matches!(
        a.handle.send_message(ghost, "void").await,
        Err(CoreError::UnknownGroup(_))
    ));
    assert!(matches!(
        a.handle.leave_group(ghost).await,
        Err(CoreError::UnknownGroup(_))
    ));
    assert!(matches!(
        a.handle.set_active_group(ghost).await,
        Err(CoreError::UnknownGroup(_))
    ));
    assert!(matches!(
        a.handle.invite(ghost).await,
        Err(CoreError::UnknownGroup(_))
    ));
}
