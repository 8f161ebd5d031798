//! Agent lifecycle specs: cold start, hitless swap, shutdown.

use crate::prelude::*;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn cold_start_reaches_steady_state() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |_| {});

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await, "envoy-rev0.json written");
    assert!(wait_for(SPEC_WAIT_MAX, || h.started_epochs() == vec![0]).await, "epoch 0 spawned");

    // Steady state: no further epochs appear.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(h.started_epochs(), vec![0]);
    assert!(!h.artifact(1).exists());

    let metrics = h.stop().await;
    assert_eq!(metrics.epochs_started, 1);
}

#[tokio::test]
#[serial]
async fn environment_change_swaps_and_drains() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |_| {});

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);

    h.env.update(|s| s.management_ports.push(9090));
    h.handle.request();

    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(1).exists()).await, "envoy-rev1.json written");
    assert!(
        wait_for(SPEC_WAIT_MAX, || h.log_lines().iter().any(|l| {
            l.starts_with("drain ") && l.contains("--restart-epoch 0")
        }))
        .await,
        "old epoch asked to drain"
    );
    // The drained epoch exits and its artifact is pruned.
    assert!(wait_for(SPEC_WAIT_MAX, || !h.artifact(0).exists()).await, "envoy-rev0.json pruned");
    assert!(h.artifact(1).exists());

    let metrics = h.stop().await;
    assert_eq!(metrics.epochs_started, 2);
    assert_eq!(metrics.pruned, 2, "both epochs pruned: {metrics:?}");
}

#[tokio::test]
#[serial]
async fn repeated_requests_allocate_nothing_new() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |_| {});

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);
    h.handle.request();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let metrics = h.stop().await;
    assert_eq!(metrics.epochs_started, 1);
    assert!(metrics.unchanged >= 1, "second pass fingerprint-matched: {metrics:?}");
}

#[tokio::test]
#[serial]
async fn shutdown_drains_and_cleans_the_scratch_dir() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |_| {});

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);

    let metrics = h.stop().await;
    assert_eq!(metrics.epochs_started, 1);

    let leftovers: Vec<_> = std::fs::read_dir(h.dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with("envoy-rev"))
        .collect();
    assert!(leftovers.is_empty(), "no artifacts left behind: {leftovers:?}");

    // The proxy saw a drain request on the way out.
    assert!(h.log_lines().iter().any(|l| l.starts_with("drain ")), "{:?}", h.log_lines());
}
