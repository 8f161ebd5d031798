//! Failure-handling specs: transient retries, budget exhaustion,
//! permanent errors, crash recovery.

use crate::prelude::*;
use drover_core::RenderError;
use drover_daemon::ReconcileError;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn transient_render_errors_recover_within_budget() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |config| config.retry_budget = 5);
    h.gen.fail_next([
        RenderError::Transient("discovery unavailable".into()),
        RenderError::Transient("discovery unavailable".into()),
        RenderError::Transient("discovery unavailable".into()),
    ]);

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await, "recovers on 4th render");
    assert_eq!(h.gen.calls(), 4);

    let metrics = h.stop().await;
    assert_eq!(metrics.retries, 3);
    assert_eq!(metrics.epochs_started, 1);
}

#[tokio::test]
#[serial]
async fn startup_crashes_exhaust_the_budget_fatally() {
    let mut h = SpecHarness::launch(ProxyKind::CrashOnStart(2), |config| config.retry_budget = 3);

    h.handle.request();
    let err = h.join().await.expect_err("budget exhaustion must be fatal");
    assert!(matches!(err, ReconcileError::BudgetExhausted { budget: 3, .. }), "{err}");

    assert_eq!(h.started_epochs(), vec![0, 1, 2], "exactly three attempts, no epoch 3");
    assert!(!h.artifact(3).exists());
}

#[tokio::test]
#[serial]
async fn permanent_render_error_leaves_the_running_epoch_alone() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |_| {});

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);

    h.gen.fail_next([RenderError::Permanent("unrenderable environment".into())]);
    h.env.update(|s| s.management_ports.push(9090));
    h.handle.request();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(h.artifact(0).exists(), "running epoch untouched");
    assert_eq!(h.started_epochs(), vec![0]);

    let metrics = h.stop().await;
    assert_eq!(metrics.permanent_failures, 1);
    assert_eq!(metrics.retries, 0, "permanent errors are not retried");
}

#[tokio::test]
#[serial]
async fn post_stabilization_crash_reapplies_without_rendering() {
    let mut h = SpecHarness::launch(ProxyKind::CrashAfter(Duration::from_millis(300)), |config| {
        // Well under the crash delay, so the epoch stabilizes first.
        config.stabilization_delay = Duration::from_millis(50);
    });

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);

    // The stabilized epoch crashes on its own; a replacement appears.
    assert!(
        wait_for(SPEC_WAIT_MAX, || h.started_epochs().len() >= 2).await,
        "replacement epoch spawned after crash: {:?}",
        h.started_epochs()
    );
    assert_eq!(h.gen.calls(), 1, "re-apply uses the cached artifact, not the generator");

    let metrics = h.stop().await;
    assert!(metrics.crashes >= 1, "{metrics:?}");
    assert!(metrics.epochs_started >= 2, "{metrics:?}");
}
