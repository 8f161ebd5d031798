//! Rate-limit and debounce specs.

use crate::prelude::*;
use drover_core::RateLimitConfig;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn a_burst_of_notifications_coalesces() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |config| {
        config.rate_limit = RateLimitConfig { rate: 1.0, burst: 1 };
    });

    // 20 notifications inside 100ms, environment unchanged throughout.
    for i in 0..20 {
        h.handle.request();
        if i % 5 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);

    // Let the rate-limit wakeup fire and settle.
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let renders = h.gen.calls();
    assert!(renders <= 2, "one immediate render plus at most one after token refill, got {renders}");
    assert_eq!(h.started_epochs(), vec![0], "fingerprint matches, no new epochs");

    let metrics = h.stop().await;
    assert_eq!(metrics.epochs_started, 1);
    assert!(metrics.deferred >= 1, "burst must have been deferred: {metrics:?}");
}

#[tokio::test]
#[serial]
async fn requests_resume_after_the_window() {
    let mut h = SpecHarness::launch(ProxyKind::Idle, |config| {
        config.rate_limit = RateLimitConfig { rate: 20.0, burst: 1 };
    });

    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(0).exists()).await);

    // A later, genuinely different environment still gets applied.
    h.env.update(|s| s.management_ports.push(9090));
    h.handle.request();
    assert!(wait_for(SPEC_WAIT_MAX, || h.artifact(1).exists()).await, "change applied after window");

    let metrics = h.stop().await;
    assert_eq!(metrics.epochs_started, 2);
}
