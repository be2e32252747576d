//! End-to-end scenarios driven through the public `Check`/`Reconciler` API.
//!
//! S1 (two metrics, one warns), S4 (overrides drop ignored metrics), S5
//! (message truncation), and S6 (reconciler replaces a changed check) are
//! covered in-module next to the code they exercise (`check.rs`, `nsca.rs`,
//! `reconciler.rs`). This file covers the two scenarios that need a fresh
//! `Check` wired up from scratch: SoftFail masking a blip, and a timeout
//! firing then recovering.

use std::collections::HashMap;

use metricq_sink_nsca::config::{CheckConfig, TransitionPostprocessingDoc};
use metricq_sink_nsca::report::ReportQueue;
use metricq_sink_nsca::state::State;
use metricq_sink_nsca::time::{Timedelta, Timestamp};
use metricq_sink_nsca::check::Check;

fn base_config(metrics: &[&str]) -> CheckConfig {
    CheckConfig {
        metrics: metrics.iter().map(|s| s.to_string()).collect(),
        warning_below: None,
        warning_above: None,
        critical_below: None,
        critical_above: None,
        ignore: vec![],
        timeout: None,
        resend_interval: None,
        transition_debounce_window: None,
        transition_postprocessing: None,
        plugins: HashMap::new(),
    }
}

#[tokio::test]
async fn s2_soft_fail_masks_a_blip() {
    let mut config = base_config(&["a"]);
    config.warning_below = Some(f64::NEG_INFINITY);
    config.warning_above = Some(10.0);
    config.critical_below = Some(f64::NEG_INFINITY);
    config.critical_above = Some(f64::INFINITY);
    config.transition_postprocessing = Some(TransitionPostprocessingDoc::SoftFail { max_fail_count: 2 });

    let queue = ReportQueue::new();
    let check = Check::new("svc".to_string(), &config, Timedelta::from_s(180.0), vec![], queue.sender())
        .unwrap();

    // A one-sample WARNING blip surrounded by OK values: SoftFail(2) tolerates
    // it and the check never reports anything but OK.
    check.check("a", &[(Timestamp::from_posix_ns(1), 0.0)]).await;
    check.check("a", &[(Timestamp::from_posix_ns(2), 0.0)]).await;
    check.check("a", &[(Timestamp::from_posix_ns(3), 20.0)]).await;
    check.check("a", &[(Timestamp::from_posix_ns(4), 0.0)]).await;

    let batch = queue.batch(Timedelta::from_ns(10_000_000)).await;
    for report in &batch {
        assert_eq!(report.state, State::Ok, "unexpected report: {report:?}");
    }
}

#[tokio::test]
async fn s3_timeout_fires_then_recovers() {
    let mut config = base_config(&["a"]);
    config.timeout = Some(Timedelta::from_ns(100_000_000));

    let queue = ReportQueue::new();
    let check = Check::new("svc".to_string(), &config, Timedelta::from_s(180.0), vec![], queue.sender())
        .unwrap();
    check.start();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let batch = queue.batch(Timedelta::from_ns(10_000_000)).await;
    let timeout_report = batch
        .iter()
        .find(|r| r.state == State::Critical)
        .expect("expected a CRITICAL report once the metric times out");
    assert!(timeout_report.message.contains("100ms"));
    assert!(timeout_report.message.contains("no values received"));

    check.check("a", &[(Timestamp::now(), 1.0)]).await;
    let _ = check.bump_timeout_check("a", Timestamp::now());

    let recovery_batch = queue.batch(Timedelta::from_ns(10_000_000)).await;
    assert!(
        recovery_batch.iter().any(|r| r.state != State::Critical),
        "expected a recovery report once the metric resumed reporting"
    );

    check.stop(Timedelta::from_s(1.0)).await;
}
