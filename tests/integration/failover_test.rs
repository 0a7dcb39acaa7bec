// tests/integration/failover_test.rs

//! Failover outcome scenarios: success, failure, and transaction-resolution-
//! unknown.

use super::fixtures::{MockCluster, TestHarness, test_settings, writer_endpoint};
use auroralink::core::WrapperError;
use auroralink::core::host::HostRole;
use std::time::{Duration, Instant};

#[tokio::test]
async fn writer_failover_surfaces_success_and_reconnects() {
    let cluster = MockCluster::new("w1", &["r1", "r2"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness
        .connect(test_settings(&writer_endpoint()))
        .await
        .unwrap();
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");

    harness.cluster.promote("r1");

    let err = wrapper.query("SELECT 1 AS probe_after_failover").await.unwrap_err();
    assert_eq!(err, WrapperError::FailoverSuccess);

    // The logical connection now points at the newly elected writer.
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "r1");
    let host = wrapper.current_host().expect("host is set after failover");
    assert_eq!(host.role, HostRole::Writer);

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn failover_fails_within_its_budget_when_nothing_is_reachable() {
    let cluster = MockCluster::new("w1", &["r1"]);
    let harness = TestHarness::new(cluster);
    let mut settings = test_settings(&writer_endpoint());
    settings.failover_timeout = Duration::from_secs(1);
    let wrapper = harness.connect(settings).await.unwrap();

    harness.cluster.set_all_unhealthy();

    let started = Instant::now();
    let err = wrapper.query("SELECT 1 AS probe_during_outage").await.unwrap_err();
    assert!(matches!(err, WrapperError::FailoverFailed(_)), "got {err:?}");
    assert!(
        started.elapsed() < Duration::from_millis(2500),
        "failover took {:?}",
        started.elapsed()
    );

    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn losing_the_writer_mid_transaction_is_resolution_unknown() {
    let cluster = MockCluster::new("w1", &["r1"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness
        .connect(test_settings(&writer_endpoint()))
        .await
        .unwrap();

    wrapper.execute("BEGIN").await.unwrap();
    wrapper
        .execute("INSERT INTO orders VALUES (1)")
        .await
        .unwrap();

    harness.cluster.promote("r1");

    let err = wrapper
        .execute("INSERT INTO orders VALUES (2)")
        .await
        .unwrap_err();
    assert_eq!(err, WrapperError::TransactionResolutionUnknown);

    // The connection is usable again; the application decides about retry.
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "r1");

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn reader_endpoint_failover_lands_on_any_remaining_host() {
    let cluster = MockCluster::new("w1", &["r1", "r2"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness
        .connect(test_settings(&super::fixtures::reader_endpoint()))
        .await
        .unwrap();
    let initial = harness.connected_instance(&wrapper).await.unwrap();
    assert!(initial == "r1" || initial == "r2");

    harness.cluster.set_healthy(&initial, false);

    let err = wrapper.query("SELECT 1 AS probe_after_reader_loss").await.unwrap_err();
    assert_eq!(err, WrapperError::FailoverSuccess);
    let landed = harness.connected_instance(&wrapper).await.unwrap();
    assert_ne!(landed, initial);

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}
