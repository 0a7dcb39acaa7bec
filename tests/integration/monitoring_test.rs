// tests/integration/monitoring_test.rs

//! Enhanced failure monitoring: a stalled call against a dead host is cut
//! down by the monitor instead of waiting for a driver timeout.

use super::fixtures::{MockCluster, TestHarness, test_settings, writer_endpoint};
use auroralink::core::host::HostAvailability;
use std::time::{Duration, Instant};

#[tokio::test]
async fn hanging_host_call_is_aborted_and_host_marked_down() {
    let cluster = MockCluster::new("w1", &[]);
    let harness = TestHarness::new(cluster);
    let mut settings = test_settings(&writer_endpoint());
    settings.failover_timeout = Duration::from_secs(1);
    let wrapper = harness.connect(settings).await.unwrap();

    // Warm up: one query so the host monitor exists before the stall.
    wrapper.query("SELECT 1 AS warmup").await.unwrap();

    harness.cluster.set_hanging("w1", true);

    let started = Instant::now();
    let err = wrapper.query("SELECT 1 AS stalled").await.unwrap_err();
    let elapsed = started.elapsed();

    // The monitor aborts the in-flight call well before the 3s query budget;
    // the failover that follows exhausts its own 1s budget and surfaces.
    assert!(err.is_failover_error(), "got {err:?}");
    assert!(elapsed < Duration::from_millis(2900), "took {elapsed:?}");

    let w1 = wrapper
        .hosts()
        .into_iter()
        .find(|h| h.host_id_or_host() == "w1")
        .expect("w1 stays in the topology");
    assert_eq!(w1.availability, HostAvailability::NotAvailable);

    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn short_calls_are_never_monitored_to_death() {
    let cluster = MockCluster::new("w1", &["r1"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness
        .connect(test_settings(&writer_endpoint()))
        .await
        .unwrap();

    // A burst of short calls against a healthy host goes through untouched.
    for i in 0..25 {
        let result = wrapper.query(&format!("SELECT {i} AS n")).await.unwrap();
        assert_eq!(result.first("instance"), Some("w1"));
    }

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}
