// tests/integration/rw_splitting_test.rs

//! Read/write splitting scenarios.

use super::fixtures::{MockCluster, TestHarness, test_settings, writer_endpoint};
use auroralink::config::WrapperSettings;

fn splitting_settings() -> WrapperSettings {
    let mut settings = test_settings(&writer_endpoint());
    settings.plugins = "readWriteSplitting,failover2,efm2".to_string();
    settings.failure_detection_enabled = false;
    settings
}

#[tokio::test]
async fn read_only_toggle_routes_between_writer_and_reader() {
    let cluster = MockCluster::new("w1", &["r1", "r2"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness.connect(splitting_settings()).await.unwrap();

    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");

    wrapper.set_read_only(true).await.unwrap();
    let reader = harness.connected_instance(&wrapper).await.unwrap();
    assert!(reader == "r1" || reader == "r2", "landed on {reader}");
    assert!(wrapper.is_read_only());

    wrapper.set_read_only(false).await.unwrap();
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");
    assert!(!wrapper.is_read_only());

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn repeated_read_only_switch_reuses_the_reader() {
    let cluster = MockCluster::new("w1", &["r1", "r2"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness.connect(splitting_settings()).await.unwrap();

    wrapper.set_read_only(true).await.unwrap();
    let reader_connects_after_first = harness.cluster.connect_count("r1")
        + harness.cluster.connect_count("r2");

    wrapper.set_read_only(true).await.unwrap();
    let reader_connects_after_second = harness.cluster.connect_count("r1")
        + harness.cluster.connect_count("r2");

    assert_eq!(reader_connects_after_first, 1);
    assert_eq!(reader_connects_after_second, reader_connects_after_first);
    assert!(wrapper.is_read_only());

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn is_read_only_reflects_the_last_value_set() {
    let cluster = MockCluster::new("w1", &["r1"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness.connect(splitting_settings()).await.unwrap();

    assert!(!wrapper.is_read_only());
    wrapper.set_read_only(true).await.unwrap();
    wrapper.query("SELECT 7 AS x").await.unwrap();
    assert!(wrapper.is_read_only());
    wrapper.set_read_only(false).await.unwrap();
    wrapper.query("SELECT 8 AS x").await.unwrap();
    assert!(!wrapper.is_read_only());

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn disabling_read_only_inside_a_transaction_is_rejected() {
    let cluster = MockCluster::new("w1", &["r1"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness.connect(splitting_settings()).await.unwrap();

    wrapper.set_read_only(true).await.unwrap();
    wrapper.execute("BEGIN").await.unwrap();
    let err = wrapper.set_read_only(false).await.unwrap_err();
    assert!(matches!(
        err,
        auroralink::core::WrapperError::InvalidState(_)
    ));

    wrapper.rollback().await.unwrap();
    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}
