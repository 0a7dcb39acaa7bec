// tests/integration/custom_endpoint_test.rs

//! Custom-endpoint membership scenarios.

use super::fixtures::{MockCluster, TestHarness, custom_endpoint, test_settings};
use auroralink::config::WrapperSettings;
use std::collections::HashSet;
use std::time::Duration;

fn endpoint_settings() -> WrapperSettings {
    let mut settings = test_settings(&custom_endpoint("friends"));
    settings.plugins = "customEndpoint,readWriteSplitting,failover2,efm2".to_string();
    settings.failure_detection_enabled = false;
    settings
}

#[tokio::test]
async fn membership_expansion_unlocks_the_opposite_role() {
    let cluster = MockCluster::new("w1", &["r1"]);
    cluster.set_custom_members("friends", &["w1"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness.connect(endpoint_settings()).await.unwrap();

    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");

    // Only the writer is a member: read-only work has nowhere to go and
    // falls back to the writer.
    wrapper.set_read_only(true).await.unwrap();
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");
    wrapper.set_read_only(false).await.unwrap();

    // Expand the endpoint; the monitor picks the change up within a couple
    // of refresh intervals.
    harness.cluster.set_custom_members("friends", &["w1", "r1"]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    wrapper.set_read_only(true).await.unwrap();
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "r1");

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn static_member_list_becomes_the_allowed_set() {
    let cluster = MockCluster::new("w1", &["r1", "r2"]);
    cluster.set_custom_members("friends", &["w1", "r1"]);
    let harness = TestHarness::new(cluster);
    let wrapper = harness.connect(endpoint_settings()).await.unwrap();

    let constraint = wrapper
        .plugin_service()
        .allowed_and_blocked()
        .expect("custom endpoint info was published");
    let allowed: HashSet<String> = constraint.allowed.expect("static list sets the allowed side");
    assert_eq!(
        allowed,
        HashSet::from(["w1".to_string(), "r1".to_string()])
    );
    assert!(constraint.blocked.is_none());

    // The blocked-out reader never shows up in the visible topology.
    let visible: HashSet<String> = wrapper
        .hosts()
        .into_iter()
        .map(|h| h.host_id_or_host().to_string())
        .collect();
    assert!(!visible.contains("r2"));

    wrapper.end().await.unwrap();
    harness.runtime.release_resources().await;
}
