// tests/integration/pool_test.rs

//! Internal connection pool scenarios, including the credential-reuse
//! behavior of pooled physical connections.

use super::fixtures::{MockCluster, TestHarness, instance_endpoint, test_settings};
use auroralink::config::WrapperSettings;
use auroralink::core::WrapperError;

fn pool_settings(password: &str) -> WrapperSettings {
    let mut settings = test_settings(&instance_endpoint("w1"));
    settings.user = "app".to_string();
    settings.password = password.to_string();
    settings.use_internal_connection_pool = true;
    settings.failure_detection_enabled = false;
    settings
}

#[tokio::test]
async fn pooled_connection_skips_credential_check_until_pool_release() {
    let cluster = MockCluster::new("w1", &[]);
    cluster.require_credentials("app", "correct-horse");
    let harness = TestHarness::new(cluster);

    // Populate the pool with a properly authenticated connection.
    let wrapper = harness
        .connect(pool_settings("correct-horse"))
        .await
        .unwrap();
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");
    wrapper.end().await.unwrap();

    // The wrong password rides the pooled physical connection: the driver is
    // never re-dialed, so the password is not re-checked.
    let wrapper = harness.connect(pool_settings("wrong")).await.unwrap();
    assert_eq!(harness.connected_instance(&wrapper).await.unwrap(), "w1");
    wrapper.end().await.unwrap();

    // Once the pools are released, the wrong password must face the server.
    harness.runtime.pooled_provider().release_pools().await;
    let err = harness.connect(pool_settings("wrong")).await.unwrap_err();
    assert!(
        matches!(&err, WrapperError::Driver { sqlstate: Some(state), .. } if state == "28000"),
        "got {err:?}"
    );

    harness.runtime.release_resources().await;
}

#[tokio::test]
async fn pool_is_keyed_by_instance_and_user() {
    let cluster = MockCluster::new("w1", &[]);
    let harness = TestHarness::new(cluster);

    let wrapper = harness
        .connect(pool_settings("anything"))
        .await
        .unwrap();
    wrapper.end().await.unwrap();
    assert_eq!(harness.runtime.pooled_provider().pool_count(), 1);

    // A different user gets a separate pool; principals never share.
    let mut other_user = pool_settings("anything");
    other_user.user = "reporting".to_string();
    let wrapper = harness.connect(other_user).await.unwrap();
    wrapper.end().await.unwrap();
    assert_eq!(harness.runtime.pooled_provider().pool_count(), 2);

    harness.runtime.release_resources().await;
}
