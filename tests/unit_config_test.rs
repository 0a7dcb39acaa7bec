// tests/unit_config_test.rs

use auroralink::config::WrapperSettings;
use auroralink::core::WrapperError;
use std::time::Duration;

#[test]
fn defaults_match_the_documented_values() {
    let settings = WrapperSettings::default();
    assert_eq!(settings.plugins, "auroraConnectionTracker,failover,efm2");
    assert!(settings.auto_sort_plugin_order);
    assert_eq!(settings.cluster_topology_refresh_rate, Duration::from_secs(30));
    assert_eq!(
        settings.cluster_topology_high_refresh_rate,
        Duration::from_millis(100)
    );
    assert_eq!(settings.failover_timeout, Duration::from_secs(300));
    assert_eq!(
        settings.failover_reader_connect_timeout,
        Duration::from_secs(30)
    );
    assert_eq!(
        settings.failover_writer_reconnect_interval,
        Duration::from_secs(2)
    );
    assert!(settings.failure_detection_enabled);
    assert_eq!(settings.failure_detection_time, Duration::from_secs(30));
    assert_eq!(settings.failure_detection_interval, Duration::from_secs(5));
    assert_eq!(settings.failure_detection_count, 3);
    assert_eq!(settings.monitor_disposal_time, Duration::from_secs(600));
    assert_eq!(settings.reader_host_selector_strategy, "random");
    assert_eq!(settings.round_robin_default_weight, 1);
    assert!(settings.transfer_session_state_on_switch);
    assert!(settings.reset_session_state_on_close);
    assert!(settings.rollback_on_switch);
    assert!(!settings.enable_green_host_replacement);
    assert_eq!(
        settings.custom_endpoint_info_refresh_rate,
        Duration::from_secs(10)
    );
    assert!(settings.wait_for_custom_endpoint_info);
    assert_eq!(
        settings.custom_endpoint_monitor_expiration,
        Duration::from_secs(900)
    );
    assert_eq!(settings.wrapper_connect_timeout, Duration::from_secs(10));
    assert_eq!(settings.wrapper_query_timeout, Duration::from_secs(20));
}

#[test]
fn plugin_codes_split_and_trim() {
    let settings = WrapperSettings {
        plugins: " failover , efm2 ,readWriteSplitting,".to_string(),
        ..WrapperSettings::default()
    };
    assert_eq!(
        settings.plugin_codes(),
        vec!["failover", "efm2", "readWriteSplitting"]
    );
}

#[test]
fn monitoring_prefixed_keys_override_the_monitoring_connection_only() {
    let mut settings = WrapperSettings {
        host: "db.cluster-abc.us-east-2.rds.amazonaws.com".to_string(),
        user: "app".to_string(),
        password: "app-secret".to_string(),
        ..WrapperSettings::default()
    };
    settings
        .extra
        .insert("monitoring_user".to_string(), "probe".to_string());
    settings
        .extra
        .insert("monitoring_connectTimeout".to_string(), "1000".to_string());
    settings
        .extra
        .insert("application_name".to_string(), "svc".to_string());

    let host = auroralink::core::host::HostInfo::new(
        settings.host.clone(),
        Some(3306),
        auroralink::core::host::HostRole::Writer,
    );

    let regular = settings.connect_spec_for(&host);
    assert_eq!(regular.user, "app");
    assert_eq!(regular.extra.get("application_name").map(String::as_str), Some("svc"));
    assert!(!regular.extra.contains_key("monitoring_user"));

    let monitoring = settings.monitoring_spec_for(&host);
    assert_eq!(monitoring.user, "probe");
    assert_eq!(monitoring.password, "app-secret");
    assert_eq!(
        monitoring.extra.get("connectTimeout").map(String::as_str),
        Some("1000")
    );
}

#[test]
fn validation_catches_nonsense() {
    let no_host = WrapperSettings::default();
    assert!(matches!(
        no_host.validate(),
        Err(WrapperError::IllegalArgument(_))
    ));

    let bad_weight = WrapperSettings {
        host: "db.example.com".to_string(),
        round_robin_default_weight: 0,
        ..WrapperSettings::default()
    };
    assert!(matches!(
        bad_weight.validate(),
        Err(WrapperError::IllegalArgument(_))
    ));

    let bad_count = WrapperSettings {
        host: "db.example.com".to_string(),
        failure_detection_count: 0,
        ..WrapperSettings::default()
    };
    assert!(matches!(
        bad_count.validate(),
        Err(WrapperError::IllegalArgument(_))
    ));
}

#[test]
fn profile_files_round_trip_through_toml() {
    let profile = r#"
        host = "db.cluster-abc.us-east-2.rds.amazonaws.com"
        user = "app"
        password = "hunter2"
        database = "orders"
        plugins = "readWriteSplitting,failover2,efm2"
        failoverMode = "reader-or-writer"
        failoverTimeout = "30s"
        clusterTopologyHighRefreshRate = "100ms"
        readerHostSelectorStrategy = "roundRobin"
        roundRobinHostWeightPairs = "r1:2,r2:3"
    "#;
    let settings: WrapperSettings = toml::from_str(profile).unwrap();
    assert_eq!(settings.host, "db.cluster-abc.us-east-2.rds.amazonaws.com");
    assert_eq!(settings.failover_timeout, Duration::from_secs(30));
    assert_eq!(
        settings.cluster_topology_high_refresh_rate,
        Duration::from_millis(100)
    );
    assert_eq!(settings.reader_host_selector_strategy, "roundRobin");
    assert_eq!(
        settings.failover_mode,
        Some(auroralink::core::plugins::failover::FailoverMode::ReaderOrWriter)
    );
    settings.validate().unwrap();
}
