// src/config.rs

//! Manages wrapper configuration: recognized properties, defaults, validation,
//! and promotion of `monitoring_`-prefixed overrides.

use crate::core::dialect::DialectCode;
use crate::core::driver::ConnectSpec;
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use crate::core::plugins::failover::FailoverMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Prefix marking properties that apply only to the health monitor's
/// dedicated connection, overriding the unprefixed value.
pub const MONITORING_PROPERTY_PREFIX: &str = "monitoring_";

/// Every property the wrapper recognizes. Unknown keys land in `extra` and
/// are forwarded to the underlying driver untouched.
///
/// Durations are humantime strings in profile files (`"30s"`, `"100ms"`).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct WrapperSettings {
    /// Comma list of plugin codes, applied in order before priority sorting.
    pub plugins: String,
    /// Reorder the plugin chain by per-plugin priority weight.
    pub auto_sort_plugin_order: bool,

    pub user: String,
    pub password: String,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,

    /// `?`-pattern for building instance DNS names; derived for RDS names.
    pub cluster_instance_host_pattern: Option<String>,
    /// Overrides the cluster id derived from the initial URL.
    pub cluster_id: Option<String>,

    #[serde(with = "humantime_serde")]
    pub cluster_topology_refresh_rate: Duration,
    #[serde(with = "humantime_serde")]
    pub cluster_topology_high_refresh_rate: Duration,

    pub failover_mode: Option<FailoverMode>,
    #[serde(with = "humantime_serde")]
    pub failover_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub failover_reader_connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub failover_writer_reconnect_interval: Duration,

    pub failure_detection_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub failure_detection_time: Duration,
    #[serde(with = "humantime_serde")]
    pub failure_detection_interval: Duration,
    pub failure_detection_count: u32,
    #[serde(with = "humantime_serde")]
    pub monitor_disposal_time: Duration,

    /// One of `random`, `roundRobin`, `leastConnections`, `highestWeight`.
    pub reader_host_selector_strategy: String,
    /// How long the splitter's cached reader stays usable; zero = no expiry.
    #[serde(with = "humantime_serde")]
    pub reader_cache_keep_alive: Duration,
    /// `host:weight,host:weight` pairs for the round-robin selector.
    pub round_robin_host_weight_pairs: String,
    pub round_robin_default_weight: u64,

    pub transfer_session_state_on_switch: bool,
    pub reset_session_state_on_close: bool,
    pub rollback_on_switch: bool,

    pub enable_green_host_replacement: bool,

    /// Route instance-endpoint connects through the internal pools.
    pub use_internal_connection_pool: bool,

    #[serde(with = "humantime_serde")]
    pub custom_endpoint_info_refresh_rate: Duration,
    pub wait_for_custom_endpoint_info: bool,
    #[serde(with = "humantime_serde")]
    pub wait_for_custom_endpoint_info_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub custom_endpoint_monitor_expiration: Duration,
    pub custom_endpoint_region: Option<String>,

    #[serde(with = "humantime_serde")]
    pub wrapper_connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub wrapper_query_timeout: Duration,

    pub dialect: DialectCode,

    /// Unrecognized keys, forwarded to the driver. `monitoring_`-prefixed
    /// keys are additionally promoted to the monitoring connection.
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Default for WrapperSettings {
    fn default() -> Self {
        Self {
            plugins: default_plugins(),
            auto_sort_plugin_order: true,
            user: String::new(),
            password: String::new(),
            host: String::new(),
            port: None,
            database: String::new(),
            cluster_instance_host_pattern: None,
            cluster_id: None,
            cluster_topology_refresh_rate: Duration::from_secs(30),
            cluster_topology_high_refresh_rate: Duration::from_millis(100),
            failover_mode: None,
            failover_timeout: Duration::from_secs(300),
            failover_reader_connect_timeout: Duration::from_secs(30),
            failover_writer_reconnect_interval: Duration::from_secs(2),
            failure_detection_enabled: true,
            failure_detection_time: Duration::from_secs(30),
            failure_detection_interval: Duration::from_secs(5),
            failure_detection_count: 3,
            monitor_disposal_time: Duration::from_secs(600),
            reader_host_selector_strategy: "random".to_string(),
            reader_cache_keep_alive: Duration::ZERO,
            round_robin_host_weight_pairs: String::new(),
            round_robin_default_weight: 1,
            transfer_session_state_on_switch: true,
            reset_session_state_on_close: true,
            rollback_on_switch: true,
            enable_green_host_replacement: false,
            use_internal_connection_pool: false,
            custom_endpoint_info_refresh_rate: Duration::from_secs(10),
            wait_for_custom_endpoint_info: true,
            wait_for_custom_endpoint_info_timeout: Duration::from_secs(10),
            custom_endpoint_monitor_expiration: Duration::from_secs(900),
            custom_endpoint_region: None,
            wrapper_connect_timeout: Duration::from_secs(10),
            wrapper_query_timeout: Duration::from_secs(20),
            dialect: DialectCode::AuroraMysql,
            extra: HashMap::new(),
        }
    }
}

fn default_plugins() -> String {
    "auroraConnectionTracker,failover,efm2".to_string()
}

impl WrapperSettings {
    /// Loads settings from a TOML profile file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let settings: WrapperSettings = toml::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// The configured plugin codes, in configured order.
    pub fn plugin_codes(&self) -> Vec<String> {
        self.plugins
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `monitoring_`-prefixed keys with the prefix stripped.
    pub fn monitoring_overrides(&self) -> HashMap<String, String> {
        self.extra
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(MONITORING_PROPERTY_PREFIX)
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect()
    }

    /// Driver-facing properties: everything unrecognized minus the
    /// monitoring-only overrides.
    pub fn driver_extra(&self) -> HashMap<String, String> {
        self.extra
            .iter()
            .filter(|(key, _)| !key.starts_with(MONITORING_PROPERTY_PREFIX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// The connect spec for dialing `host` with this configuration.
    pub fn connect_spec_for(&self, host: &HostInfo) -> ConnectSpec {
        ConnectSpec {
            host: host.host.clone(),
            port: host.port.or(self.port),
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            extra: self.driver_extra(),
            connect_timeout: Some(self.wrapper_connect_timeout),
        }
    }

    /// The connect spec for the health monitor's dedicated connection:
    /// the regular spec with every `monitoring_` override applied on top.
    pub fn monitoring_spec_for(&self, host: &HostInfo) -> ConnectSpec {
        let mut spec = self.connect_spec_for(host);
        for (key, value) in self.monitoring_overrides() {
            match key.as_str() {
                "user" => spec.user = value,
                "password" => spec.password = value,
                "database" => spec.database = value,
                _ => {
                    spec.extra.insert(key, value);
                }
            }
        }
        spec
    }

    pub fn validate(&self) -> Result<(), WrapperError> {
        if self.host.is_empty() {
            return Err(WrapperError::IllegalArgument(
                "host must not be empty".to_string(),
            ));
        }
        if self.failure_detection_count < 1 {
            return Err(WrapperError::IllegalArgument(
                "failureDetectionCount must be >= 1".to_string(),
            ));
        }
        if self.round_robin_default_weight < 1 {
            return Err(WrapperError::IllegalArgument(
                "roundRobinDefaultWeight must be >= 1".to_string(),
            ));
        }
        if self.cluster_topology_high_refresh_rate > self.cluster_topology_refresh_rate {
            warn!(
                "High-rate topology refresh ({:?}) is slower than the normal rate ({:?}).",
                self.cluster_topology_high_refresh_rate, self.cluster_topology_refresh_rate
            );
        }
        Ok(())
    }
}
