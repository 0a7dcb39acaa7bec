// src/core/topology/provider.rs

//! The RDS host-list provider: resolves the cluster id from the initial URL,
//! owns the link to the shared per-cluster topology monitor, and answers
//! topology questions for one logical connection.

use super::{ClusterTopologyMonitor, TopologySnapshot};
use crate::config::WrapperSettings;
use crate::core::dialect::DatabaseDialect;
use crate::core::driver::{DriverConnection, DriverFactory};
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use crate::core::rds_url::{self, RdsUrlType};
use crate::core::runtime::WrapperRuntime;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Per-logical-connection facade over the shared topology machinery.
pub struct RdsHostListProvider {
    cluster_id: String,
    initial_host: HostInfo,
    monitor: Arc<ClusterTopologyMonitor>,
}

impl RdsHostListProvider {
    /// Resolves the cluster id and joins (or creates) the cluster's shared
    /// monitor in the runtime registry.
    pub fn new(
        runtime: &Arc<WrapperRuntime>,
        settings: &Arc<WrapperSettings>,
        dialect: &Arc<dyn DatabaseDialect>,
        factory: &Arc<dyn DriverFactory>,
    ) -> Self {
        let initial_host = initial_host_from_settings(settings, dialect.as_ref());
        let instance_pattern = settings
            .cluster_instance_host_pattern
            .clone()
            .or_else(|| rds_url::instance_pattern(&initial_host.host));
        let cluster_id = resolve_cluster_id(settings, &initial_host);
        debug!(
            "Host list provider resolved cluster id '{}' for {}.",
            cluster_id,
            initial_host.url()
        );

        let monitor = runtime.topology_monitor(&cluster_id, || {
            ClusterTopologyMonitor::new(
                cluster_id.clone(),
                Arc::clone(settings),
                Arc::clone(dialect),
                Arc::clone(factory),
                initial_host.clone(),
                instance_pattern.clone(),
            )
        });

        Self {
            cluster_id,
            initial_host,
            monitor,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn initial_host(&self) -> &HostInfo {
        &self.initial_host
    }

    pub fn monitor(&self) -> &Arc<ClusterTopologyMonitor> {
        &self.monitor
    }

    /// The latest published snapshot; the initial host when nothing has been
    /// published yet.
    pub fn hosts(&self) -> Vec<HostInfo> {
        let snapshot = self.monitor.current();
        if snapshot.is_empty() {
            vec![self.initial_host.clone()]
        } else {
            snapshot.as_ref().clone()
        }
    }

    /// Cached-if-fresh refresh through `client` (spec: blocking variant
    /// always awaits a live query when the cache has gone stale).
    pub async fn refresh(
        &self,
        client: &Arc<dyn DriverConnection>,
    ) -> Result<TopologySnapshot, WrapperError> {
        self.monitor.refresh(client).await
    }

    /// Unconditional refresh through `client` under a time budget.
    pub async fn force_refresh(
        &self,
        client: &Arc<dyn DriverConnection>,
        timeout: Duration,
    ) -> Option<TopologySnapshot> {
        self.monitor.force_refresh(client, timeout).await
    }

    /// Fast-converging background refresh; see the monitor for semantics.
    pub async fn force_monitoring_refresh(
        &self,
        verify_writer: bool,
        timeout: Duration,
    ) -> Option<TopologySnapshot> {
        self.monitor
            .force_monitoring_refresh(verify_writer, timeout)
            .await
    }

    /// Which topology host `client` is connected to.
    pub async fn identify_connection(
        &self,
        client: &Arc<dyn DriverConnection>,
    ) -> Option<HostInfo> {
        self.monitor.identify_connection(client).await
    }
}

/// The host the configuration points at, with its role guessed from the URL
/// shape (confirmed by the first topology refresh).
fn initial_host_from_settings(
    settings: &WrapperSettings,
    dialect: &dyn DatabaseDialect,
) -> HostInfo {
    let role = match rds_url::identify(&settings.host) {
        RdsUrlType::RdsReaderCluster => HostRole::Reader,
        RdsUrlType::RdsWriterCluster => HostRole::Writer,
        _ => HostRole::Unknown,
    };
    let port = settings.port.or(Some(dialect.default_port()));
    let mut host = HostInfo::new(settings.host.clone(), port, role);
    if rds_url::identify(&settings.host) == RdsUrlType::RdsInstance {
        if let Some(id) = rds_url::extract_identifier(&settings.host) {
            host = host.with_host_id(id);
        }
    }
    host
}

/// Cluster-id derivation. Every endpoint shape of one cluster shares the DNS
/// suffix (`?.xyz.region.rds.amazonaws.com`), so the instance pattern is used
/// as the shared id: a writer-cluster endpoint, a reader-cluster endpoint,
/// and an instance endpoint of the same cluster all resolve identically.
fn resolve_cluster_id(settings: &WrapperSettings, initial_host: &HostInfo) -> String {
    if let Some(configured) = &settings.cluster_id {
        return configured.clone();
    }
    if let Some(pattern) = settings
        .cluster_instance_host_pattern
        .clone()
        .or_else(|| rds_url::instance_pattern(&initial_host.host))
    {
        return pattern;
    }
    if !initial_host.host.is_empty() && !rds_url::is_ip_address(&initial_host.host) {
        return initial_host.url();
    }
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dialect::MysqlDialect;

    #[test]
    fn cluster_id_is_shared_across_endpoint_shapes() {
        let writer = WrapperSettings {
            host: "db.cluster-xyz42.us-east-2.rds.amazonaws.com".to_string(),
            ..Default::default()
        };
        let reader = WrapperSettings {
            host: "db.cluster-ro-xyz42.us-east-2.rds.amazonaws.com".to_string(),
            ..Default::default()
        };
        let instance = WrapperSettings {
            host: "db-instance-1.xyz42.us-east-2.rds.amazonaws.com".to_string(),
            ..Default::default()
        };
        let dialect = MysqlDialect;
        let id = |s: &WrapperSettings| {
            resolve_cluster_id(s, &initial_host_from_settings(s, &dialect))
        };
        assert_eq!(id(&writer), id(&reader));
        assert_eq!(id(&writer), id(&instance));
    }

    #[test]
    fn configured_cluster_id_wins() {
        let settings = WrapperSettings {
            host: "db.cluster-xyz42.us-east-2.rds.amazonaws.com".to_string(),
            cluster_id: Some("my-cluster".to_string()),
            ..Default::default()
        };
        let host = initial_host_from_settings(&settings, &MysqlDialect);
        assert_eq!(resolve_cluster_id(&settings, &host), "my-cluster");
    }
}
