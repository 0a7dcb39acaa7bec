// tests/integration/fixtures.rs

//! Common test fixtures: an in-memory mock cluster with a scriptable driver,
//! a control-plane stub, and settings tuned for fast test runs.

use async_trait::async_trait;
use auroralink::config::WrapperSettings;
use auroralink::connection::ConnectionWrapper;
use auroralink::core::custom_endpoint::{CustomEndpointRoleType, DbClusterEndpoint, RdsApiClient};
use auroralink::core::driver::{ConnectSpec, DriverConnection, DriverFactory, QueryResult, Row};
use auroralink::core::errors::WrapperError;
use auroralink::core::plugins::factory::AuxServices;
use auroralink::core::rds_url::{self, RdsUrlType};
use auroralink::core::runtime::WrapperRuntime;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const CLUSTER_SUFFIX: &str = "xyz42.us-east-2.rds.amazonaws.com";

pub fn writer_endpoint() -> String {
    format!("db.cluster-{CLUSTER_SUFFIX}")
}

pub fn reader_endpoint() -> String {
    format!("db.cluster-ro-{CLUSTER_SUFFIX}")
}

pub fn custom_endpoint(name: &str) -> String {
    format!("{name}.cluster-custom-{CLUSTER_SUFFIX}")
}

pub fn instance_endpoint(id: &str) -> String {
    format!("{id}.{CLUSTER_SUFFIX}")
}

#[derive(Debug, Clone)]
struct InstanceState {
    writer: bool,
    healthy: bool,
    hanging: bool,
}

/// The scripted cluster every mock connection talks to.
pub struct MockCluster {
    /// Instance id -> state, in declaration order (writer first by
    /// convention, like a real topology query).
    instances: Mutex<Vec<(String, InstanceState)>>,
    /// `None` accepts any credentials.
    credentials: Mutex<Option<HashMap<String, String>>>,
    /// Custom endpoint id -> member instance ids.
    custom_members: Mutex<HashMap<String, Vec<String>>>,
    statements: Mutex<Vec<(String, String)>>,
    connect_counts: Mutex<HashMap<String, usize>>,
    open_connections: Mutex<Vec<Weak<MockConnection>>>,
}

impl MockCluster {
    pub fn new(writer: &str, readers: &[&str]) -> Arc<Self> {
        let mut instances = vec![(
            writer.to_string(),
            InstanceState {
                writer: true,
                healthy: true,
                hanging: false,
            },
        )];
        for reader in readers {
            instances.push((
                reader.to_string(),
                InstanceState {
                    writer: false,
                    healthy: true,
                    hanging: false,
                },
            ));
        }
        Arc::new(Self {
            instances: Mutex::new(instances),
            credentials: Mutex::new(None),
            custom_members: Mutex::new(HashMap::new()),
            statements: Mutex::new(Vec::new()),
            connect_counts: Mutex::new(HashMap::new()),
            open_connections: Mutex::new(Vec::new()),
        })
    }

    pub fn require_credentials(&self, user: &str, password: &str) {
        let mut credentials = self.credentials.lock();
        credentials
            .get_or_insert_with(HashMap::new)
            .insert(user.to_string(), password.to_string());
    }

    /// Promotes `id` to writer, demoting the old writer and killing its open
    /// connections, the way a cluster failover does.
    pub fn promote(&self, id: &str) {
        let old_writer = self.writer_id();
        {
            let mut instances = self.instances.lock();
            for (instance_id, state) in instances.iter_mut() {
                state.writer = instance_id == id;
            }
        }
        if let Some(old_writer) = old_writer {
            if old_writer != id {
                self.kill_connections_to(&old_writer);
            }
        }
    }

    pub fn set_healthy(&self, id: &str, healthy: bool) {
        {
            let mut instances = self.instances.lock();
            for (instance_id, state) in instances.iter_mut() {
                if instance_id == id {
                    state.healthy = healthy;
                }
            }
        }
        if !healthy {
            self.kill_connections_to(id);
        }
    }

    pub fn set_all_unhealthy(&self) {
        let ids: Vec<String> = self
            .instances
            .lock()
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.set_healthy(&id, false);
        }
    }

    /// Makes queries against `id` stall until the connection is aborted.
    pub fn set_hanging(&self, id: &str, hanging: bool) {
        let mut instances = self.instances.lock();
        for (instance_id, state) in instances.iter_mut() {
            if instance_id == id {
                state.hanging = hanging;
            }
        }
    }

    pub fn set_custom_members(&self, endpoint_id: &str, members: &[&str]) {
        self.custom_members.lock().insert(
            endpoint_id.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    pub fn writer_id(&self) -> Option<String> {
        self.instances
            .lock()
            .iter()
            .find(|(_, state)| state.writer)
            .map(|(id, _)| id.clone())
    }

    pub fn connect_count(&self, id: &str) -> usize {
        self.connect_counts.lock().get(id).copied().unwrap_or(0)
    }

    pub fn statements_for(&self, id: &str) -> Vec<String> {
        self.statements
            .lock()
            .iter()
            .filter(|(instance, _)| instance == id)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    fn kill_connections_to(&self, id: &str) {
        let connections = self.open_connections.lock();
        for weak in connections.iter() {
            if let Some(conn) = weak.upgrade() {
                if conn.instance_id == id {
                    conn.aborted.store(true, Ordering::Release);
                }
            }
        }
    }

    fn state_of(&self, id: &str) -> Option<InstanceState> {
        self.instances
            .lock()
            .iter()
            .find(|(instance_id, _)| instance_id == id)
            .map(|(_, state)| state.clone())
    }

    /// DNS-level resolution of an endpoint name to an instance id.
    fn resolve(&self, host: &str) -> Result<String, WrapperError> {
        match rds_url::identify(host) {
            RdsUrlType::RdsWriterCluster => self
                .writer_id()
                .filter(|id| self.state_of(id).map(|s| s.healthy).unwrap_or(false))
                .ok_or_else(|| WrapperError::Network("connect ECONNREFUSED".to_string())),
            RdsUrlType::RdsReaderCluster => self
                .instances
                .lock()
                .iter()
                .find(|(_, state)| !state.writer && state.healthy)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| WrapperError::Network("connect ECONNREFUSED".to_string())),
            RdsUrlType::RdsCustomCluster => {
                let endpoint_id = rds_url::extract_identifier(host)
                    .ok_or_else(|| WrapperError::Network("connect ECONNREFUSED".to_string()))?;
                let members = self
                    .custom_members
                    .lock()
                    .get(&endpoint_id)
                    .cloned()
                    .unwrap_or_default();
                members
                    .iter()
                    .find(|id| self.state_of(id).map(|s| s.healthy).unwrap_or(false))
                    .cloned()
                    .ok_or_else(|| WrapperError::Network("connect ECONNREFUSED".to_string()))
            }
            _ => rds_url::extract_identifier(host)
                .filter(|id| self.state_of(id).is_some())
                .ok_or_else(|| WrapperError::Network("connect ECONNREFUSED".to_string())),
        }
    }
}

pub struct MockConnection {
    cluster: Arc<MockCluster>,
    pub instance_id: String,
    url: String,
    closed: AtomicBool,
    aborted: AtomicBool,
}

impl MockConnection {
    fn check_usable(&self) -> Result<InstanceState, WrapperError> {
        if self.closed.load(Ordering::Acquire) || self.aborted.load(Ordering::Acquire) {
            return Err(WrapperError::Network(
                "Connection terminated unexpectedly".to_string(),
            ));
        }
        let state = self
            .cluster
            .state_of(&self.instance_id)
            .ok_or_else(|| WrapperError::Network("read ECONNRESET".to_string()))?;
        if !state.healthy {
            return Err(WrapperError::Network("read ECONNRESET".to_string()));
        }
        Ok(state)
    }

    /// Stalls while the instance hangs, failing once the connection is cut.
    async fn maybe_hang(&self) -> Result<(), WrapperError> {
        loop {
            let state = self.check_usable()?;
            if !state.hanging {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn row(pairs: &[(&str, String)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn query(&self, sql: &str) -> Result<QueryResult, WrapperError> {
        self.maybe_hang().await?;
        let state = self.check_usable()?;

        if sql.contains("replica_host_status") {
            if sql.contains("SERVER_ID") {
                let rows = self
                    .cluster
                    .instances
                    .lock()
                    .iter()
                    .map(|(id, state)| {
                        Self::row(&[
                            ("id", id.clone()),
                            ("is_writer", state.writer.to_string()),
                            ("weight", "100".to_string()),
                        ])
                    })
                    .collect();
                return Ok(QueryResult {
                    rows,
                    rows_affected: 0,
                });
            }
            // Dialect probe.
            return Ok(QueryResult {
                rows: vec![Self::row(&[("1", "1".to_string())])],
                rows_affected: 0,
            });
        }
        if sql.contains("@@aurora_server_id") {
            return Ok(QueryResult {
                rows: vec![Self::row(&[("id", self.instance_id.clone())])],
                rows_affected: 0,
            });
        }
        if sql.contains("@@innodb_read_only") {
            return Ok(QueryResult {
                rows: vec![Self::row(&[("is_reader", (!state.writer).to_string())])],
                rows_affected: 0,
            });
        }
        if sql.trim() == "SELECT 1" {
            return Ok(QueryResult {
                rows: vec![Self::row(&[("1", "1".to_string())])],
                rows_affected: 0,
            });
        }

        self.cluster
            .statements
            .lock()
            .push((self.instance_id.clone(), sql.to_string()));
        Ok(QueryResult {
            rows: vec![Self::row(&[("instance", self.instance_id.clone())])],
            rows_affected: 0,
        })
    }

    async fn execute(&self, sql: &str) -> Result<u64, WrapperError> {
        self.maybe_hang().await?;
        self.check_usable()?;
        self.cluster
            .statements
            .lock()
            .push((self.instance_id.clone(), sql.to_string()));
        Ok(1)
    }

    async fn ping(&self) -> Result<(), WrapperError> {
        self.maybe_hang().await?;
        self.check_usable()?;
        Ok(())
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    async fn close(&self) -> Result<(), WrapperError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.aborted.load(Ordering::Acquire)
    }

    fn connected_url(&self) -> String {
        self.url.clone()
    }
}

pub struct MockDriverFactory {
    pub cluster: Arc<MockCluster>,
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn connect(&self, spec: &ConnectSpec) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let instance_id = self.cluster.resolve(&spec.host)?;
        let state = self
            .cluster
            .state_of(&instance_id)
            .ok_or_else(|| WrapperError::Network("connect ECONNREFUSED".to_string()))?;
        if !state.healthy {
            return Err(WrapperError::Network("connect ECONNREFUSED".to_string()));
        }
        if let Some(credentials) = self.cluster.credentials.lock().as_ref() {
            match credentials.get(&spec.user) {
                Some(expected) if *expected == spec.password => {}
                _ => {
                    return Err(WrapperError::driver_with_state(
                        "Access denied for user",
                        "28000",
                    ));
                }
            }
        }
        let connection = Arc::new(MockConnection {
            cluster: Arc::clone(&self.cluster),
            instance_id: instance_id.clone(),
            url: spec.url(),
            closed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
        });
        *self
            .cluster
            .connect_counts
            .lock()
            .entry(instance_id)
            .or_insert(0) += 1;
        {
            let mut open = self.cluster.open_connections.lock();
            open.retain(|weak| weak.upgrade().is_some());
            open.push(Arc::downgrade(&connection));
        }
        Ok(connection as Arc<dyn DriverConnection>)
    }
}

/// Control-plane stub answering `DescribeDBClusterEndpoints` from the
/// cluster's scripted member lists.
pub struct MockRdsApiClient {
    pub cluster: Arc<MockCluster>,
}

#[async_trait]
impl RdsApiClient for MockRdsApiClient {
    async fn describe_custom_endpoints(
        &self,
        endpoint_identifier: &str,
        _region: &str,
    ) -> Result<Vec<DbClusterEndpoint>, WrapperError> {
        let members = self
            .cluster
            .custom_members
            .lock()
            .get(endpoint_identifier)
            .cloned();
        let Some(members) = members else {
            return Ok(Vec::new());
        };
        Ok(vec![DbClusterEndpoint {
            endpoint_identifier: endpoint_identifier.to_string(),
            cluster_identifier: "db".to_string(),
            url: custom_endpoint(endpoint_identifier),
            role_type: CustomEndpointRoleType::Any,
            static_members: members,
            excluded_members: Vec::new(),
        }])
    }
}

/// Settings tuned so scenarios complete in milliseconds instead of minutes.
pub fn test_settings(host: &str) -> WrapperSettings {
    WrapperSettings {
        host: host.to_string(),
        user: "app".to_string(),
        password: "app-secret".to_string(),
        database: "orders".to_string(),
        cluster_topology_high_refresh_rate: Duration::from_millis(25),
        failover_timeout: Duration::from_secs(5),
        failover_reader_connect_timeout: Duration::from_millis(500),
        failover_writer_reconnect_interval: Duration::from_millis(50),
        failure_detection_time: Duration::from_millis(50),
        failure_detection_interval: Duration::from_millis(50),
        failure_detection_count: 2,
        custom_endpoint_info_refresh_rate: Duration::from_millis(50),
        wrapper_connect_timeout: Duration::from_secs(3),
        wrapper_query_timeout: Duration::from_secs(3),
        ..WrapperSettings::default()
    }
}

pub struct TestHarness {
    pub cluster: Arc<MockCluster>,
    pub runtime: Arc<WrapperRuntime>,
    pub aux: AuxServices,
}

impl TestHarness {
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        let factory: Arc<dyn DriverFactory> = Arc::new(MockDriverFactory {
            cluster: Arc::clone(&cluster),
        });
        let runtime = WrapperRuntime::new(factory);
        let aux = AuxServices {
            rds_api: Some(Arc::new(MockRdsApiClient {
                cluster: Arc::clone(&cluster),
            })),
            ..AuxServices::default()
        };
        Self {
            cluster,
            runtime,
            aux,
        }
    }

    pub fn factory(&self) -> Arc<dyn DriverFactory> {
        Arc::new(MockDriverFactory {
            cluster: Arc::clone(&self.cluster),
        })
    }

    pub async fn connect(
        &self,
        settings: WrapperSettings,
    ) -> Result<ConnectionWrapper, WrapperError> {
        ConnectionWrapper::builder(settings, Arc::clone(&self.runtime), self.factory())
            .with_aux_services(self.aux.clone())
            .connect()
            .await
    }

    /// The instance a plain application query lands on right now.
    pub async fn connected_instance(
        &self,
        wrapper: &ConnectionWrapper,
    ) -> Result<String, WrapperError> {
        let result = wrapper.query("SELECT 42 AS probe").await?;
        Ok(result.first("instance").unwrap_or_default().to_string())
    }
}
