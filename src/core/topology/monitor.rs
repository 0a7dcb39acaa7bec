// src/core/topology/monitor.rs

//! One background monitor task per cluster. The monitor keeps its own
//! connection into the cluster, polls the dialect's topology query, and
//! publishes immutable snapshots through a watch channel so readers never
//! observe a partial host list.

use super::{TopologySnapshot, writer_of};
use crate::config::WrapperSettings;
use crate::core::dialect::DatabaseDialect;
use crate::core::driver::{DriverConnection, DriverFactory, QueryResult};
use crate::core::host::{DEFAULT_WEIGHT, HostAvailability, HostInfo, HostRole};
use crate::core::rds_url;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cluster-scoped topology monitor. Shared by every logical connection that
/// resolves to the same cluster id.
pub struct ClusterTopologyMonitor {
    cluster_id: String,
    settings: Arc<WrapperSettings>,
    dialect: Arc<dyn DatabaseDialect>,
    factory: Arc<dyn DriverFactory>,
    initial_host: HostInfo,
    instance_pattern: Option<String>,

    topology_tx: watch::Sender<TopologySnapshot>,
    last_refresh: Mutex<Option<Instant>>,
    last_writer_id: Mutex<Option<String>>,

    /// Set while the known writer is unreachable; drives the high refresh
    /// rate until a topology with a live writer is observed.
    writer_unavailable: AtomicBool,
    /// Outstanding `force_monitoring_refresh` waiters; also drives the high
    /// refresh rate.
    pending_requests: AtomicUsize,
    refresh_requested: Notify,

    monitoring_client: tokio::sync::Mutex<Option<Arc<dyn DriverConnection>>>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterTopologyMonitor {
    pub fn new(
        cluster_id: String,
        settings: Arc<WrapperSettings>,
        dialect: Arc<dyn DatabaseDialect>,
        factory: Arc<dyn DriverFactory>,
        initial_host: HostInfo,
        instance_pattern: Option<String>,
    ) -> Arc<Self> {
        let (topology_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            cluster_id,
            settings,
            dialect,
            factory,
            initial_host,
            instance_pattern,
            topology_tx,
            last_refresh: Mutex::new(None),
            last_writer_id: Mutex::new(None),
            writer_unavailable: AtomicBool::new(false),
            pending_requests: AtomicUsize::new(0),
            refresh_requested: Notify::new(),
            monitoring_client: tokio::sync::Mutex::new(None),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Spawns the monitor loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            "Topology monitor for cluster '{}' started (normal rate {:?}, high rate {:?}).",
            self.cluster_id,
            self.settings.cluster_topology_refresh_rate,
            self.settings.cluster_topology_high_refresh_rate
        );
        *task = Some(tokio::spawn(monitor.run(shutdown_rx)));
    }

    /// Stops the loop, awaits its exit, and closes the monitoring connection.
    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(
                    "Topology monitor for '{}' did not exit cleanly: {}",
                    self.cluster_id, e
                );
            }
        }
        if let Some(client) = self.monitoring_client.lock().await.take() {
            let _ = client.close().await;
        }
    }

    /// The latest published snapshot.
    pub fn current(&self) -> TopologySnapshot {
        self.topology_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TopologySnapshot> {
        self.topology_tx.subscribe()
    }

    /// Age-gated refresh: reuses the cached topology when it is fresh,
    /// otherwise queries `client` and publishes the result.
    pub async fn refresh(
        &self,
        client: &Arc<dyn DriverConnection>,
    ) -> Result<TopologySnapshot, crate::core::errors::WrapperError> {
        let fresh_within = self.settings.cluster_topology_refresh_rate;
        let is_fresh = self
            .last_refresh
            .lock()
            .map(|at| at.elapsed() < fresh_within)
            .unwrap_or(false);
        let current = self.current();
        if is_fresh && !current.is_empty() {
            return Ok(current);
        }
        let hosts = self.query_topology_on(client.as_ref()).await?;
        Ok(self.publish(hosts))
    }

    /// Queries `client` under a time budget; `None` on any failure.
    pub async fn force_refresh(
        &self,
        client: &Arc<dyn DriverConnection>,
        timeout: Duration,
    ) -> Option<TopologySnapshot> {
        let result =
            tokio::time::timeout(timeout, self.query_topology_on(client.as_ref())).await;
        match result {
            Ok(Ok(hosts)) => Some(self.publish(hosts)),
            Ok(Err(e)) => {
                debug!("Forced topology refresh failed: {}", e);
                None
            }
            Err(_) => {
                debug!("Forced topology refresh timed out after {:?}.", timeout);
                None
            }
        }
    }

    /// Asks the background loop to converge as fast as it can and waits for a
    /// qualifying snapshot: any non-empty topology, or — with `verify_writer`
    /// — one whose writer differs from the writer known at call time.
    pub async fn force_monitoring_refresh(
        &self,
        verify_writer: bool,
        timeout: Duration,
    ) -> Option<TopologySnapshot> {
        let previous_writer = self.last_writer_id.lock().clone();
        let mut rx = self.topology_tx.subscribe();
        self.pending_requests.fetch_add(1, Ordering::AcqRel);
        self.refresh_requested.notify_waiters();

        let qualifies = |snapshot: &TopologySnapshot| -> bool {
            if snapshot.is_empty() {
                return false;
            }
            if !verify_writer {
                return true;
            }
            match (writer_of(snapshot), &previous_writer) {
                (Some(writer), Some(previous)) => writer.host_id_or_host() != previous,
                (Some(_), None) => true,
                (None, _) => false,
            }
        };

        let deadline = Instant::now() + timeout;
        let result = loop {
            {
                let snapshot = rx.borrow_and_update().clone();
                if qualifies(&snapshot) {
                    break Some(snapshot);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break None;
            }
            match tokio::time::timeout(remaining, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break None,
            }
        };

        self.pending_requests.fetch_sub(1, Ordering::AcqRel);
        result
    }

    /// Which topology host `client` is connected to, by asking the server for
    /// its instance identifier.
    pub async fn identify_connection(
        &self,
        client: &Arc<dyn DriverConnection>,
    ) -> Option<HostInfo> {
        let result = client.query(self.dialect.host_id_query()).await.ok()?;
        let id = result.first("id")?.to_string();
        self.current()
            .iter()
            .find(|h| h.matches(&id))
            .cloned()
            .or_else(|| {
                // Known id but not yet in the topology; synthesize the host.
                Some(self.host_from_id(&id, false))
            })
    }

    /// Signals that the known writer is unreachable; the loop switches to the
    /// high refresh rate until a topology with a (different or restored)
    /// writer is observed.
    pub fn set_writer_unavailable(&self, unavailable: bool) {
        self.writer_unavailable.store(unavailable, Ordering::Release);
        if unavailable {
            self.refresh_requested.notify_waiters();
        }
    }

    // --- internals ---

    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        self.tick().await;
        loop {
            let delay = if self.use_high_rate() {
                self.settings.cluster_topology_high_refresh_rate
            } else {
                self.settings.cluster_topology_refresh_rate
            };
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Topology monitor for '{}' shutting down.", self.cluster_id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
                _ = self.refresh_requested.notified() => {}
            }
            self.tick().await;
        }
    }

    fn use_high_rate(&self) -> bool {
        self.writer_unavailable.load(Ordering::Acquire)
            || self.pending_requests.load(Ordering::Acquire) > 0
            || self.current().is_empty()
    }

    async fn tick(&self) {
        match self.query_topology().await {
            Ok(hosts) if !hosts.is_empty() => {
                self.publish(hosts);
            }
            Ok(_) => {
                debug!(
                    "Topology query for '{}' returned no hosts; keeping previous topology.",
                    self.cluster_id
                );
            }
            Err(e) => {
                debug!(
                    "Topology refresh for '{}' failed: {}. Keeping previous topology.",
                    self.cluster_id, e
                );
                // Reconnect on the next tick.
                if let Some(client) = self.monitoring_client.lock().await.take() {
                    let _ = client.close().await;
                }
            }
        }
    }

    /// Queries using the monitor's own connection, opening one if needed.
    async fn query_topology(
        &self,
    ) -> Result<Vec<HostInfo>, crate::core::errors::WrapperError> {
        let client = self.monitoring_connection().await?;
        match self.query_topology_on(client.as_ref()).await {
            Ok(hosts) => Ok(hosts),
            Err(e) => Err(e),
        }
    }

    async fn monitoring_connection(
        &self,
    ) -> Result<Arc<dyn DriverConnection>, crate::core::errors::WrapperError> {
        let mut guard = self.monitoring_client.lock().await;
        if let Some(client) = guard.as_ref() {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            *guard = None;
        }
        // Prefer the initial endpoint, then every known topology host.
        let mut candidates = vec![self.initial_host.clone()];
        candidates.extend(self.current().iter().cloned());
        let mut last_error = crate::core::errors::WrapperError::UnavailableHost(format!(
            "no reachable host for cluster '{}'",
            self.cluster_id
        ));
        for candidate in candidates {
            let spec = self.settings.monitoring_spec_for(&candidate);
            match self.factory.connect(&spec).await {
                Ok(client) => {
                    debug!(
                        "Topology monitor for '{}' connected to {}.",
                        self.cluster_id,
                        spec.url()
                    );
                    *guard = Some(Arc::clone(&client));
                    return Ok(client);
                }
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    async fn query_topology_on(
        &self,
        client: &dyn DriverConnection,
    ) -> Result<Vec<HostInfo>, crate::core::errors::WrapperError> {
        let Some(query) = self.dialect.topology_query() else {
            // Engines without a topology table expose only the host in use.
            let result = client.query(self.dialect.host_id_query()).await?;
            let id = result
                .first("id")
                .unwrap_or(&self.initial_host.host)
                .to_string();
            return Ok(vec![self.host_from_id(&id, true)]);
        };
        let result = client.query(query).await?;
        Ok(self.parse_topology(&result))
    }

    fn parse_topology(&self, result: &QueryResult) -> Vec<HostInfo> {
        let mut hosts: Vec<HostInfo> = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let Some(id) = row.get("id").filter(|id| !id.is_empty()) else {
                continue;
            };
            if hosts.iter().any(|h| h.host_id.as_deref() == Some(id)) {
                continue;
            }
            let is_writer = matches!(
                row.get("is_writer").map(String::as_str),
                Some("true") | Some("1")
            );
            let weight = row
                .get("weight")
                .and_then(|w| w.parse::<f64>().ok())
                .map(|w| w.max(0.0).round() as u64)
                .unwrap_or(DEFAULT_WEIGHT);
            let last_update = row
                .get("last_update")
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc));
            let mut host = self.host_from_id(id, is_writer);
            host.weight = weight;
            host.last_update = last_update;
            hosts.push(host);
        }

        // At most one writer per snapshot: on a stale multi-writer view, the
        // freshest row keeps the role.
        let writer_ids: Vec<String> = hosts
            .iter()
            .filter(|h| h.is_writer())
            .map(|h| h.host_id_or_host().to_string())
            .collect();
        if writer_ids.len() > 1 {
            let keep = hosts
                .iter()
                .filter(|h| h.is_writer())
                .max_by_key(|h| h.last_update)
                .map(|h| h.host_id_or_host().to_string());
            for host in hosts.iter_mut() {
                if host.is_writer() && Some(host.host_id_or_host().to_string()) != keep {
                    host.role = HostRole::Reader;
                }
            }
        }

        hosts.sort_by_key(|h| !h.is_writer());
        hosts
    }

    fn host_from_id(&self, id: &str, is_writer: bool) -> HostInfo {
        let host_name = match &self.instance_pattern {
            Some(pattern) => rds_url::apply_instance_pattern(pattern, id),
            None => id.to_string(),
        };
        let port = self.initial_host.port;
        let role = if is_writer {
            HostRole::Writer
        } else {
            HostRole::Reader
        };
        HostInfo::new(host_name, port, role)
            .with_host_id(id)
            .with_availability(HostAvailability::Available)
    }

    fn publish(&self, hosts: Vec<HostInfo>) -> TopologySnapshot {
        let snapshot: TopologySnapshot = Arc::new(hosts);
        *self.last_refresh.lock() = Some(Instant::now());
        if let Some(writer) = writer_of(&snapshot) {
            *self.last_writer_id.lock() = Some(writer.host_id_or_host().to_string());
            self.writer_unavailable.store(false, Ordering::Release);
        }
        self.topology_tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }
}
