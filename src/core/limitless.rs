// src/core/limitless.rs

//! Limitless router discovery: a per-cluster background monitor refreshing
//! the weighted router list, plus a synchronous fetch path guarded by a
//! per-cluster mutex so concurrent connect attempts issue one discovery
//! query.

use crate::config::WrapperSettings;
use crate::core::cache::SlidingExpirationCacheWithCleanupTask;
use crate::core::driver::{DriverConnection, DriverFactory, QueryResult};
use crate::core::errors::WrapperError;
use crate::core::host::{DEFAULT_WEIGHT, HostInfo, HostRole};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Router lists are queried from the shard-group metadata function; the
/// columns are aliased to the shared `id` / `weight` names.
pub const ROUTER_QUERY: &str =
    "SELECT router_endpoint AS id, round(10 - load * 10) AS weight \
     FROM aurora_limitless_router_endpoints()";

const ROUTER_REFRESH_INTERVAL: Duration = Duration::from_millis(7500);
const ROUTER_MONITOR_TTL: Duration = Duration::from_secs(600);
const ROUTER_MONITOR_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared router state per cluster id.
pub struct LimitlessRouterService {
    routers: Arc<DashMap<String, Arc<Vec<HostInfo>>>>,
    fetch_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    monitors: SlidingExpirationCacheWithCleanupTask<String, Arc<LimitlessRouterMonitor>>,
}

impl Default for LimitlessRouterService {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitlessRouterService {
    pub fn new() -> Self {
        let monitors = SlidingExpirationCacheWithCleanupTask::new(
            ROUTER_MONITOR_CLEANUP_INTERVAL,
            None,
            Some(Arc::new(|monitor: Arc<LimitlessRouterMonitor>| {
                tokio::spawn(async move { monitor.stop().await });
            })),
        );
        Self {
            routers: Arc::new(DashMap::new()),
            fetch_locks: DashMap::new(),
            monitors,
        }
    }

    pub fn routers(&self, cluster_id: &str) -> Option<Arc<Vec<HostInfo>>> {
        self.routers.get(cluster_id).map(|r| Arc::clone(&r))
    }

    /// Starts (or joins) the background router monitor for the cluster.
    pub fn ensure_monitor(
        &self,
        cluster_id: &str,
        settings: &Arc<WrapperSettings>,
        factory: &Arc<dyn DriverFactory>,
        initial_host: &HostInfo,
    ) {
        self.monitors.compute_if_absent(
            cluster_id.to_string(),
            || {
                let monitor = LimitlessRouterMonitor::new(
                    cluster_id.to_string(),
                    Arc::clone(settings),
                    Arc::clone(factory),
                    initial_host.clone(),
                    Arc::clone(&self.routers),
                );
                monitor.start();
                monitor
            },
            ROUTER_MONITOR_TTL,
        );
    }

    /// Synchronous discovery for connect paths that cannot wait for the
    /// monitor. The per-cluster mutex collapses concurrent callers into one
    /// query.
    pub async fn fetch_routers(
        &self,
        cluster_id: &str,
        client: &Arc<dyn DriverConnection>,
    ) -> Result<Arc<Vec<HostInfo>>, WrapperError> {
        let lock = self
            .fetch_locks
            .entry(cluster_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(routers) = self.routers(cluster_id) {
            return Ok(routers);
        }
        let result = client.query(ROUTER_QUERY).await?;
        let routers = Arc::new(parse_routers(&result, client.connected_url().as_str()));
        self.routers
            .insert(cluster_id.to_string(), Arc::clone(&routers));
        Ok(routers)
    }

    /// Weighted-random pick over the known routers.
    pub fn select_router(&self, cluster_id: &str) -> Option<HostInfo> {
        let routers = self.routers(cluster_id)?;
        if routers.is_empty() {
            return None;
        }
        let total: u64 = routers.iter().map(|r| r.weight.max(1)).sum();
        let mut remaining = rand::thread_rng().gen_range(0..total);
        for router in routers.iter() {
            let weight = router.weight.max(1);
            if remaining < weight {
                return Some(router.clone());
            }
            remaining -= weight;
        }
        routers.last().cloned()
    }

    pub async fn release(&self) {
        self.monitors.clear().await;
        self.routers.clear();
        self.fetch_locks.clear();
    }
}

fn parse_routers(result: &QueryResult, fallback_port_source: &str) -> Vec<HostInfo> {
    let fallback_port = fallback_port_source
        .rsplit_once(':')
        .and_then(|(_, p)| p.parse::<u16>().ok());
    result
        .rows
        .iter()
        .filter_map(|row| {
            let id = row.get("id")?;
            let weight = row
                .get("weight")
                .and_then(|w| w.parse::<f64>().ok())
                .map(|w| w.max(1.0).round() as u64)
                .unwrap_or(DEFAULT_WEIGHT);
            Some(
                HostInfo::new(id.clone(), fallback_port, HostRole::Writer)
                    .with_host_id(id.clone())
                    .with_weight(weight),
            )
        })
        .collect()
}

/// Polls the router list in the background for one cluster.
pub struct LimitlessRouterMonitor {
    cluster_id: String,
    settings: Arc<WrapperSettings>,
    factory: Arc<dyn DriverFactory>,
    initial_host: HostInfo,
    routers: Arc<DashMap<String, Arc<Vec<HostInfo>>>>,
    monitoring_client: tokio::sync::Mutex<Option<Arc<dyn DriverConnection>>>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LimitlessRouterMonitor {
    fn new(
        cluster_id: String,
        settings: Arc<WrapperSettings>,
        factory: Arc<dyn DriverFactory>,
        initial_host: HostInfo,
        routers: Arc<DashMap<String, Arc<Vec<HostInfo>>>>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            cluster_id,
            settings,
            factory,
            initial_host,
            routers,
            monitoring_client: tokio::sync::Mutex::new(None),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            "Limitless router monitor for '{}' started.",
            self.cluster_id
        );
        *task = Some(tokio::spawn(monitor.run(shutdown_rx)));
    }

    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(
                    "Limitless router monitor for '{}' did not exit cleanly: {}",
                    self.cluster_id, e
                );
            }
        }
        if let Some(client) = self.monitoring_client.lock().await.take() {
            let _ = client.close().await;
        }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(ROUTER_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!(
                        "Limitless router monitor for '{}' shutting down.",
                        self.cluster_id
                    );
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        let client = {
            let mut guard = self.monitoring_client.lock().await;
            match guard.as_ref() {
                Some(client) if !client.is_closed() => Arc::clone(client),
                _ => {
                    let spec = self.settings.monitoring_spec_for(&self.initial_host);
                    match self.factory.connect(&spec).await {
                        Ok(client) => {
                            *guard = Some(Arc::clone(&client));
                            client
                        }
                        Err(e) => {
                            debug!(
                                "Limitless monitor for '{}' cannot connect: {}",
                                self.cluster_id, e
                            );
                            return;
                        }
                    }
                }
            }
        };
        match client.query(ROUTER_QUERY).await {
            Ok(result) => {
                let routers = parse_routers(&result, client.connected_url().as_str());
                self.routers
                    .insert(self.cluster_id.clone(), Arc::new(routers));
            }
            Err(e) => {
                debug!(
                    "Limitless router refresh for '{}' failed: {}",
                    self.cluster_id, e
                );
                let mut guard = self.monitoring_client.lock().await;
                if let Some(current) = guard.take() {
                    let _ = current.close().await;
                }
            }
        }
    }
}
