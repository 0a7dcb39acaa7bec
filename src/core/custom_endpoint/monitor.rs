// src/core/custom_endpoint/monitor.rs

//! One monitor task per custom-endpoint URL. Polls the control plane,
//! diffs against the last seen description, and pushes allow/block sets to
//! every subscribed plugin service.

use super::{AllowedAndBlockedHosts, AllowedHostsSink, CustomEndpointInfo, RdsApiClient};
use crate::core::telemetry::{TelemetryCounter, TelemetryFactory};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct CustomEndpointMonitor {
    endpoint_id: String,
    endpoint_url: String,
    region: String,
    rds_client: Arc<dyn RdsApiClient>,
    refresh_rate: Duration,

    subscribers: DashMap<u64, Arc<dyn AllowedHostsSink>>,
    next_subscriber_id: AtomicU64,
    last_info: Mutex<Option<CustomEndpointInfo>>,
    info_seen_tx: watch::Sender<bool>,

    changes_counter: Arc<dyn TelemetryCounter>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CustomEndpointMonitor {
    pub fn new(
        endpoint_id: String,
        endpoint_url: String,
        region: String,
        rds_client: Arc<dyn RdsApiClient>,
        refresh_rate: Duration,
        telemetry: &Arc<dyn TelemetryFactory>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (info_seen_tx, _) = watch::channel(false);
        Arc::new(Self {
            endpoint_id,
            endpoint_url,
            region,
            rds_client,
            refresh_rate,
            subscribers: DashMap::new(),
            next_subscriber_id: AtomicU64::new(0),
            last_info: Mutex::new(None),
            info_seen_tx,
            changes_counter: telemetry.create_counter("customEndpoint.infoChanged"),
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            "Custom endpoint monitor for '{}' started (refresh every {:?}).",
            self.endpoint_url, self.refresh_rate
        );
        *task = Some(tokio::spawn(monitor.run(shutdown_rx)));
    }

    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(
                    "Custom endpoint monitor for '{}' did not exit cleanly: {}",
                    self.endpoint_url, e
                );
            }
        }
    }

    /// Registers a sink. If info has already been observed, the sink receives
    /// it immediately. Returns an id for `unsubscribe`.
    pub fn subscribe(&self, sink: Arc<dyn AllowedHostsSink>) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        if let Some(info) = self.last_info.lock().as_ref() {
            sink.apply_allowed_and_blocked(info.to_allowed_and_blocked());
        }
        self.subscribers.insert(id, sink);
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn current_info(&self) -> Option<CustomEndpointInfo> {
        self.last_info.lock().clone()
    }

    /// Waits until the first control-plane description has been observed.
    pub async fn wait_for_info(&self, timeout: Duration) -> bool {
        let mut rx = self.info_seen_tx.subscribe();
        if *rx.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.refresh_rate);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!(
                        "Custom endpoint monitor for '{}' shutting down.",
                        self.endpoint_url
                    );
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        let endpoints = match self
            .rds_client
            .describe_custom_endpoints(&self.endpoint_id, &self.region)
            .await
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(
                    "DescribeDBClusterEndpoints for '{}' failed: {}",
                    self.endpoint_id, e
                );
                return;
            }
        };
        if endpoints.len() != 1 {
            warn!(
                "Expected exactly one endpoint description for '{}', got {}.",
                self.endpoint_id,
                endpoints.len()
            );
            return;
        }

        let info = CustomEndpointInfo::from_endpoint(&endpoints[0]);
        {
            let mut last = self.last_info.lock();
            if last.as_ref() == Some(&info) {
                return;
            }
            *last = Some(info.clone());
        }

        debug!(
            "Custom endpoint '{}' membership changed: {:?} ({:?}).",
            self.endpoint_id, info.members, info.member_list_type
        );
        let hosts: AllowedAndBlockedHosts = info.to_allowed_and_blocked();
        for subscriber in self.subscribers.iter() {
            subscriber.value().apply_allowed_and_blocked(hosts.clone());
        }
        self.changes_counter.inc();
        self.info_seen_tx.send_replace(true);
    }
}
