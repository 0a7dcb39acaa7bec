// src/core/monitoring/monitor.rs

//! The per-host probe task. One monitor exists per `(host, detection
//! parameters)` tuple and is shared by every logical connection using that
//! host with those parameters.

use crate::core::dialect::DatabaseDialect;
use crate::core::driver::{ConnectSpec, DriverConnection, DriverFactory};
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostAvailabilityRegistry, HostInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The tuple of detection parameters a monitor is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDetectionParams {
    /// Grace period before an in-flight call becomes abortable.
    pub detection_time: Duration,
    /// Probe cadence.
    pub detection_interval: Duration,
    /// Consecutive-failure threshold.
    pub detection_count: u32,
}

impl FailureDetectionParams {
    /// The unhealthy duration after which the host is declared dead:
    /// `interval × (count − 1)`.
    fn unhealthy_threshold(&self) -> Duration {
        self.detection_interval
            .saturating_mul(self.detection_count.saturating_sub(1))
    }
}

/// Registered for each in-flight call on a network-bound method. Held weakly
/// by the monitor so an abandoned logical connection cannot grow the queue.
pub struct MonitorConnectionContext {
    client_to_abort: Arc<dyn DriverConnection>,
    active: AtomicBool,
    started: Instant,
}

impl MonitorConnectionContext {
    pub fn new(client_to_abort: Arc<dyn DriverConnection>) -> Arc<Self> {
        Arc::new(Self {
            client_to_abort,
            active: AtomicBool::new(true),
            started: Instant::now(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marked by the plugin on method return, success or failure.
    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn abort(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.client_to_abort.abort();
        }
    }
}

/// Probes one host on a dedicated monitoring connection and aborts the
/// active contexts when the host goes unhealthy.
pub struct HostMonitor {
    host: HostInfo,
    params: FailureDetectionParams,
    monitoring_spec: ConnectSpec,
    factory: Arc<dyn DriverFactory>,
    dialect: Arc<dyn DatabaseDialect>,
    availability: Arc<HostAvailabilityRegistry>,

    contexts: Mutex<Vec<Weak<MonitorConnectionContext>>>,
    host_unhealthy: AtomicBool,
    failure_count: AtomicU32,
    invalid_since: Mutex<Option<Instant>>,

    monitoring_client: tokio::sync::Mutex<Option<Arc<dyn DriverConnection>>>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HostMonitor {
    pub fn new(
        host: HostInfo,
        params: FailureDetectionParams,
        monitoring_spec: ConnectSpec,
        factory: Arc<dyn DriverFactory>,
        dialect: Arc<dyn DatabaseDialect>,
        availability: Arc<HostAvailabilityRegistry>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            host,
            params,
            monitoring_spec,
            factory,
            dialect,
            availability,
            contexts: Mutex::new(Vec::new()),
            host_unhealthy: AtomicBool::new(false),
            failure_count: AtomicU32::new(0),
            invalid_since: Mutex::new(None),
            monitoring_client: tokio::sync::Mutex::new(None),
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
            "Health monitor for {} started (interval {:?}, count {}).",
            self.host.url(),
            self.params.detection_interval,
            self.params.detection_count
        );
        *task = Some(tokio::spawn(monitor.run(shutdown_rx)));
    }

    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!(
                    "Health monitor for {} did not exit cleanly: {}",
                    self.host.url(),
                    e
                );
            }
        }
        if let Some(client) = self.monitoring_client.lock().await.take() {
            let _ = client.close().await;
        }
    }

    pub fn register(&self, context: &Arc<MonitorConnectionContext>) {
        self.contexts.lock().push(Arc::downgrade(context));
    }

    pub fn is_host_unhealthy(&self) -> bool {
        self.host_unhealthy.load(Ordering::Acquire)
    }

    /// True when nothing is registered; gates idle disposal from the cache.
    pub fn has_no_contexts(&self) -> bool {
        self.contexts
            .lock()
            .iter()
            .all(|weak| weak.upgrade().map(|c| !c.is_active()).unwrap_or(true))
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.params.detection_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown_rx.recv() => {
                    debug!("Health monitor for {} shutting down.", self.host.url());
                    return;
                }
            }
        }
    }

    async fn tick(&self) {
        self.sweep_dead_contexts();
        let probe = tokio::time::timeout(self.params.detection_interval, self.probe()).await;
        match probe {
            Ok(Ok(())) => self.on_probe_success(),
            Ok(Err(e)) => self.on_probe_failure(Some(e)).await,
            Err(_) => self.on_probe_failure(None).await,
        }
        if self.is_host_unhealthy() {
            // Contexts registered after the transition still get aborted
            // once their grace period elapses.
            self.abort_eligible_contexts();
        }
    }

    async fn probe(&self) -> Result<(), WrapperError> {
        let client = {
            let mut guard = self.monitoring_client.lock().await;
            match guard.as_ref() {
                Some(client) if !client.is_closed() => Arc::clone(client),
                _ => {
                    let client = self.factory.connect(&self.monitoring_spec).await?;
                    *guard = Some(Arc::clone(&client));
                    client
                }
            }
        };
        match client.query(self.dialect.ping_query()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                // A dead probe connection must not mask a recovered host.
                let mut guard = self.monitoring_client.lock().await;
                if let Some(current) = guard.take() {
                    let _ = current.close().await;
                }
                Err(e)
            }
        }
    }

    fn on_probe_success(&self) {
        if self.failure_count.swap(0, Ordering::AcqRel) > 0 {
            info!("Host {} is responding again.", self.host.url());
            *self.invalid_since.lock() = None;
            self.host_unhealthy.store(false, Ordering::Release);
            self.availability
                .set_availability(&self.host.url(), HostAvailability::Available);
        }
    }

    async fn on_probe_failure(&self, error: Option<WrapperError>) {
        let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let unhealthy_for = {
            let mut invalid_since = self.invalid_since.lock();
            invalid_since.get_or_insert_with(Instant::now).elapsed()
        };
        debug!(
            "Probe of {} failed ({} consecutive, unhealthy for {:?}): {:?}",
            self.host.url(),
            failures,
            unhealthy_for,
            error
        );
        if unhealthy_for >= self.params.unhealthy_threshold()
            && !self.host_unhealthy.swap(true, Ordering::AcqRel)
        {
            warn!(
                "Host {} declared unhealthy after {:?}; aborting in-flight calls.",
                self.host.url(),
                unhealthy_for
            );
            self.availability
                .set_availability(&self.host.url(), HostAvailability::NotAvailable);
        }
    }

    /// Aborts every active context older than the grace period, so short
    /// calls are never cut down.
    fn abort_eligible_contexts(&self) {
        let contexts = self.contexts.lock();
        for weak in contexts.iter() {
            if let Some(context) = weak.upgrade() {
                if context.is_active()
                    && context.started.elapsed() >= self.params.detection_time
                {
                    context.abort();
                }
            }
        }
    }

    fn sweep_dead_contexts(&self) {
        self.contexts.lock().retain(|weak| weak.upgrade().is_some());
    }
}
