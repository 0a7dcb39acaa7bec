// src/core/runtime.rs

//! The process-wide registry of cluster-scoped shared state. Construct one
//! `WrapperRuntime` per process, inject it into every wrapper, and call
//! `release_resources()` at shutdown to stop every background task
//! deterministically.

use crate::core::cache::SlidingExpirationCacheWithCleanupTask;
use crate::core::custom_endpoint::CustomEndpointMonitor;
use crate::core::driver::DriverFactory;
use crate::core::host::HostAvailabilityRegistry;
use crate::core::limitless::LimitlessRouterService;
use crate::core::monitoring::MonitorService;
use crate::core::providers::InternalPooledConnectionProvider;
use crate::core::selectors::{HostSelector, PoolStatus, SelectorRegistry};
use crate::core::telemetry::{NoopTelemetryFactory, TelemetryFactory};
use crate::core::topology::ClusterTopologyMonitor;
use crate::core::errors::WrapperError;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Idle clusters are garbage-collected together with their monitor.
const TOPOLOGY_MONITOR_TTL: Duration = Duration::from_secs(15 * 60);
const TOPOLOGY_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const CUSTOM_ENDPOINT_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

pub struct WrapperRuntime {
    topology_monitors: SlidingExpirationCacheWithCleanupTask<String, Arc<ClusterTopologyMonitor>>,
    custom_endpoint_monitors:
        SlidingExpirationCacheWithCleanupTask<String, Arc<CustomEndpointMonitor>>,
    monitor_service: MonitorService,
    pooled_provider: Arc<InternalPooledConnectionProvider>,
    availability: Arc<HostAvailabilityRegistry>,
    selectors: SelectorRegistry,
    limitless: LimitlessRouterService,
    telemetry: Arc<dyn TelemetryFactory>,
}

impl WrapperRuntime {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Arc<Self> {
        Self::with_telemetry(factory, Arc::new(NoopTelemetryFactory))
    }

    pub fn with_telemetry(
        factory: Arc<dyn DriverFactory>,
        telemetry: Arc<dyn TelemetryFactory>,
    ) -> Arc<Self> {
        let availability = Arc::new(HostAvailabilityRegistry::default());
        let pooled_provider = Arc::new(InternalPooledConnectionProvider::new(factory));
        let pool_status: Arc<dyn PoolStatus> = Arc::clone(&pooled_provider) as Arc<dyn PoolStatus>;
        let selectors = SelectorRegistry::new(Some(pool_status));
        let topology_monitors = SlidingExpirationCacheWithCleanupTask::new(
            TOPOLOGY_CACHE_CLEANUP_INTERVAL,
            None,
            Some(Arc::new(|monitor: Arc<ClusterTopologyMonitor>| {
                tokio::spawn(async move { monitor.stop().await });
            })),
        );
        let custom_endpoint_monitors = SlidingExpirationCacheWithCleanupTask::new(
            CUSTOM_ENDPOINT_CACHE_CLEANUP_INTERVAL,
            None,
            Some(Arc::new(|monitor: Arc<CustomEndpointMonitor>| {
                tokio::spawn(async move { monitor.stop().await });
            })),
        );
        Arc::new(Self {
            topology_monitors,
            custom_endpoint_monitors,
            monitor_service: MonitorService::new(Arc::clone(&availability)),
            pooled_provider,
            availability,
            selectors,
            limitless: LimitlessRouterService::new(),
            telemetry,
        })
    }

    /// Joins (or creates and starts) the shared topology monitor for a
    /// cluster. Access slides the idle-expiration window.
    pub fn topology_monitor(
        &self,
        cluster_id: &str,
        create: impl FnOnce() -> Arc<ClusterTopologyMonitor>,
    ) -> Arc<ClusterTopologyMonitor> {
        self.topology_monitors.compute_if_absent(
            cluster_id.to_string(),
            || {
                let monitor = create();
                monitor.start();
                monitor
            },
            TOPOLOGY_MONITOR_TTL,
        )
    }

    /// Joins (or creates and starts) the shared custom-endpoint monitor for
    /// an endpoint URL.
    pub fn custom_endpoint_monitor(
        &self,
        endpoint_url: &str,
        expiration: Duration,
        create: impl FnOnce() -> Arc<CustomEndpointMonitor>,
    ) -> Arc<CustomEndpointMonitor> {
        self.custom_endpoint_monitors.compute_if_absent(
            endpoint_url.to_string(),
            || {
                let monitor = create();
                monitor.start();
                monitor
            },
            expiration,
        )
    }

    pub fn monitor_service(&self) -> &MonitorService {
        &self.monitor_service
    }

    pub fn pooled_provider(&self) -> &Arc<InternalPooledConnectionProvider> {
        &self.pooled_provider
    }

    pub fn availability(&self) -> &Arc<HostAvailabilityRegistry> {
        &self.availability
    }

    pub fn selector(&self, strategy: &str) -> Result<Arc<dyn HostSelector>, WrapperError> {
        self.selectors.for_strategy(strategy)
    }

    pub fn limitless(&self) -> &LimitlessRouterService {
        &self.limitless
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryFactory> {
        &self.telemetry
    }

    /// Shuts down every background task and disposes every shared resource.
    pub async fn release_resources(&self) {
        info!("Releasing wrapper runtime resources.");
        self.topology_monitors.clear().await;
        self.custom_endpoint_monitors.clear().await;
        self.monitor_service.release().await;
        self.pooled_provider.release_pools().await;
        self.limitless.release().await;
    }
}
