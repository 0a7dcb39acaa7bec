// src/core/monitoring/service.rs

//! Hands out shared host monitors and registers in-flight call contexts.

use super::{FailureDetectionParams, HostMonitor, MonitorConnectionContext};
use crate::config::WrapperSettings;
use crate::core::cache::SlidingExpirationCacheWithCleanupTask;
use crate::core::dialect::DatabaseDialect;
use crate::core::driver::{DriverConnection, DriverFactory};
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailabilityRegistry, HostInfo};
use std::sync::Arc;
use std::time::Duration;

const MONITOR_CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// The shared registry of host monitors, keyed by
/// `(host URL, detection parameters)`.
pub struct MonitorService {
    monitors: SlidingExpirationCacheWithCleanupTask<String, Arc<HostMonitor>>,
    availability: Arc<HostAvailabilityRegistry>,
}

impl MonitorService {
    pub fn new(availability: Arc<HostAvailabilityRegistry>) -> Self {
        let monitors = SlidingExpirationCacheWithCleanupTask::new(
            MONITOR_CACHE_CLEANUP_INTERVAL,
            Some(Arc::new(|monitor: &Arc<HostMonitor>| {
                monitor.has_no_contexts()
            })),
            Some(Arc::new(|monitor: Arc<HostMonitor>| {
                tokio::spawn(async move { monitor.stop().await });
            })),
        );
        Self {
            monitors,
            availability,
        }
    }

    /// Starts (or joins) the monitor for `host` and registers a context for
    /// the in-flight call on `client`. Fails fast when the monitor already
    /// considers the host unhealthy.
    pub fn start_monitoring(
        &self,
        host: &HostInfo,
        client: &Arc<dyn DriverConnection>,
        settings: &Arc<WrapperSettings>,
        dialect: &Arc<dyn DatabaseDialect>,
        factory: &Arc<dyn DriverFactory>,
    ) -> Result<Arc<MonitorConnectionContext>, WrapperError> {
        let params = FailureDetectionParams {
            detection_time: settings.failure_detection_time,
            detection_interval: settings.failure_detection_interval,
            detection_count: settings.failure_detection_count,
        };
        let key = format!(
            "{}|{}|{}|{}",
            host.url(),
            params.detection_time.as_millis(),
            params.detection_interval.as_millis(),
            params.detection_count
        );
        let monitor = self.monitors.compute_if_absent(
            key,
            || {
                let monitor = HostMonitor::new(
                    host.clone(),
                    params,
                    settings.monitoring_spec_for(host),
                    Arc::clone(factory),
                    Arc::clone(dialect),
                    Arc::clone(&self.availability),
                );
                monitor.start();
                monitor
            },
            settings.monitor_disposal_time,
        );
        if monitor.is_host_unhealthy() {
            // Surfaced as a network error so the failover plugin treats a
            // known-dead host exactly like a fresh connection failure.
            return Err(WrapperError::Network(format!(
                "host {} is failing its health checks",
                host.url()
            )));
        }
        let context = MonitorConnectionContext::new(Arc::clone(client));
        monitor.register(&context);
        Ok(context)
    }

    /// Marks the call finished; the monitor drops its weak reference on the
    /// next sweep.
    pub fn stop_monitoring(&self, context: &Arc<MonitorConnectionContext>) {
        context.set_inactive();
    }

    /// Stops every monitor and clears the registry.
    pub async fn release(&self) {
        self.monitors.clear().await;
    }
}
