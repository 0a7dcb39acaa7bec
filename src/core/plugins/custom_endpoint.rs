// src/core/plugins/custom_endpoint.rs

//! Wires a logical connection made through an RDS custom endpoint to the
//! shared custom-endpoint monitor, and optionally blocks until the member
//! list has been seen at least once.

use super::service::PluginService;
use super::{
    ConnectContext, ConnectionPlugin, ExecuteContext, ExecuteOutcome, NETWORK_BOUND_METHODS,
    NextConnect, NextExecute, methods,
};
use crate::core::custom_endpoint::{CustomEndpointMonitor, RdsApiClient};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::rds_url::{self, RdsUrlType};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CUSTOM_ENDPOINT_PLUGIN_NAME: &str = "customEndpoint";

static SUBSCRIBED: OnceCell<Vec<&'static str>> = OnceCell::new();

fn subscribed_methods() -> &'static [&'static str] {
    SUBSCRIBED.get_or_init(|| {
        let mut methods_list = vec![methods::CONNECT, methods::FORCE_CONNECT];
        methods_list.extend_from_slice(NETWORK_BOUND_METHODS);
        methods_list
    })
}

pub struct CustomEndpointPlugin {
    service: Arc<PluginService>,
    rds_client: Arc<dyn RdsApiClient>,
    monitor: Mutex<Option<Arc<CustomEndpointMonitor>>>,
    subscription: Mutex<Option<u64>>,
}

impl CustomEndpointPlugin {
    pub fn new(service: Arc<PluginService>, rds_client: Arc<dyn RdsApiClient>) -> Self {
        Self {
            service,
            rds_client,
            monitor: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    fn resolve_region(&self, host: &str) -> String {
        self.service
            .settings()
            .custom_endpoint_region
            .clone()
            .or_else(|| rds_url::extract_region(host))
            .unwrap_or_else(|| "us-east-1".to_string())
    }

    /// Joins the shared monitor for `host` and subscribes this connection's
    /// plugin service to membership publications.
    fn attach_monitor(&self, host: &str) -> Arc<CustomEndpointMonitor> {
        if let Some(monitor) = self.monitor.lock().clone() {
            return monitor;
        }
        let settings = self.service.settings();
        let endpoint_id =
            rds_url::extract_identifier(host).unwrap_or_else(|| host.to_string());
        let region = self.resolve_region(host);
        let monitor = self.service.runtime().custom_endpoint_monitor(
            host,
            settings.custom_endpoint_monitor_expiration,
            || {
                CustomEndpointMonitor::new(
                    endpoint_id,
                    host.to_string(),
                    region,
                    Arc::clone(&self.rds_client),
                    settings.custom_endpoint_info_refresh_rate,
                    self.service.runtime().telemetry(),
                )
            },
        );
        let sink: Arc<dyn crate::core::custom_endpoint::AllowedHostsSink> =
            Arc::clone(&self.service) as Arc<dyn crate::core::custom_endpoint::AllowedHostsSink>;
        *self.subscription.lock() = Some(monitor.subscribe(sink));
        *self.monitor.lock() = Some(Arc::clone(&monitor));
        monitor
    }

    async fn wait_for_info(&self, monitor: &Arc<CustomEndpointMonitor>) -> Result<(), WrapperError> {
        let settings = self.service.settings();
        if !settings.wait_for_custom_endpoint_info {
            return Ok(());
        }
        if monitor.current_info().is_some() {
            return Ok(());
        }
        debug!("Waiting for custom endpoint info before proceeding.");
        if !monitor
            .wait_for_info(settings.wait_for_custom_endpoint_info_timeout)
            .await
        {
            warn!(
                "Custom endpoint info did not arrive within {:?}.",
                settings.wait_for_custom_endpoint_info_timeout
            );
            return Err(WrapperError::InternalQueryTimeout(
                settings.wait_for_custom_endpoint_info_timeout,
            ));
        }
        Ok(())
    }
}

impl Drop for CustomEndpointPlugin {
    fn drop(&mut self) {
        // The shared monitor outlives this logical connection; drop its sink.
        if let (Some(monitor), Some(id)) =
            (self.monitor.lock().as_ref(), *self.subscription.lock())
        {
            monitor.unsubscribe(id);
        }
    }
}

#[async_trait]
impl ConnectionPlugin for CustomEndpointPlugin {
    fn name(&self) -> &'static str {
        CUSTOM_ENDPOINT_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        subscribed_methods()
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        if ctx.is_initial && rds_url::identify(&ctx.host.host) == RdsUrlType::RdsCustomCluster {
            let monitor = self.attach_monitor(&ctx.host.host.clone());
            self.wait_for_info(&monitor).await?;
        }
        next.call(ctx).await
    }

    async fn execute(
        &self,
        _ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        let monitor = self.monitor.lock().clone();
        if let Some(monitor) = monitor {
            self.wait_for_info(&monitor).await?;
        }
        next.call().await
    }
}
