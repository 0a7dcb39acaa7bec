// src/core/plugins/efm.rs

//! The host-monitoring plugin: registers a monitor context around every
//! network-bound call so the shared host monitor can abort the call when the
//! host stops responding.

use super::service::PluginService;
use super::{ConnectionPlugin, ExecuteContext, ExecuteOutcome, NETWORK_BOUND_METHODS, NextExecute};
use crate::core::errors::WrapperError;
use crate::core::host::HostAvailability;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const EFM_PLUGIN_NAME: &str = "efm2";

pub struct HostMonitoringPlugin {
    service: Arc<PluginService>,
}

impl HostMonitoringPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ConnectionPlugin for HostMonitoringPlugin {
    fn name(&self) -> &'static str {
        EFM_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        NETWORK_BOUND_METHODS
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        let settings = self.service.settings();
        if !settings.failure_detection_enabled {
            return next.call().await;
        }
        let (Some(host), Some(client)) =
            (self.service.current_host(), self.service.current_client())
        else {
            return next.call().await;
        };

        let monitor_service = self.service.runtime().monitor_service();
        let context = monitor_service.start_monitoring(
            &host,
            &client,
            settings,
            &self.service.dialect(),
            self.service.factory(),
        )?;

        let result = next.call().await;
        monitor_service.stop_monitoring(&context);

        if let Err(error) = &result {
            if self.service.is_network_error(error) {
                debug!(
                    "Network error on monitored call '{}' against {}.",
                    ctx.method,
                    host.url()
                );
                self.service
                    .mark_host_availability(&host.url(), HostAvailability::NotAvailable);
            }
        }
        result
    }
}
