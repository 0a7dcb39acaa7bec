// src/core/plugins/limitless.rs

//! Routes limitless (shard-group) connections to a transaction router chosen
//! by weighted random over the router list kept fresh by the shared router
//! monitor.

use super::service::PluginService;
use super::{ConnectContext, ConnectionPlugin, NextConnect, methods};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::rds_url::{self, RdsUrlType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub const LIMITLESS_PLUGIN_NAME: &str = "limitless";

pub struct LimitlessPlugin {
    service: Arc<PluginService>,
}

impl LimitlessPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self { service }
    }

    fn cluster_id(&self) -> Result<String, WrapperError> {
        Ok(self.service.host_list_provider()?.cluster_id().to_string())
    }
}

#[async_trait]
impl ConnectionPlugin for LimitlessPlugin {
    fn name(&self) -> &'static str {
        LIMITLESS_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[methods::CONNECT]
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        if rds_url::identify(&ctx.host.host) != RdsUrlType::RdsLimitless {
            return next.call(ctx).await;
        }

        let cluster_id = self.cluster_id()?;
        let runtime = self.service.runtime();
        let settings = self.service.settings();
        runtime
            .limitless()
            .ensure_monitor(&cluster_id, settings, self.service.factory(), &ctx.host);

        // Dial the shard-group endpoint first; the discovery query needs a
        // live connection when the router cache is still cold.
        let client = next.call(ctx).await?;
        if runtime.limitless().routers(&cluster_id).is_none() {
            if let Err(e) = runtime.limitless().fetch_routers(&cluster_id, &client).await {
                warn!("Limitless router discovery failed: {}", e);
                return Ok(client);
            }
        }

        let Some(router) = runtime.limitless().select_router(&cluster_id) else {
            return Ok(client);
        };
        if router.host == client.connected_url() || router.url() == client.connected_url() {
            return Ok(client);
        }
        debug!("Routing limitless connection to router {}.", router.url());
        match self.service.force_connect(&router).await {
            Ok(router_client) => {
                let _ = client.close().await;
                Ok(router_client)
            }
            Err(e) => {
                debug!(
                    "Router {} rejected the connection: {}; keeping the endpoint connection.",
                    router.url(),
                    e
                );
                Ok(client)
            }
        }
    }
}
