// src/core/plugins/stale_dns.rs

//! After a failover, the writer-cluster DNS record can keep pointing at the
//! demoted writer for a while. This plugin detects a writer-cluster connect
//! that landed on a reader and reroutes it to the real writer instance.

use super::service::PluginService;
use super::{ConnectContext, ConnectionPlugin, NextConnect, methods};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::rds_url::{self, RdsUrlType};
use crate::core::topology::writer_of;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub const STALE_DNS_PLUGIN_NAME: &str = "staleDns";

const SUBSCRIBED: &[&str] = &[methods::CONNECT];

pub struct StaleDnsPlugin {
    service: Arc<PluginService>,
}

impl StaleDnsPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self { service }
    }

    /// True when `client`, freshly dialed through a writer endpoint, is
    /// actually serving a reader.
    async fn landed_on_reader(&self, client: &Arc<dyn DriverConnection>) -> bool {
        let dialect = self.service.dialect();
        match client.query(dialect.is_reader_query()).await {
            Ok(result) => matches!(result.first("is_reader"), Some("true") | Some("1")),
            Err(e) => {
                debug!("Stale-DNS role probe failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl ConnectionPlugin for StaleDnsPlugin {
    fn name(&self) -> &'static str {
        STALE_DNS_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        SUBSCRIBED
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let via_writer_endpoint =
            rds_url::identify(&ctx.host.host) == RdsUrlType::RdsWriterCluster;
        let client = next.call(ctx).await?;
        if !via_writer_endpoint || !self.landed_on_reader(&client).await {
            return Ok(client);
        }

        // Stale record: the cluster DNS led us to a demoted writer. Find the
        // real writer in the freshest topology and dial it directly.
        let provider = self.service.host_list_provider()?;
        let topology = match provider
            .force_refresh(&client, self.service.settings().wrapper_connect_timeout)
            .await
        {
            Some(topology) => topology,
            None => {
                warn!("Writer-cluster DNS looks stale but topology is unavailable; keeping the connection.");
                return Ok(client);
            }
        };
        let Some(writer) = writer_of(&topology).cloned() else {
            return Ok(client);
        };
        warn!(
            "Writer-cluster DNS is stale (landed on a reader); rerouting to {}.",
            writer.url()
        );
        match self.service.force_connect(&writer).await {
            Ok(writer_client) => {
                let _ = client.close().await;
                Ok(writer_client)
            }
            Err(e) => {
                debug!("Reroute to {} failed: {}; keeping the stale target.", writer.url(), e);
                Ok(client)
            }
        }
    }
}
