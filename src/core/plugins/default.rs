// src/core/plugins/default.rs

//! The terminal plugin, appended to every chain unconditionally. It performs
//! the actual driver call: dials through a connection provider on connect,
//! invokes the target operation on execute.

use super::service::PluginService;
use super::{ALL_METHODS, ConnectContext, ConnectionPlugin, ExecuteContext, ExecuteOutcome, NextConnect, NextExecute};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::providers::{ConnectionProvider, DirectConnectionProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_PLUGIN_NAME: &str = "default";

pub struct DefaultPlugin {
    service: Arc<PluginService>,
    direct: DirectConnectionProvider,
}

impl DefaultPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        let direct = DirectConnectionProvider::new(Arc::clone(service.factory()));
        Self { service, direct }
    }

    async fn dial(&self, ctx: &ConnectContext) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let settings = self.service.settings();
        let pooled = self.service.runtime().pooled_provider();
        if settings.use_internal_connection_pool && pooled.accepts(&ctx.host, settings) {
            debug!("Connecting to {} through the internal pool.", ctx.host.url());
            return pooled.connect(&ctx.host, &ctx.spec, settings).await;
        }
        self.direct.connect(&ctx.host, &ctx.spec, settings).await
    }
}

#[async_trait]
impl ConnectionPlugin for DefaultPlugin {
    fn name(&self) -> &'static str {
        DEFAULT_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[ALL_METHODS]
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        _next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        self.dial(&ctx).await
    }

    async fn force_connect(
        &self,
        ctx: ConnectContext,
        _next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        self.dial(&ctx).await
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        _next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        (ctx.target)().await
    }
}
