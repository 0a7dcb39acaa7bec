// src/core/providers/direct.rs

use super::ConnectionProvider;
use crate::config::WrapperSettings;
use crate::core::driver::{ConnectSpec, DriverConnection, DriverFactory};
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Dials the driver directly, one physical connection per call.
pub struct DirectConnectionProvider {
    factory: Arc<dyn DriverFactory>,
}

impl DirectConnectionProvider {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl ConnectionProvider for DirectConnectionProvider {
    fn accepts(&self, _host: &HostInfo, _settings: &WrapperSettings) -> bool {
        true
    }

    async fn connect(
        &self,
        _host: &HostInfo,
        spec: &ConnectSpec,
        _settings: &WrapperSettings,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        debug!("Dialing {} directly.", spec.url());
        self.factory.connect(spec).await
    }
}
