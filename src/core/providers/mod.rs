// src/core/providers/mod.rs

//! Connection providers: how a `HostInfo` becomes a physical connection.
//! The direct provider dials the driver; the pooled provider multiplexes
//! through per-instance internal pools.

mod direct;
mod pooled;

use crate::config::WrapperSettings;
use crate::core::driver::{ConnectSpec, DriverConnection};
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use async_trait::async_trait;
use std::sync::Arc;

pub use direct::DirectConnectionProvider;
pub use pooled::{InternalPool, InternalPooledConnectionProvider, PoolKey};

/// Turns a topology host into a live physical connection. The spec arrives
/// separately from the host because connect-time plugins may have rewritten
/// it (credentials, green-host names) after it was derived.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Whether this provider is willing to serve `host` at all.
    fn accepts(&self, host: &HostInfo, settings: &WrapperSettings) -> bool;

    async fn connect(
        &self,
        host: &HostInfo,
        spec: &ConnectSpec,
        settings: &WrapperSettings,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError>;
}
