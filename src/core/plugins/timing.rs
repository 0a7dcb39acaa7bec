// src/core/plugins/timing.rs

//! Connect-time and execute-time measurement plugins.

use super::{
    ALL_METHODS, ConnectContext, ConnectionPlugin, ExecuteContext, ExecuteOutcome, NextConnect,
    NextExecute, methods,
};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::telemetry::{TelemetryFactory, TelemetryGauge};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const CONNECT_TIME_PLUGIN_NAME: &str = "connectTime";
pub const EXECUTE_TIME_PLUGIN_NAME: &str = "executeTime";

pub struct ConnectTimePlugin {
    gauge: Arc<dyn TelemetryGauge>,
}

impl ConnectTimePlugin {
    pub fn new(telemetry: &Arc<dyn TelemetryFactory>) -> Self {
        Self {
            gauge: telemetry.create_gauge("connect.durationMs"),
        }
    }
}

#[async_trait]
impl ConnectionPlugin for ConnectTimePlugin {
    fn name(&self) -> &'static str {
        CONNECT_TIME_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[methods::CONNECT, methods::FORCE_CONNECT]
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let url = ctx.host.url();
        let started = Instant::now();
        let result = next.call(ctx).await;
        let elapsed = started.elapsed();
        self.gauge.set(elapsed.as_secs_f64() * 1000.0);
        debug!("Connect to {} took {:?}.", url, elapsed);
        result
    }
}

pub struct ExecuteTimePlugin {
    gauge: Arc<dyn TelemetryGauge>,
}

impl ExecuteTimePlugin {
    pub fn new(telemetry: &Arc<dyn TelemetryFactory>) -> Self {
        Self {
            gauge: telemetry.create_gauge("execute.durationMs"),
        }
    }
}

#[async_trait]
impl ConnectionPlugin for ExecuteTimePlugin {
    fn name(&self) -> &'static str {
        EXECUTE_TIME_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[ALL_METHODS]
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        let started = Instant::now();
        let result = next.call().await;
        let elapsed = started.elapsed();
        self.gauge.set(elapsed.as_secs_f64() * 1000.0);
        debug!("Method '{}' took {:?}.", ctx.method, elapsed);
        result
    }
}
