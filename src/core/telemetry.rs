// src/core/telemetry.rs

//! Counter/gauge/span seam. The wrapper is a library, so the hosting process
//! owns the metrics backend; the default factory is a no-op and a
//! tracing-backed factory is provided for development.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

pub trait TelemetryCounter: Send + Sync {
    fn inc(&self) {
        self.add(1);
    }
    fn add(&self, n: u64);
}

pub trait TelemetryGauge: Send + Sync {
    fn set(&self, value: f64);
}

/// Produces counters, gauges, and spans. One factory per `WrapperRuntime`.
pub trait TelemetryFactory: Send + Sync {
    fn create_counter(&self, name: &str) -> Arc<dyn TelemetryCounter>;
    fn create_gauge(&self, name: &str) -> Arc<dyn TelemetryGauge>;
    fn open_span(&self, name: &str) -> TelemetrySpan;
}

/// A timing scope. Duration is reported when the span is dropped.
pub struct TelemetrySpan {
    name: String,
    started: Instant,
    report: Option<Box<dyn Fn(&str, std::time::Duration) + Send + Sync>>,
}

impl TelemetrySpan {
    pub fn new(
        name: impl Into<String>,
        report: Option<Box<dyn Fn(&str, std::time::Duration) + Send + Sync>>,
    ) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            report,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TelemetrySpan {
    fn drop(&mut self) {
        if let Some(report) = &self.report {
            report(&self.name, self.started.elapsed());
        }
    }
}

// --- No-op backend ---

#[derive(Debug, Default)]
pub struct NoopTelemetryFactory;

struct NoopCounter;
struct NoopGauge;

impl TelemetryCounter for NoopCounter {
    fn add(&self, _n: u64) {}
}

impl TelemetryGauge for NoopGauge {
    fn set(&self, _value: f64) {}
}

impl TelemetryFactory for NoopTelemetryFactory {
    fn create_counter(&self, _name: &str) -> Arc<dyn TelemetryCounter> {
        Arc::new(NoopCounter)
    }

    fn create_gauge(&self, _name: &str) -> Arc<dyn TelemetryGauge> {
        Arc::new(NoopGauge)
    }

    fn open_span(&self, name: &str) -> TelemetrySpan {
        TelemetrySpan::new(name, None)
    }
}

// --- Tracing backend ---

/// Emits every measurement as a `debug!` event. Counters keep a running total
/// so the log line carries the cumulative value.
#[derive(Debug, Default)]
pub struct TracingTelemetryFactory;

struct TracingCounter {
    name: String,
    total: AtomicU64,
}

struct TracingGauge {
    name: String,
}

impl TelemetryCounter for TracingCounter {
    fn add(&self, n: u64) {
        let total = self.total.fetch_add(n, Ordering::Relaxed) + n;
        debug!(counter = %self.name, value = total, "telemetry counter");
    }
}

impl TelemetryGauge for TracingGauge {
    fn set(&self, value: f64) {
        debug!(gauge = %self.name, value, "telemetry gauge");
    }
}

impl TelemetryFactory for TracingTelemetryFactory {
    fn create_counter(&self, name: &str) -> Arc<dyn TelemetryCounter> {
        Arc::new(TracingCounter {
            name: name.to_string(),
            total: AtomicU64::new(0),
        })
    }

    fn create_gauge(&self, name: &str) -> Arc<dyn TelemetryGauge> {
        Arc::new(TracingGauge {
            name: name.to_string(),
        })
    }

    fn open_span(&self, name: &str) -> TelemetrySpan {
        TelemetrySpan::new(
            name,
            Some(Box::new(|name, elapsed| {
                debug!(span = %name, ?elapsed, "telemetry span closed");
            })),
        )
    }
}
