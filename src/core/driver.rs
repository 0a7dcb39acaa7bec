// src/core/driver.rs

//! The seam to the underlying database driver. The wire protocol is out of
//! scope; the wrapper consumes drivers through these traits and ships a mock
//! implementation for tests.

use crate::core::errors::WrapperError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Transaction isolation levels, numbered the way the logical API exposes
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TransactionIsolationLevel {
    ReadUncommitted = 0,
    ReadCommitted = 1,
    RepeatableRead = 2,
    Serializable = 3,
}

impl TransactionIsolationLevel {
    pub fn from_level(level: u8) -> Result<Self, WrapperError> {
        match level {
            0 => Ok(Self::ReadUncommitted),
            1 => Ok(Self::ReadCommitted),
            2 => Ok(Self::RepeatableRead),
            3 => Ok(Self::Serializable),
            other => Err(WrapperError::IllegalArgument(format!(
                "unknown transaction isolation level {other}"
            ))),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Everything a driver needs to dial one physical connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectSpec {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Unrecognized configuration keys, forwarded to the driver untouched.
    pub extra: HashMap<String, String>,
    pub connect_timeout: Option<Duration>,
}

impl ConnectSpec {
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// A result row, keyed by column name. Dialect topology queries alias their
/// engine-specific columns to the shared names the providers expect.
pub type Row = HashMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryResult {
    /// The first column value of the first row, for single-value probes.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first().and_then(|row| row.values().next().map(|s| s.as_str()))
    }

    /// A named column of the first row.
    pub fn first(&self, column: &str) -> Option<&str> {
        self.rows.first().and_then(|row| row.get(column).map(|s| s.as_str()))
    }
}

/// One physical driver connection. Implementations must be safe to share
/// behind an `Arc`: the host-health monitor aborts in-flight calls from a
/// different task than the one issuing them.
#[async_trait]
pub trait DriverConnection: Send + Sync {
    async fn query(&self, sql: &str) -> Result<QueryResult, WrapperError>;

    async fn execute(&self, sql: &str) -> Result<u64, WrapperError>;

    /// A cheap liveness probe (dialects map this to `SELECT 1`-equivalents).
    async fn ping(&self) -> Result<(), WrapperError>;

    /// Kills the connection immediately from any task. In-flight calls fail
    /// with a network error.
    fn abort(&self);

    async fn close(&self) -> Result<(), WrapperError>;

    fn is_closed(&self) -> bool;

    /// The endpoint this connection was dialed against.
    fn connected_url(&self) -> String;

    /// True when the connection was handed out by an internal pool, in which
    /// case `close()` releases it back instead of tearing it down.
    fn is_pooled(&self) -> bool {
        false
    }
}

/// Dials physical connections. One factory per wrapper; the mock driver in the
/// test fixtures implements this against an in-memory cluster.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn connect(&self, spec: &ConnectSpec) -> Result<Arc<dyn DriverConnection>, WrapperError>;
}
