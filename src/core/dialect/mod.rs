// src/core/dialect/mod.rs

//! Per-engine adapters. A dialect knows the SQL its engine speaks for
//! topology discovery, host identification, session state, and liveness, and
//! how to classify that engine's errors.

pub mod mysql;
pub mod postgres;

use crate::core::driver::{ConnectSpec, DriverConnection, TransactionIsolationLevel};
use crate::core::errors::WrapperError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{Display, EnumString};

pub use mysql::{AuroraMysqlDialect, MysqlDialect, RdsMultiAzMysqlDialect};
pub use postgres::{AuroraPostgresDialect, PostgresDialect, RdsMultiAzPostgresDialect};

/// Identifies a concrete dialect implementation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DialectCode {
    Mysql,
    Postgres,
    AuroraMysql,
    AuroraPostgres,
    RdsMultiAzMysql,
    RdsMultiAzPostgres,
}

/// The SQL and classification surface of one database engine.
///
/// Topology/host-id/is-reader queries alias their engine-specific columns to
/// the shared names the providers expect: `id`, `is_writer`, `weight`,
/// `last_update`, `is_reader`.
#[async_trait]
pub trait DatabaseDialect: Send + Sync {
    fn code(&self) -> DialectCode;

    fn default_port(&self) -> u16;

    fn ping_query(&self) -> &'static str;

    /// The cluster topology query; `None` for engines without a topology
    /// table (plain community MySQL/PostgreSQL).
    fn topology_query(&self) -> Option<&'static str>;

    /// Returns the connected instance's identifier (column `id`).
    fn host_id_query(&self) -> &'static str;

    /// Returns whether the connected instance is a reader (column `is_reader`).
    fn is_reader_query(&self) -> &'static str;

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError>;

    fn set_autocommit_query(&self, autocommit: bool) -> Result<String, WrapperError>;

    fn set_catalog_query(&self, catalog: &str) -> Result<String, WrapperError>;

    fn set_schema_query(&self, schema: &str) -> Result<String, WrapperError>;

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError>;

    /// The engine's default schema for a fresh session, if it has one.
    fn default_schema(&self) -> Option<&'static str> {
        None
    }

    /// The engine's default transaction isolation level, used to seed the
    /// pristine value when the application first changes the level.
    fn default_transaction_isolation(&self) -> TransactionIsolationLevel {
        TransactionIsolationLevel::ReadCommitted
    }

    /// SQLSTATE prefixes treated as connectivity failures.
    fn network_error_states(&self) -> &'static [&'static str];

    /// Message substrings treated as connectivity failures.
    fn network_error_messages(&self) -> &'static [&'static str];

    /// SQLSTATEs that mean authentication was rejected. These are never
    /// network errors, whatever the message says.
    fn access_error_states(&self) -> &'static [&'static str];

    /// Dialects this one may be promoted to after probing the server.
    fn update_candidates(&self) -> &'static [DialectCode] {
        &[]
    }

    /// Probes `client` to decide whether this dialect matches the server.
    async fn is_dialect(&self, _client: &dyn DriverConnection) -> bool {
        false
    }

    /// Adjusts connect properties for pooled connections (e.g. disables
    /// driver-side reconnect logic the pool would fight with).
    fn prepare_pool_spec(&self, spec: &ConnectSpec) -> ConnectSpec {
        spec.clone()
    }

    fn is_network_error(&self, error: &WrapperError) -> bool {
        match error {
            WrapperError::Network(_) => true,
            WrapperError::Driver { message, sqlstate } => {
                if let Some(state) = sqlstate {
                    if self.access_error_states().contains(&state.as_str()) {
                        return false;
                    }
                    if self
                        .network_error_states()
                        .iter()
                        .any(|s| state.starts_with(s))
                    {
                        return true;
                    }
                }
                self.network_error_messages()
                    .iter()
                    .any(|m| message.contains(m))
            }
            _ => false,
        }
    }

    fn is_access_denied(&self, error: &WrapperError) -> bool {
        match error {
            WrapperError::AccessDenied(_) | WrapperError::Login(_) => true,
            WrapperError::Driver { sqlstate, .. } => sqlstate
                .as_deref()
                .map(|s| self.access_error_states().contains(&s))
                .unwrap_or(false),
            _ => false,
        }
    }
}

/// Returns the dialect implementation for a code.
pub fn dialect_for_code(code: DialectCode) -> Arc<dyn DatabaseDialect> {
    match code {
        DialectCode::Mysql => Arc::new(MysqlDialect),
        DialectCode::Postgres => Arc::new(PostgresDialect),
        DialectCode::AuroraMysql => Arc::new(AuroraMysqlDialect),
        DialectCode::AuroraPostgres => Arc::new(AuroraPostgresDialect),
        DialectCode::RdsMultiAzMysql => Arc::new(RdsMultiAzMysqlDialect),
        DialectCode::RdsMultiAzPostgres => Arc::new(RdsMultiAzPostgresDialect),
    }
}

/// Promotes a configured dialect to a more specific variant by probing the
/// server through its update candidates, first match wins.
pub async fn resolve_dialect(
    configured: DialectCode,
    client: &dyn DriverConnection,
) -> Arc<dyn DatabaseDialect> {
    let base = dialect_for_code(configured);
    for candidate in base.update_candidates() {
        let dialect = dialect_for_code(*candidate);
        if dialect.is_dialect(client).await {
            tracing::debug!(
                "Dialect {} promoted to {} after probing.",
                configured,
                candidate
            );
            return dialect;
        }
    }
    base
}
