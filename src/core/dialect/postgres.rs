// src/core/dialect/postgres.rs

//! PostgreSQL-family dialects: community PG, Aurora PG, RDS Multi-AZ PG.

use super::{DatabaseDialect, DialectCode};
use crate::core::driver::{DriverConnection, TransactionIsolationLevel};
use crate::core::errors::WrapperError;
use async_trait::async_trait;

const PG_NETWORK_STATES: &[&str] = &["08", "57P01", "57P02", "57P03", "58030"];
const PG_NETWORK_MESSAGES: &[&str] = &[
    "Connection terminated unexpectedly",
    "read ECONNRESET",
    "connect ECONNREFUSED",
    "Query read timeout",
    "terminating connection due to administrator command",
];
const PG_ACCESS_STATES: &[&str] = &["28000", "28P01"];

fn read_only_query(read_only: bool) -> String {
    if read_only {
        "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY".to_string()
    } else {
        "SET SESSION CHARACTERISTICS AS TRANSACTION READ WRITE".to_string()
    }
}

/// Community PostgreSQL. No topology table; promoted on probe.
#[derive(Debug, Default)]
pub struct PostgresDialect;

#[async_trait]
impl DatabaseDialect for PostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Postgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn topology_query(&self) -> Option<&'static str> {
        None
    }

    fn host_id_query(&self) -> &'static str {
        "SELECT inet_server_addr()::text AS id"
    }

    fn is_reader_query(&self) -> &'static str {
        "SELECT pg_is_in_recovery()::text AS is_reader"
    }

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError> {
        Ok(read_only_query(read_only))
    }

    fn set_autocommit_query(&self, _autocommit: bool) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "PostgreSQL autocommit is driver-side, not a session variable".to_string(),
        ))
    }

    fn set_catalog_query(&self, _catalog: &str) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "PostgreSQL cannot switch catalogs on a live connection".to_string(),
        ))
    }

    fn set_schema_query(&self, schema: &str) -> Result<String, WrapperError> {
        Ok(format!("SET search_path TO {schema}"))
    }

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError> {
        Ok(format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))
    }

    fn default_schema(&self) -> Option<&'static str> {
        Some("public")
    }

    fn network_error_states(&self) -> &'static [&'static str] {
        PG_NETWORK_STATES
    }

    fn network_error_messages(&self) -> &'static [&'static str] {
        PG_NETWORK_MESSAGES
    }

    fn access_error_states(&self) -> &'static [&'static str] {
        PG_ACCESS_STATES
    }

    fn update_candidates(&self) -> &'static [DialectCode] {
        &[DialectCode::AuroraPostgres, DialectCode::RdsMultiAzPostgres]
    }
}

/// Aurora PostgreSQL: topology from `aurora_replica_status()`.
#[derive(Debug, Default)]
pub struct AuroraPostgresDialect;

#[async_trait]
impl DatabaseDialect for AuroraPostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraPostgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn topology_query(&self) -> Option<&'static str> {
        Some(
            "SELECT server_id AS id, \
             CASE WHEN session_id = 'MASTER_SESSION_ID' THEN 'true' ELSE 'false' END AS is_writer, \
             round(100 - least(cpu, 100)) AS weight, \
             last_update_timestamp AS last_update \
             FROM aurora_replica_status() \
             WHERE extract(epoch from (now() - last_update_timestamp)) <= 300 \
             OR session_id = 'MASTER_SESSION_ID'",
        )
    }

    fn host_id_query(&self) -> &'static str {
        "SELECT aurora_db_instance_identifier() AS id"
    }

    fn is_reader_query(&self) -> &'static str {
        "SELECT pg_is_in_recovery()::text AS is_reader"
    }

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError> {
        Ok(read_only_query(read_only))
    }

    fn set_autocommit_query(&self, _autocommit: bool) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "PostgreSQL autocommit is driver-side, not a session variable".to_string(),
        ))
    }

    fn set_catalog_query(&self, _catalog: &str) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "PostgreSQL cannot switch catalogs on a live connection".to_string(),
        ))
    }

    fn set_schema_query(&self, schema: &str) -> Result<String, WrapperError> {
        Ok(format!("SET search_path TO {schema}"))
    }

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError> {
        Ok(format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))
    }

    fn default_schema(&self) -> Option<&'static str> {
        Some("public")
    }

    fn network_error_states(&self) -> &'static [&'static str] {
        PG_NETWORK_STATES
    }

    fn network_error_messages(&self) -> &'static [&'static str] {
        PG_NETWORK_MESSAGES
    }

    fn access_error_states(&self) -> &'static [&'static str] {
        PG_ACCESS_STATES
    }

    async fn is_dialect(&self, client: &dyn DriverConnection) -> bool {
        client
            .query("SELECT 1 FROM aurora_replica_status() LIMIT 1")
            .await
            .is_ok()
    }
}

/// RDS Multi-AZ PostgreSQL: topology from `rds_tools.multi_az_db_cluster_endpoints()`.
#[derive(Debug, Default)]
pub struct RdsMultiAzPostgresDialect;

#[async_trait]
impl DatabaseDialect for RdsMultiAzPostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::RdsMultiAzPostgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn topology_query(&self) -> Option<&'static str> {
        Some(
            "SELECT id, \
             CASE WHEN endpoint_type = 'WRITER' THEN 'true' ELSE 'false' END AS is_writer, \
             100 AS weight, NULL AS last_update \
             FROM rds_tools.multi_az_db_cluster_endpoints()",
        )
    }

    fn host_id_query(&self) -> &'static str {
        "SELECT rds_tools.db_instance_identifier() AS id"
    }

    fn is_reader_query(&self) -> &'static str {
        "SELECT pg_is_in_recovery()::text AS is_reader"
    }

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError> {
        Ok(read_only_query(read_only))
    }

    fn set_autocommit_query(&self, _autocommit: bool) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "PostgreSQL autocommit is driver-side, not a session variable".to_string(),
        ))
    }

    fn set_catalog_query(&self, _catalog: &str) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "PostgreSQL cannot switch catalogs on a live connection".to_string(),
        ))
    }

    fn set_schema_query(&self, schema: &str) -> Result<String, WrapperError> {
        Ok(format!("SET search_path TO {schema}"))
    }

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError> {
        Ok(format!(
            "SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))
    }

    fn default_schema(&self) -> Option<&'static str> {
        Some("public")
    }

    fn network_error_states(&self) -> &'static [&'static str] {
        PG_NETWORK_STATES
    }

    fn network_error_messages(&self) -> &'static [&'static str] {
        PG_NETWORK_MESSAGES
    }

    fn access_error_states(&self) -> &'static [&'static str] {
        PG_ACCESS_STATES
    }

    async fn is_dialect(&self, client: &dyn DriverConnection) -> bool {
        client
            .query("SELECT 1 FROM rds_tools.multi_az_db_cluster_endpoints() LIMIT 1")
            .await
            .is_ok()
    }
}
