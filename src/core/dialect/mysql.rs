// src/core/dialect/mysql.rs

//! MySQL-family dialects: community MySQL, Aurora MySQL, RDS Multi-AZ MySQL.

use super::{DatabaseDialect, DialectCode};
use crate::core::driver::{ConnectSpec, DriverConnection, TransactionIsolationLevel};
use crate::core::errors::WrapperError;
use async_trait::async_trait;

const MYSQL_NETWORK_STATES: &[&str] = &["08"];
const MYSQL_NETWORK_MESSAGES: &[&str] = &[
    "Connection terminated unexpectedly",
    "Lost connection to MySQL server",
    "read ECONNRESET",
    "connect ECONNREFUSED",
    "Query read timeout",
    "connection is in closed state",
];
const MYSQL_ACCESS_STATES: &[&str] = &["28000"];

fn read_only_query(read_only: bool) -> String {
    if read_only {
        "SET SESSION TRANSACTION READ ONLY".to_string()
    } else {
        "SET SESSION TRANSACTION READ WRITE".to_string()
    }
}

fn autocommit_query(autocommit: bool) -> String {
    format!("SET autocommit={}", if autocommit { 1 } else { 0 })
}

/// Community MySQL. No topology table; promoted to an RDS variant on probe.
#[derive(Debug, Default)]
pub struct MysqlDialect;

#[async_trait]
impl DatabaseDialect for MysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Mysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn topology_query(&self) -> Option<&'static str> {
        None
    }

    fn host_id_query(&self) -> &'static str {
        "SELECT @@hostname AS id"
    }

    fn is_reader_query(&self) -> &'static str {
        "SELECT @@read_only AS is_reader"
    }

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError> {
        Ok(read_only_query(read_only))
    }

    fn set_autocommit_query(&self, autocommit: bool) -> Result<String, WrapperError> {
        Ok(autocommit_query(autocommit))
    }

    fn set_catalog_query(&self, catalog: &str) -> Result<String, WrapperError> {
        Ok(format!("USE `{catalog}`"))
    }

    fn set_schema_query(&self, _schema: &str) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "MySQL does not support schemas distinct from catalogs".to_string(),
        ))
    }

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError> {
        Ok(format!(
            "SET SESSION TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))
    }

    fn default_transaction_isolation(&self) -> TransactionIsolationLevel {
        TransactionIsolationLevel::RepeatableRead
    }

    fn network_error_states(&self) -> &'static [&'static str] {
        MYSQL_NETWORK_STATES
    }

    fn network_error_messages(&self) -> &'static [&'static str] {
        MYSQL_NETWORK_MESSAGES
    }

    fn access_error_states(&self) -> &'static [&'static str] {
        MYSQL_ACCESS_STATES
    }

    fn update_candidates(&self) -> &'static [DialectCode] {
        &[DialectCode::AuroraMysql, DialectCode::RdsMultiAzMysql]
    }
}

/// Aurora MySQL: topology from `information_schema.replica_host_status`.
#[derive(Debug, Default)]
pub struct AuroraMysqlDialect;

#[async_trait]
impl DatabaseDialect for AuroraMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraMysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn topology_query(&self) -> Option<&'static str> {
        Some(
            "SELECT SERVER_ID AS id, \
             CASE WHEN SESSION_ID = 'MASTER_SESSION_ID' THEN 'true' ELSE 'false' END AS is_writer, \
             ROUND(100 - LEAST(CPU, 100)) AS weight, \
             LAST_UPDATE_TIMESTAMP AS last_update \
             FROM information_schema.replica_host_status \
             WHERE time_to_sec(timediff(now(), LAST_UPDATE_TIMESTAMP)) <= 300 \
             OR SESSION_ID = 'MASTER_SESSION_ID'",
        )
    }

    fn host_id_query(&self) -> &'static str {
        "SELECT @@aurora_server_id AS id"
    }

    fn is_reader_query(&self) -> &'static str {
        "SELECT @@innodb_read_only AS is_reader"
    }

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError> {
        Ok(read_only_query(read_only))
    }

    fn set_autocommit_query(&self, autocommit: bool) -> Result<String, WrapperError> {
        Ok(autocommit_query(autocommit))
    }

    fn set_catalog_query(&self, catalog: &str) -> Result<String, WrapperError> {
        Ok(format!("USE `{catalog}`"))
    }

    fn set_schema_query(&self, _schema: &str) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "MySQL does not support schemas distinct from catalogs".to_string(),
        ))
    }

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError> {
        Ok(format!(
            "SET SESSION TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))
    }

    fn default_transaction_isolation(&self) -> TransactionIsolationLevel {
        TransactionIsolationLevel::RepeatableRead
    }

    fn network_error_states(&self) -> &'static [&'static str] {
        MYSQL_NETWORK_STATES
    }

    fn network_error_messages(&self) -> &'static [&'static str] {
        MYSQL_NETWORK_MESSAGES
    }

    fn access_error_states(&self) -> &'static [&'static str] {
        MYSQL_ACCESS_STATES
    }

    async fn is_dialect(&self, client: &dyn DriverConnection) -> bool {
        client
            .query("SELECT 1 FROM information_schema.replica_host_status LIMIT 1")
            .await
            .is_ok()
    }

    fn prepare_pool_spec(&self, spec: &ConnectSpec) -> ConnectSpec {
        let mut spec = spec.clone();
        // Pooled connections must not transparently reconnect under the
        // pool's feet.
        spec.extra
            .insert("autoReconnect".to_string(), "false".to_string());
        spec
    }
}

/// RDS Multi-AZ MySQL: topology from `mysql.rds_topology`.
#[derive(Debug, Default)]
pub struct RdsMultiAzMysqlDialect;

#[async_trait]
impl DatabaseDialect for RdsMultiAzMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::RdsMultiAzMysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn ping_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn topology_query(&self) -> Option<&'static str> {
        Some(
            "SELECT id, \
             CASE WHEN id = @@server_id THEN 'true' ELSE 'false' END AS is_writer, \
             100 AS weight, NULL AS last_update \
             FROM mysql.rds_topology",
        )
    }

    fn host_id_query(&self) -> &'static str {
        "SELECT @@server_id AS id"
    }

    fn is_reader_query(&self) -> &'static str {
        "SELECT @@read_only AS is_reader"
    }

    fn set_read_only_query(&self, read_only: bool) -> Result<String, WrapperError> {
        Ok(read_only_query(read_only))
    }

    fn set_autocommit_query(&self, autocommit: bool) -> Result<String, WrapperError> {
        Ok(autocommit_query(autocommit))
    }

    fn set_catalog_query(&self, catalog: &str) -> Result<String, WrapperError> {
        Ok(format!("USE `{catalog}`"))
    }

    fn set_schema_query(&self, _schema: &str) -> Result<String, WrapperError> {
        Err(WrapperError::UnsupportedMethod(
            "MySQL does not support schemas distinct from catalogs".to_string(),
        ))
    }

    fn set_transaction_isolation_query(
        &self,
        level: TransactionIsolationLevel,
    ) -> Result<String, WrapperError> {
        Ok(format!(
            "SET SESSION TRANSACTION ISOLATION LEVEL {}",
            level.as_sql()
        ))
    }

    fn default_transaction_isolation(&self) -> TransactionIsolationLevel {
        TransactionIsolationLevel::RepeatableRead
    }

    fn network_error_states(&self) -> &'static [&'static str] {
        MYSQL_NETWORK_STATES
    }

    fn network_error_messages(&self) -> &'static [&'static str] {
        MYSQL_NETWORK_MESSAGES
    }

    fn access_error_states(&self) -> &'static [&'static str] {
        MYSQL_ACCESS_STATES
    }

    async fn is_dialect(&self, client: &dyn DriverConnection) -> bool {
        client
            .query("SELECT 1 FROM mysql.rds_topology LIMIT 1")
            .await
            .is_ok()
    }
}
