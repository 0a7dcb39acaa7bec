// tests/unit_session_state_test.rs

use async_trait::async_trait;
use auroralink::connection::{SessionStateDefaults, SessionStateService};
use auroralink::core::dialect::{DatabaseDialect, MysqlDialect, PostgresDialect};
use auroralink::core::driver::{DriverConnection, QueryResult, TransactionIsolationLevel};
use auroralink::core::errors::WrapperError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records every statement it is handed.
#[derive(Default)]
struct RecordingConnection {
    statements: Mutex<Vec<String>>,
}

impl RecordingConnection {
    fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

#[async_trait]
impl DriverConnection for RecordingConnection {
    async fn query(&self, sql: &str) -> Result<QueryResult, WrapperError> {
        self.statements.lock().push(sql.to_string());
        Ok(QueryResult::default())
    }

    async fn execute(&self, sql: &str) -> Result<u64, WrapperError> {
        self.statements.lock().push(sql.to_string());
        Ok(0)
    }

    async fn ping(&self) -> Result<(), WrapperError> {
        Ok(())
    }

    fn abort(&self) {}

    async fn close(&self) -> Result<(), WrapperError> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn connected_url(&self) -> String {
        "recorder:0".to_string()
    }
}

/// The defaults a MySQL-family connection against database `orders` starts
/// out with.
fn mysql_defaults() -> SessionStateDefaults {
    SessionStateDefaults {
        catalog: Some("orders".to_string()),
        schema: None,
        transaction_isolation: TransactionIsolationLevel::RepeatableRead,
    }
}

fn postgres_defaults() -> SessionStateDefaults {
    SessionStateDefaults {
        catalog: None,
        schema: Some("public".to_string()),
        transaction_isolation: TransactionIsolationLevel::ReadCommitted,
    }
}

#[tokio::test]
async fn transfer_replays_current_values_in_field_order() {
    let service = SessionStateService::new(true, true, mysql_defaults());
    service.set_auto_commit(false);
    service.set_read_only(true);
    service.set_catalog("reports".to_string());
    service.set_transaction_isolation(TransactionIsolationLevel::Serializable);

    let target = Arc::new(RecordingConnection::default());
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(MysqlDialect);
    service
        .apply_current_state(&(Arc::clone(&target) as Arc<dyn DriverConnection>), &dialect)
        .await
        .unwrap();

    assert_eq!(
        target.statements(),
        vec![
            "SET autocommit=0".to_string(),
            "SET SESSION TRANSACTION READ ONLY".to_string(),
            "USE `reports`".to_string(),
            "SET SESSION TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string(),
        ]
    );
}

#[tokio::test]
async fn reset_restores_only_the_pristine_values_of_mutated_fields() {
    let service = SessionStateService::new(true, true, mysql_defaults());
    // Mutate read-only twice: the pristine value is captured once, at the
    // first mutation.
    service.set_read_only(true);
    service.set_read_only(false);
    service.set_read_only(true);
    // Catalog and isolation each get mutated; their pristine values are the
    // captured session defaults. autoCommit and schema stay untouched.
    service.set_catalog("reports".to_string());
    service.set_catalog("audit".to_string());
    service.set_transaction_isolation(TransactionIsolationLevel::Serializable);

    let target = Arc::new(RecordingConnection::default());
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(MysqlDialect);
    service
        .apply_pristine_state(&(Arc::clone(&target) as Arc<dyn DriverConnection>), &dialect)
        .await
        .unwrap();

    assert_eq!(
        target.statements(),
        vec![
            "SET SESSION TRANSACTION READ WRITE".to_string(),
            "USE `orders`".to_string(),
            "SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ".to_string(),
        ]
    );
}

#[tokio::test]
async fn reset_restores_the_default_schema_on_postgres() {
    let service = SessionStateService::new(true, true, postgres_defaults());
    service.set_schema("analytics".to_string());

    let target = Arc::new(RecordingConnection::default());
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(PostgresDialect);
    service
        .apply_pristine_state(&(Arc::clone(&target) as Arc<dyn DriverConnection>), &dialect)
        .await
        .unwrap();

    assert_eq!(
        target.statements(),
        vec!["SET search_path TO public".to_string()]
    );
}

#[tokio::test]
async fn unsupported_fields_are_swallowed_during_transfer() {
    let service = SessionStateService::new(true, true, postgres_defaults());
    service.set_catalog("reports".to_string());
    service.set_auto_commit(false);
    service.set_schema("analytics".to_string());

    let target = Arc::new(RecordingConnection::default());
    // PostgreSQL supports neither catalog switching nor session autocommit;
    // only the schema statement goes through.
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(PostgresDialect);
    service
        .apply_current_state(&(Arc::clone(&target) as Arc<dyn DriverConnection>), &dialect)
        .await
        .unwrap();

    assert_eq!(
        target.statements(),
        vec!["SET search_path TO analytics".to_string()]
    );
}

#[tokio::test]
async fn disabled_policies_do_nothing() {
    let service = SessionStateService::new(false, false, SessionStateDefaults::default());
    service.set_read_only(true);

    let target = Arc::new(RecordingConnection::default());
    let dialect: Arc<dyn DatabaseDialect> = Arc::new(MysqlDialect);
    service
        .apply_current_state(&(Arc::clone(&target) as Arc<dyn DriverConnection>), &dialect)
        .await
        .unwrap();
    service
        .apply_pristine_state(&(Arc::clone(&target) as Arc<dyn DriverConnection>), &dialect)
        .await
        .unwrap();

    assert!(target.statements().is_empty());
    assert!(service.read_only());
}
