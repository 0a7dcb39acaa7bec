// src/connection/session.rs

//! Tracks the five recognized session fields for a logical connection and
//! replays them when the physical target changes.

use crate::core::dialect::DatabaseDialect;
use crate::core::driver::{DriverConnection, TransactionIsolationLevel};
use crate::core::errors::WrapperError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// One tracked session field. `current` reflects the value set through the
/// logical API; `pristine` is captured at most once, on first mutation, and
/// is what reset-on-close restores.
#[derive(Debug, Clone)]
pub struct SessionStateField<T: Clone> {
    pub current: Option<T>,
    pub pristine: Option<T>,
}

impl<T: Clone> Default for SessionStateField<T> {
    fn default() -> Self {
        Self {
            current: None,
            pristine: None,
        }
    }
}

impl<T: Clone> SessionStateField<T> {
    /// Records a new current value, capturing the pristine value on the first
    /// mutation only.
    fn set(&mut self, value: T, previous: Option<T>) {
        if self.pristine.is_none() && self.current.is_none() {
            self.pristine = previous;
        }
        self.current = Some(value);
    }
}

/// The five recognized fields, in their fixed transfer/restore order:
/// autocommit, read-only, catalog, schema, transaction isolation.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub auto_commit: SessionStateField<bool>,
    pub read_only: SessionStateField<bool>,
    pub catalog: SessionStateField<String>,
    pub schema: SessionStateField<String>,
    pub transaction_isolation: SessionStateField<TransactionIsolationLevel>,
}

/// The values a fresh session starts out with, captured when the logical
/// connection is configured. They seed the pristine value at the first
/// mutation of a field; without them the tracker has nothing to restore on
/// close, because `current` is still unset at that point.
#[derive(Debug, Clone)]
pub struct SessionStateDefaults {
    /// The catalog the connection was opened against (the configured
    /// database), when one was configured.
    pub catalog: Option<String>,
    /// The engine's default schema for a fresh session, when the engine has
    /// one (e.g. `public` on PostgreSQL).
    pub schema: Option<String>,
    /// The engine's default transaction isolation level.
    pub transaction_isolation: TransactionIsolationLevel,
}

impl Default for SessionStateDefaults {
    fn default() -> Self {
        Self {
            catalog: None,
            schema: None,
            transaction_isolation: TransactionIsolationLevel::ReadCommitted,
        }
    }
}

/// Applies session state across target switches and restores pristine values
/// at close. Shared between the wrapper and the plugins that replace the
/// target client.
pub struct SessionStateService {
    state: Mutex<SessionState>,
    defaults: SessionStateDefaults,
    transfer_in_progress: AtomicBool,
    transfer_on_switch: bool,
    reset_on_close: bool,
}

impl SessionStateService {
    pub fn new(
        transfer_on_switch: bool,
        reset_on_close: bool,
        defaults: SessionStateDefaults,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            defaults,
            transfer_in_progress: AtomicBool::new(false),
            transfer_on_switch,
            reset_on_close,
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn set_auto_commit(&self, value: bool) {
        let mut state = self.state.lock();
        let previous = state.auto_commit.current.or(Some(true));
        state.auto_commit.set(value, previous);
    }

    pub fn auto_commit(&self) -> bool {
        self.state.lock().auto_commit.current.unwrap_or(true)
    }

    pub fn set_read_only(&self, value: bool) {
        let mut state = self.state.lock();
        let previous = state.read_only.current.or(Some(false));
        state.read_only.set(value, previous);
    }

    pub fn read_only(&self) -> bool {
        self.state.lock().read_only.current.unwrap_or(false)
    }

    pub fn set_catalog(&self, value: String) {
        let mut state = self.state.lock();
        let previous = state
            .catalog
            .current
            .clone()
            .or_else(|| self.defaults.catalog.clone());
        state.catalog.set(value, previous);
    }

    pub fn catalog(&self) -> Option<String> {
        self.state.lock().catalog.current.clone()
    }

    pub fn set_schema(&self, value: String) {
        let mut state = self.state.lock();
        let previous = state
            .schema
            .current
            .clone()
            .or_else(|| self.defaults.schema.clone());
        state.schema.set(value, previous);
    }

    pub fn schema(&self) -> Option<String> {
        self.state.lock().schema.current.clone()
    }

    pub fn set_transaction_isolation(&self, value: TransactionIsolationLevel) {
        let mut state = self.state.lock();
        let previous = state
            .transaction_isolation
            .current
            .or(Some(self.defaults.transaction_isolation));
        state.transaction_isolation.set(value, previous);
    }

    pub fn transaction_isolation(&self) -> Option<TransactionIsolationLevel> {
        self.state.lock().transaction_isolation.current
    }

    /// Replays every field with a set current value onto `target`, in the
    /// fixed field order. "Unsupported" dialect answers are swallowed; any
    /// other error aborts the transfer.
    pub async fn apply_current_state(
        &self,
        target: &Arc<dyn DriverConnection>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<(), WrapperError> {
        if !self.transfer_on_switch {
            return Ok(());
        }
        if self.transfer_in_progress.swap(true, Ordering::AcqRel) {
            debug!("Session state transfer already in progress; skipping.");
            return Ok(());
        }
        let result = self.apply_current_state_inner(target, dialect).await;
        self.transfer_in_progress.store(false, Ordering::Release);
        result
    }

    async fn apply_current_state_inner(
        &self,
        target: &Arc<dyn DriverConnection>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<(), WrapperError> {
        let state = self.snapshot();
        if let Some(auto_commit) = state.auto_commit.current {
            Self::apply(target, dialect.set_autocommit_query(auto_commit)).await?;
        }
        if let Some(read_only) = state.read_only.current {
            Self::apply(target, dialect.set_read_only_query(read_only)).await?;
        }
        if let Some(catalog) = &state.catalog.current {
            Self::apply(target, dialect.set_catalog_query(catalog)).await?;
        }
        if let Some(schema) = &state.schema.current {
            Self::apply(target, dialect.set_schema_query(schema)).await?;
        }
        if let Some(level) = state.transaction_isolation.current {
            Self::apply(target, dialect.set_transaction_isolation_query(level)).await?;
        }
        Ok(())
    }

    /// Restores the pristine values captured at first mutation, in the fixed
    /// field order. Fields never mutated are not touched.
    pub async fn apply_pristine_state(
        &self,
        target: &Arc<dyn DriverConnection>,
        dialect: &Arc<dyn DatabaseDialect>,
    ) -> Result<(), WrapperError> {
        if !self.reset_on_close {
            return Ok(());
        }
        let state = self.snapshot();
        if let Some(auto_commit) = state.auto_commit.pristine {
            Self::apply(target, dialect.set_autocommit_query(auto_commit)).await?;
        }
        if let Some(read_only) = state.read_only.pristine {
            Self::apply(target, dialect.set_read_only_query(read_only)).await?;
        }
        if let Some(catalog) = &state.catalog.pristine {
            Self::apply(target, dialect.set_catalog_query(catalog)).await?;
        }
        if let Some(schema) = &state.schema.pristine {
            Self::apply(target, dialect.set_schema_query(schema)).await?;
        }
        if let Some(level) = state.transaction_isolation.pristine {
            Self::apply(target, dialect.set_transaction_isolation_query(level)).await?;
        }
        Ok(())
    }

    /// Runs one dialect statement, swallowing "unsupported" answers.
    async fn apply(
        target: &Arc<dyn DriverConnection>,
        query: Result<String, WrapperError>,
    ) -> Result<(), WrapperError> {
        let sql = match query {
            Ok(sql) => sql,
            Err(WrapperError::UnsupportedMethod(reason)) => {
                debug!("Skipping unsupported session field: {}", reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        match target.execute(&sql).await {
            Ok(_) => Ok(()),
            Err(WrapperError::UnsupportedMethod(reason)) => {
                warn!("Target rejected session statement as unsupported: {}", reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
