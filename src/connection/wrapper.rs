// src/connection/wrapper.rs

//! The logical connection the application holds. Its physical target can be
//! replaced underneath it by the failover coordinator or the read/write
//! splitter; the wrapper identity is preserved.

use crate::config::WrapperSettings;
use crate::core::dialect::resolve_dialect;
use crate::core::driver::{DriverFactory, QueryResult, TransactionIsolationLevel};
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use crate::core::plugins::factory::{AuxServices, build_plugin_manager};
use crate::core::plugins::manager::PluginManager;
use crate::core::plugins::service::PluginService;
use crate::core::plugins::{ConnectContext, ExecuteContext, ExecuteOutcome, TargetFn, methods};
use crate::core::runtime::WrapperRuntime;
use std::sync::Arc;
use std::sync::Weak;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Builder for a logical connection.
pub struct WrapperBuilder {
    settings: WrapperSettings,
    runtime: Arc<WrapperRuntime>,
    factory: Arc<dyn DriverFactory>,
    aux: AuxServices,
}

impl WrapperBuilder {
    pub fn new(
        settings: WrapperSettings,
        runtime: Arc<WrapperRuntime>,
        factory: Arc<dyn DriverFactory>,
    ) -> Self {
        Self {
            settings,
            runtime,
            factory,
            aux: AuxServices::default(),
        }
    }

    pub fn with_aux_services(mut self, aux: AuxServices) -> Self {
        self.aux = aux;
        self
    }

    /// Builds the plugin chain, initializes the host provider, and opens the
    /// initial connection through the connect pipeline.
    pub async fn connect(self) -> Result<ConnectionWrapper, WrapperError> {
        self.settings.validate()?;
        let settings = Arc::new(self.settings);
        let dialect = crate::core::dialect::dialect_for_code(settings.dialect);
        let service = PluginService::new(
            Arc::clone(&self.runtime),
            Arc::clone(&settings),
            Arc::clone(&self.factory),
            dialect,
        );
        let manager = build_plugin_manager(&service, &self.aux)?;
        service.init_host_provider().await?;

        let provider = service.host_list_provider()?;
        let initial_host = provider.initial_host().clone();
        let ctx = ConnectContext {
            host: initial_host.clone(),
            spec: settings.connect_spec_for(&initial_host),
            is_initial: true,
        };
        let client = manager.connect(ctx, false).await?;

        // Promote the dialect now that a live connection can be probed.
        let promoted = resolve_dialect(settings.dialect, client.as_ref()).await;
        service.set_dialect(promoted);

        // A blocking refresh fills the topology before the first statement.
        if let Err(e) = provider.refresh(&client).await {
            debug!("Initial topology refresh failed: {}", e);
        }
        let connected_host = provider
            .identify_connection(&client)
            .await
            .unwrap_or(initial_host);
        service.set_current_client(client, connected_host).await?;

        let topology_listener = spawn_topology_listener(&service, &manager);
        info!(
            "Connected to {} (cluster '{}').",
            service
                .current_host()
                .map(|h| h.url())
                .unwrap_or_default(),
            provider.cluster_id()
        );
        Ok(ConnectionWrapper {
            service,
            manager,
            settings,
            topology_listener,
        })
    }
}

/// Forwards topology publications into the notify-host-list-changed pipeline
/// for as long as the chain is alive.
fn spawn_topology_listener(
    service: &Arc<PluginService>,
    manager: &Arc<PluginManager>,
) -> JoinHandle<()> {
    let mut rx = service
        .host_list_provider()
        .map(|provider| provider.monitor().subscribe())
        .expect("host provider was initialized before the listener starts");
    let manager: Weak<PluginManager> = Arc::downgrade(manager);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let hosts = rx.borrow_and_update().clone();
            match manager.upgrade() {
                Some(manager) => manager.notify_host_list_changed(&hosts).await,
                None => return,
            }
        }
    })
}

pub struct ConnectionWrapper {
    service: Arc<PluginService>,
    manager: Arc<PluginManager>,
    settings: Arc<WrapperSettings>,
    topology_listener: JoinHandle<()>,
}

impl std::fmt::Debug for ConnectionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWrapper")
            .field("manager", &self.manager)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ConnectionWrapper {
    /// Starts a builder; `connect()` on it yields the live wrapper.
    pub fn builder(
        settings: WrapperSettings,
        runtime: Arc<WrapperRuntime>,
        factory: Arc<dyn DriverFactory>,
    ) -> WrapperBuilder {
        WrapperBuilder::new(settings, runtime, factory)
    }

    pub fn plugin_service(&self) -> &Arc<PluginService> {
        &self.service
    }

    pub fn current_host(&self) -> Option<HostInfo> {
        self.service.current_host()
    }

    pub fn hosts(&self) -> Vec<HostInfo> {
        self.service.hosts()
    }

    async fn run(
        &self,
        method: &'static str,
        sql: Option<String>,
        set_read_only: Option<bool>,
        target: TargetFn,
    ) -> Result<ExecuteOutcome, WrapperError> {
        let ctx = ExecuteContext {
            method,
            sql,
            set_read_only,
            target,
        };
        self.manager.execute(ctx).await
    }

    pub async fn query(&self, sql: &str) -> Result<QueryResult, WrapperError> {
        let service = Arc::clone(&self.service);
        let sql_owned = sql.to_string();
        let budget = self.settings.wrapper_query_timeout;
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            let sql = sql_owned.clone();
            Box::pin(async move {
                let client = service.require_client()?;
                let result = tokio::time::timeout(budget, client.query(&sql))
                    .await
                    .map_err(|_| WrapperError::InternalQueryTimeout(budget))??;
                Ok(ExecuteOutcome::Query(result))
            })
        });
        let outcome = self.run(methods::QUERY, Some(sql.to_string()), None, target).await?;
        self.service.update_transaction_state(sql);
        Ok(outcome.into_query_result())
    }

    pub async fn execute(&self, sql: &str) -> Result<u64, WrapperError> {
        let service = Arc::clone(&self.service);
        let sql_owned = sql.to_string();
        let budget = self.settings.wrapper_query_timeout;
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            let sql = sql_owned.clone();
            Box::pin(async move {
                let client = service.require_client()?;
                let affected = tokio::time::timeout(budget, client.execute(&sql))
                    .await
                    .map_err(|_| WrapperError::InternalQueryTimeout(budget))??;
                Ok(ExecuteOutcome::Affected(affected))
            })
        });
        let outcome = self
            .run(methods::EXECUTE, Some(sql.to_string()), None, target)
            .await?;
        self.service.update_transaction_state(sql);
        match outcome {
            ExecuteOutcome::Affected(n) => Ok(n),
            other => Ok(other.into_query_result().rows_affected),
        }
    }

    pub async fn is_valid(&self) -> bool {
        let service = Arc::clone(&self.service);
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            Box::pin(async move {
                let client = service.require_client()?;
                client.ping().await?;
                Ok(ExecuteOutcome::Flag(true))
            })
        });
        matches!(
            self.run(methods::IS_VALID, None, None, target).await,
            Ok(ExecuteOutcome::Flag(true))
        )
    }

    pub async fn rollback(&self) -> Result<(), WrapperError> {
        let service = Arc::clone(&self.service);
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            Box::pin(async move {
                let client = service.require_client()?;
                client.execute("ROLLBACK").await?;
                service.set_in_transaction(false);
                Ok(ExecuteOutcome::Unit)
            })
        });
        self.run(methods::ROLLBACK, None, None, target).await?;
        Ok(())
    }

    /// Closes the physical target, restoring captured pristine session state
    /// first. The shared runtime (monitors, pools) stays up for other
    /// logical connections.
    pub async fn end(&self) -> Result<(), WrapperError> {
        let service = Arc::clone(&self.service);
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            Box::pin(async move {
                let dialect = service.dialect();
                if let Ok(client) = service.require_client() {
                    if let Err(e) = service
                        .session_state()
                        .apply_pristine_state(&client, &dialect)
                        .await
                    {
                        debug!("Pristine session state restore failed: {}", e);
                    }
                    let _ = client.close().await;
                }
                Ok(ExecuteOutcome::Unit)
            })
        });
        let result = self.run(methods::END, None, None, target).await;
        self.service.clear_current_client();
        self.topology_listener.abort();
        result.map(|_| ())
    }

    // --- session state accessors ---

    pub async fn set_read_only(&self, read_only: bool) -> Result<(), WrapperError> {
        let service = Arc::clone(&self.service);
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            Box::pin(async move {
                let dialect = service.dialect();
                let client = service.require_client()?;
                match dialect.set_read_only_query(read_only) {
                    Ok(sql) => {
                        client.execute(&sql).await?;
                    }
                    Err(WrapperError::UnsupportedMethod(_)) => {}
                    Err(e) => return Err(e),
                }
                service.session_state().set_read_only(read_only);
                Ok(ExecuteOutcome::Unit)
            })
        });
        self.run(methods::SET_READ_ONLY, None, Some(read_only), target)
            .await?;
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.service.session_state().read_only()
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), WrapperError> {
        let service = Arc::clone(&self.service);
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            Box::pin(async move {
                let dialect = service.dialect();
                let client = service.require_client()?;
                match dialect.set_autocommit_query(auto_commit) {
                    Ok(sql) => {
                        client.execute(&sql).await?;
                    }
                    Err(WrapperError::UnsupportedMethod(_)) => {}
                    Err(e) => return Err(e),
                }
                service.session_state().set_auto_commit(auto_commit);
                Ok(ExecuteOutcome::Unit)
            })
        });
        self.run(methods::SET_AUTO_COMMIT, None, None, target).await?;
        Ok(())
    }

    pub fn get_auto_commit(&self) -> bool {
        self.service.session_state().auto_commit()
    }

    pub async fn set_catalog(&self, catalog: &str) -> Result<(), WrapperError> {
        let service = Arc::clone(&self.service);
        let catalog_owned = catalog.to_string();
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            let catalog = catalog_owned.clone();
            Box::pin(async move {
                let dialect = service.dialect();
                let client = service.require_client()?;
                match dialect.set_catalog_query(&catalog) {
                    Ok(sql) => {
                        client.execute(&sql).await?;
                    }
                    Err(WrapperError::UnsupportedMethod(_)) => {}
                    Err(e) => return Err(e),
                }
                service.session_state().set_catalog(catalog);
                Ok(ExecuteOutcome::Unit)
            })
        });
        self.run(methods::SET_CATALOG, None, None, target).await?;
        Ok(())
    }

    pub fn get_catalog(&self) -> Option<String> {
        self.service.session_state().catalog()
    }

    pub async fn set_schema(&self, schema: &str) -> Result<(), WrapperError> {
        let service = Arc::clone(&self.service);
        let schema_owned = schema.to_string();
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            let schema = schema_owned.clone();
            Box::pin(async move {
                let dialect = service.dialect();
                let client = service.require_client()?;
                match dialect.set_schema_query(&schema) {
                    Ok(sql) => {
                        client.execute(&sql).await?;
                    }
                    Err(WrapperError::UnsupportedMethod(_)) => {}
                    Err(e) => return Err(e),
                }
                service.session_state().set_schema(schema);
                Ok(ExecuteOutcome::Unit)
            })
        });
        self.run(methods::SET_SCHEMA, None, None, target).await?;
        Ok(())
    }

    pub fn get_schema(&self) -> Option<String> {
        self.service.session_state().schema()
    }

    pub async fn set_transaction_isolation(&self, level: u8) -> Result<(), WrapperError> {
        let level = TransactionIsolationLevel::from_level(level)?;
        let service = Arc::clone(&self.service);
        let target: TargetFn = Arc::new(move || {
            let service = Arc::clone(&service);
            Box::pin(async move {
                let dialect = service.dialect();
                let client = service.require_client()?;
                match dialect.set_transaction_isolation_query(level) {
                    Ok(sql) => {
                        client.execute(&sql).await?;
                    }
                    Err(WrapperError::UnsupportedMethod(_)) => {}
                    Err(e) => return Err(e),
                }
                service.session_state().set_transaction_isolation(level);
                Ok(ExecuteOutcome::Unit)
            })
        });
        self.run(methods::SET_TRANSACTION_ISOLATION, None, None, target)
            .await?;
        Ok(())
    }

    pub fn get_transaction_isolation(&self) -> Option<TransactionIsolationLevel> {
        self.service.session_state().transaction_isolation()
    }
}

impl Drop for ConnectionWrapper {
    fn drop(&mut self) {
        self.topology_listener.abort();
    }
}
