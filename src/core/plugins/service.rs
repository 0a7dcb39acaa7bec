// src/core/plugins/service.rs

//! The per-logical-connection hub: current target client and host, topology
//! access, session state, transaction tracking, and allow/block filtering.
//! Plugins receive an `Arc<PluginService>`; the service reaches back to the
//! plugin manager through a weak reference to break the cycle.

use super::manager::PluginManager;
use super::{ConnectContext, ConnectionChange, OldConnectionSuggestedAction};
use crate::config::WrapperSettings;
use crate::connection::session::{SessionStateDefaults, SessionStateService};
use crate::core::custom_endpoint::{AllowedAndBlockedHosts, AllowedHostsSink};
use crate::core::dialect::DatabaseDialect;
use crate::core::driver::{DriverConnection, DriverFactory};
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostInfo};
use crate::core::runtime::WrapperRuntime;
use crate::core::selectors::HostSelector;
use crate::core::sql;
use crate::core::topology::{RdsHostListProvider, TopologySnapshot};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

pub struct PluginService {
    runtime: Arc<WrapperRuntime>,
    settings: Arc<WrapperSettings>,
    factory: Arc<dyn DriverFactory>,
    dialect: RwLock<Arc<dyn DatabaseDialect>>,
    session_state: SessionStateService,

    manager: RwLock<Weak<PluginManager>>,
    host_list_provider: RwLock<Option<Arc<RdsHostListProvider>>>,

    current_client: RwLock<Option<Arc<dyn DriverConnection>>>,
    current_host: RwLock<Option<HostInfo>>,
    in_transaction: AtomicBool,
    allowed_and_blocked: RwLock<Option<AllowedAndBlockedHosts>>,
}

impl PluginService {
    pub fn new(
        runtime: Arc<WrapperRuntime>,
        settings: Arc<WrapperSettings>,
        factory: Arc<dyn DriverFactory>,
        dialect: Arc<dyn DatabaseDialect>,
    ) -> Arc<Self> {
        let defaults = SessionStateDefaults {
            catalog: (!settings.database.is_empty()).then(|| settings.database.clone()),
            schema: dialect.default_schema().map(str::to_string),
            transaction_isolation: dialect.default_transaction_isolation(),
        };
        let session_state = SessionStateService::new(
            settings.transfer_session_state_on_switch,
            settings.reset_session_state_on_close,
            defaults,
        );
        Arc::new(Self {
            runtime,
            settings,
            factory,
            dialect: RwLock::new(dialect),
            session_state,
            manager: RwLock::new(Weak::new()),
            host_list_provider: RwLock::new(None),
            current_client: RwLock::new(None),
            current_host: RwLock::new(None),
            in_transaction: AtomicBool::new(false),
            allowed_and_blocked: RwLock::new(None),
        })
    }

    pub fn runtime(&self) -> &Arc<WrapperRuntime> {
        &self.runtime
    }

    pub fn settings(&self) -> &Arc<WrapperSettings> {
        &self.settings
    }

    pub fn factory(&self) -> &Arc<dyn DriverFactory> {
        &self.factory
    }

    pub fn dialect(&self) -> Arc<dyn DatabaseDialect> {
        Arc::clone(&self.dialect.read())
    }

    /// Installs a promoted dialect after connect-time probing.
    pub fn set_dialect(&self, dialect: Arc<dyn DatabaseDialect>) {
        *self.dialect.write() = dialect;
    }

    pub fn session_state(&self) -> &SessionStateService {
        &self.session_state
    }

    pub(crate) fn set_manager(&self, manager: Weak<PluginManager>) {
        *self.manager.write() = manager;
    }

    pub fn manager(&self) -> Result<Arc<PluginManager>, WrapperError> {
        self.manager
            .read()
            .upgrade()
            .ok_or_else(|| WrapperError::Internal("plugin manager is gone".to_string()))
    }

    // --- host list provider ---

    /// Creates the host-list provider (joining the cluster's shared topology
    /// monitor) and runs the init-host-provider pipeline.
    pub async fn init_host_provider(self: &Arc<Self>) -> Result<(), WrapperError> {
        let provider = Arc::new(RdsHostListProvider::new(
            &self.runtime,
            &self.settings,
            &self.dialect(),
            &self.factory,
        ));
        *self.host_list_provider.write() = Some(provider);
        self.manager()?.init_host_provider().await
    }

    pub fn host_list_provider(&self) -> Result<Arc<RdsHostListProvider>, WrapperError> {
        self.host_list_provider
            .read()
            .clone()
            .ok_or_else(|| WrapperError::InvalidState("host list provider not initialized".to_string()))
    }

    /// The topology visible to this logical connection: availability-overlaid
    /// and filtered through the custom-endpoint allow/block sets.
    pub fn hosts(&self) -> Vec<HostInfo> {
        let all = self.all_hosts();
        match self.allowed_and_blocked.read().clone() {
            Some(constraint) => all
                .into_iter()
                .filter(|h| constraint.allows(h.host_id_or_host()))
                .collect(),
            None => all,
        }
    }

    /// The availability-overlaid topology without allow/block filtering.
    pub fn all_hosts(&self) -> Vec<HostInfo> {
        let hosts = match self.host_list_provider.read().clone() {
            Some(provider) => provider.hosts(),
            None => Vec::new(),
        };
        self.runtime.availability().overlay(&hosts)
    }

    pub async fn refresh_host_list(&self) -> Result<TopologySnapshot, WrapperError> {
        let client = self.require_client()?;
        self.host_list_provider()?.refresh(&client).await
    }

    pub async fn force_refresh_host_list(&self, timeout: Duration) -> Option<TopologySnapshot> {
        let client = self.current_client()?;
        self.host_list_provider()
            .ok()?
            .force_refresh(&client, timeout)
            .await
    }

    /// Which topology host the current client is connected to.
    pub async fn identify_connection(&self) -> Option<HostInfo> {
        let client = self.current_client()?;
        self.host_list_provider()
            .ok()?
            .identify_connection(&client)
            .await
    }

    // --- current target ---

    pub fn current_client(&self) -> Option<Arc<dyn DriverConnection>> {
        self.current_client.read().clone()
    }

    pub fn require_client(&self) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        self.current_client()
            .ok_or_else(|| WrapperError::InvalidState("connection is not open".to_string()))
    }

    pub fn current_host(&self) -> Option<HostInfo> {
        self.current_host.read().clone()
    }

    /// Replaces the logical connection's target, preserving wrapper identity:
    /// rolls back a doomed transaction when configured, transfers session
    /// state onto the new target, notifies plugins, and disposes the old
    /// physical connection unless a plugin asks to preserve it.
    pub async fn set_current_client(
        &self,
        new_client: Arc<dyn DriverConnection>,
        new_host: HostInfo,
    ) -> Result<HashSet<ConnectionChange>, WrapperError> {
        let old_client = self.current_client();
        let old_host = self.current_host();

        let mut changes = HashSet::new();
        match (&old_client, &old_host) {
            (Some(_), Some(old_host)) => {
                changes.insert(ConnectionChange::ConnectionObjectChanged);
                if old_host.url() != new_host.url() {
                    changes.insert(ConnectionChange::HostChanged);
                }
                if old_host.role != new_host.role {
                    changes.insert(if new_host.is_writer() {
                        ConnectionChange::PromotedToWriter
                    } else {
                        ConnectionChange::PromotedToReader
                    });
                }
            }
            _ => {
                changes.insert(ConnectionChange::InitialConnection);
            }
        }

        let is_switch = !changes.contains(&ConnectionChange::InitialConnection);
        if is_switch {
            if let Some(old_client) = &old_client {
                if self.settings.rollback_on_switch && self.is_in_transaction() {
                    debug!("Rolling back open transaction before target switch.");
                    let _ = old_client.execute("ROLLBACK").await;
                    self.set_in_transaction(false);
                }
            }
        }

        *self.current_client.write() = Some(Arc::clone(&new_client));
        *self.current_host.write() = Some(new_host.clone());

        if is_switch {
            let dialect = self.dialect();
            if let Err(e) = self
                .session_state
                .apply_current_state(&new_client, &dialect)
                .await
            {
                warn!("Session state transfer to {} failed: {}", new_host.url(), e);
            }
        }

        let action = self.manager()?.notify_connection_changed(&changes).await;
        if let Some(old_client) = old_client {
            if !Arc::ptr_eq(&old_client, &new_client)
                && action != OldConnectionSuggestedAction::Preserve
            {
                let _ = old_client.close().await;
            }
        }

        Ok(changes)
    }

    /// Detaches the physical target after `end()`.
    pub fn clear_current_client(&self) {
        *self.current_client.write() = None;
        *self.current_host.write() = None;
    }

    // --- transaction tracking ---

    pub fn is_in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    pub fn set_in_transaction(&self, value: bool) {
        self.in_transaction.store(value, Ordering::Release);
    }

    /// Keeps the transaction flag in sync with statements flowing through the
    /// logical connection.
    pub fn update_transaction_state(&self, sql: &str) {
        if sql::starts_transaction(sql) {
            self.set_in_transaction(true);
        } else if sql::closes_transaction(sql) {
            self.set_in_transaction(false);
        }
    }

    // --- connect pipelines (used by plugins to open new targets) ---

    pub async fn connect(
        &self,
        host: &HostInfo,
        is_initial: bool,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let ctx = ConnectContext {
            host: host.clone(),
            spec: self.settings.connect_spec_for(host),
            is_initial,
        };
        self.manager()?.connect(ctx, false).await
    }

    /// Connect bypassing interception-heavy plugins (the force pipeline).
    pub async fn force_connect(
        &self,
        host: &HostInfo,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let ctx = ConnectContext {
            host: host.clone(),
            spec: self.settings.connect_spec_for(host),
            is_initial: false,
        };
        self.manager()?.connect(ctx, true).await
    }

    // --- classification and availability ---

    pub fn is_network_error(&self, error: &WrapperError) -> bool {
        self.dialect().is_network_error(error)
    }

    pub fn is_access_denied(&self, error: &WrapperError) -> bool {
        self.dialect().is_access_denied(error)
    }

    pub fn mark_host_availability(&self, url: &str, availability: HostAvailability) {
        self.runtime.availability().set_availability(url, availability);
    }

    pub fn reader_selector(&self) -> Result<Arc<dyn HostSelector>, WrapperError> {
        self.runtime
            .selector(&self.settings.reader_host_selector_strategy)
    }

    pub fn allowed_and_blocked(&self) -> Option<AllowedAndBlockedHosts> {
        self.allowed_and_blocked.read().clone()
    }
}

impl AllowedHostsSink for PluginService {
    fn apply_allowed_and_blocked(&self, hosts: AllowedAndBlockedHosts) {
        debug!(
            "Allowed/blocked hosts updated: allowed={:?}, blocked={:?}",
            hosts.allowed, hosts.blocked
        );
        *self.allowed_and_blocked.write() = Some(hosts);
    }
}
