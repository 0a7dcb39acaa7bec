// src/core/plugins/manager.rs

//! Runs the pipelines over the ordered plugin chain. Subscription sets are
//! read once per plugin when the manager is built.

use super::{
    ALL_METHODS, ConnectContext, ConnectionChange, ConnectionPlugin, ExecuteContext,
    ExecuteOutcome, NextConnect, NextExecute, OldConnectionSuggestedAction, methods,
};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

struct MethodSubscription {
    wildcard: bool,
    methods: HashSet<&'static str>,
}

/// One ordered plugin chain per logical connection, terminal plugin included.
pub struct PluginManager {
    plugins: Vec<Arc<dyn ConnectionPlugin>>,
    subscriptions: Vec<MethodSubscription>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl PluginManager {
    pub fn new(plugins: Vec<Arc<dyn ConnectionPlugin>>) -> Arc<Self> {
        let subscriptions = plugins
            .iter()
            .map(|plugin| {
                let methods = plugin.subscribed_methods();
                MethodSubscription {
                    wildcard: methods.contains(&ALL_METHODS),
                    methods: methods.iter().copied().collect(),
                }
            })
            .collect();
        debug!(
            "Plugin chain: [{}]",
            plugins
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Arc::new(Self {
            plugins,
            subscriptions,
        })
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn subscribed(&self, index: usize, method: &str) -> bool {
        let subscription = &self.subscriptions[index];
        subscription.wildcard || subscription.methods.contains(method)
    }

    /// The plugins participating in `method`, in chain order.
    fn chain_for(&self, method: &str) -> Vec<Arc<dyn ConnectionPlugin>> {
        self.plugins
            .iter()
            .enumerate()
            .filter(|(index, _)| self.subscribed(*index, method))
            .map(|(_, plugin)| Arc::clone(plugin))
            .collect()
    }

    pub async fn connect(
        &self,
        ctx: ConnectContext,
        force: bool,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let method = if force {
            methods::FORCE_CONNECT
        } else {
            methods::CONNECT
        };
        let chain = self.chain_for(method);
        NextConnect::new(&chain, force).call(ctx).await
    }

    pub async fn execute(&self, ctx: ExecuteContext) -> Result<ExecuteOutcome, WrapperError> {
        let chain = self.chain_for(ctx.method);
        NextExecute::new(&chain, &ctx).call().await
    }

    pub async fn init_host_provider(&self) -> Result<(), WrapperError> {
        for (index, plugin) in self.plugins.iter().enumerate() {
            if self.subscribed(index, methods::INIT_HOST_PROVIDER) {
                plugin.init_host_provider().await?;
            }
        }
        Ok(())
    }

    /// Collects every subscribed plugin's opinion; the strongest wins
    /// (preserve over dispose over no opinion).
    pub async fn notify_connection_changed(
        &self,
        changes: &HashSet<ConnectionChange>,
    ) -> OldConnectionSuggestedAction {
        let mut action = OldConnectionSuggestedAction::NoOpinion;
        for (index, plugin) in self.plugins.iter().enumerate() {
            if self.subscribed(index, methods::NOTIFY_CONNECTION_CHANGED) {
                action = action.max(plugin.notify_connection_changed(changes).await);
            }
        }
        action
    }

    pub async fn notify_host_list_changed(&self, hosts: &[HostInfo]) {
        for (index, plugin) in self.plugins.iter().enumerate() {
            if self.subscribed(index, methods::NOTIFY_HOST_LIST_CHANGED) {
                plugin.notify_host_list_changed(hosts).await;
            }
        }
    }
}
