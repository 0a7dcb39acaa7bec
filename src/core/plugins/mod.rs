// src/core/plugins/mod.rs

//! The plugin contract and pipeline types. Every public operation of the
//! logical connection flows through an ordered chain of plugins; each plugin
//! may do pre-work, call `next`, do post-work, and replace the result or
//! raise.

pub mod aurora_connection_tracker;
pub mod custom_endpoint;
pub mod default;
pub mod efm;
pub mod factory;
pub mod failover;
pub mod federated_auth;
pub mod iam;
pub mod limitless;
pub mod manager;
pub mod read_write_splitting;
pub mod secrets_manager;
pub mod service;
pub mod stale_dns;
pub mod timing;

use crate::core::driver::{ConnectSpec, DriverConnection, QueryResult};
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;

/// Wildcard entry for `subscribed_methods`.
pub const ALL_METHODS: &str = "*";

/// Method names used by the pipelines.
pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const FORCE_CONNECT: &str = "forceConnect";
    pub const QUERY: &str = "query";
    pub const EXECUTE: &str = "execute";
    pub const PING: &str = "ping";
    pub const IS_VALID: &str = "isValid";
    pub const ROLLBACK: &str = "rollback";
    pub const END: &str = "end";
    pub const SET_READ_ONLY: &str = "setReadOnly";
    pub const SET_AUTO_COMMIT: &str = "setAutoCommit";
    pub const SET_CATALOG: &str = "setCatalog";
    pub const SET_SCHEMA: &str = "setSchema";
    pub const SET_TRANSACTION_ISOLATION: &str = "setTransactionIsolation";
    pub const INIT_HOST_PROVIDER: &str = "initHostProvider";
    pub const NOTIFY_CONNECTION_CHANGED: &str = "notifyConnectionChanged";
    pub const NOTIFY_HOST_LIST_CHANGED: &str = "notifyHostListChanged";
}

/// The methods that hit the network and are therefore monitored and
/// failover-protected.
pub const NETWORK_BOUND_METHODS: &[&str] = &[
    methods::QUERY,
    methods::EXECUTE,
    methods::PING,
    methods::IS_VALID,
    methods::ROLLBACK,
    methods::END,
    methods::SET_READ_ONLY,
    methods::SET_AUTO_COMMIT,
    methods::SET_CATALOG,
    methods::SET_SCHEMA,
    methods::SET_TRANSACTION_ISOLATION,
];

/// What a pipeline execution produced.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    Query(QueryResult),
    Affected(u64),
    Flag(bool),
    Unit,
}

impl ExecuteOutcome {
    pub fn into_query_result(self) -> QueryResult {
        match self {
            ExecuteOutcome::Query(result) => result,
            ExecuteOutcome::Affected(rows_affected) => QueryResult {
                rows: Vec::new(),
                rows_affected,
            },
            _ => QueryResult::default(),
        }
    }
}

/// The terminal operation of an execute pipeline. It captures the plugin
/// service, so it always addresses the *current* target client, even after a
/// plugin has swapped it mid-pipeline.
pub type TargetFn =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ExecuteOutcome, WrapperError>> + Send + Sync>;

/// Context for the connect / force-connect pipelines. Owned and forwarded so
/// plugins can rewrite it (credentials, host) before the driver dials.
#[derive(Clone)]
pub struct ConnectContext {
    pub host: HostInfo,
    pub spec: ConnectSpec,
    pub is_initial: bool,
}

/// Context for the execute pipeline.
pub struct ExecuteContext {
    pub method: &'static str,
    pub sql: Option<String>,
    /// Set for the `setReadOnly` operation (and SQL-level toggles).
    pub set_read_only: Option<bool>,
    pub target: TargetFn,
}

/// Changes observed when the logical connection's target moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionChange {
    InitialConnection,
    HostChanged,
    PromotedToWriter,
    PromotedToReader,
    ConnectionObjectChanged,
}

/// A plugin's opinion on what to do with the replaced physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OldConnectionSuggestedAction {
    NoOpinion,
    Dispose,
    Preserve,
}

/// Continuation handle for the connect pipelines. `Copy`, so a plugin that
/// needs to retry (e.g. after a credential refresh) can call it twice.
#[derive(Clone, Copy)]
pub struct NextConnect<'a> {
    chain: &'a [Arc<dyn ConnectionPlugin>],
    index: usize,
    force: bool,
}

impl<'a> NextConnect<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn ConnectionPlugin>], force: bool) -> Self {
        Self {
            chain,
            index: 0,
            force,
        }
    }

    pub fn call(
        self,
        ctx: ConnectContext,
    ) -> BoxFuture<'a, Result<Arc<dyn DriverConnection>, WrapperError>> {
        Box::pin(async move {
            match self.chain.get(self.index) {
                Some(plugin) => {
                    let next = NextConnect {
                        chain: self.chain,
                        index: self.index + 1,
                        force: self.force,
                    };
                    if self.force {
                        plugin.force_connect(ctx, next).await
                    } else {
                        plugin.connect(ctx, next).await
                    }
                }
                None => Err(WrapperError::Internal(
                    "connect pipeline ended without a terminal plugin".to_string(),
                )),
            }
        })
    }
}

/// Continuation handle for the execute pipeline.
#[derive(Clone, Copy)]
pub struct NextExecute<'a> {
    chain: &'a [Arc<dyn ConnectionPlugin>],
    index: usize,
    ctx: &'a ExecuteContext,
}

impl<'a> NextExecute<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn ConnectionPlugin>], ctx: &'a ExecuteContext) -> Self {
        Self {
            chain,
            index: 0,
            ctx,
        }
    }

    pub fn call(self) -> BoxFuture<'a, Result<ExecuteOutcome, WrapperError>> {
        Box::pin(async move {
            match self.chain.get(self.index) {
                Some(plugin) => {
                    let next = NextExecute {
                        chain: self.chain,
                        index: self.index + 1,
                        ctx: self.ctx,
                    };
                    plugin.execute(self.ctx, next).await
                }
                None => Err(WrapperError::Internal(
                    "execute pipeline ended without a terminal plugin".to_string(),
                )),
            }
        })
    }
}

/// A staged interceptor participating in connect-time and per-call decisions.
///
/// A plugin participates in a pipeline only when the method name is in its
/// `subscribed_methods` set (or the set contains `"*"`); the pipeline skips
/// non-subscribed plugins transparently. The set is read once at chain build.
#[async_trait]
pub trait ConnectionPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn subscribed_methods(&self) -> &'static [&'static str];

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        next.call(ctx).await
    }

    async fn force_connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        next.call(ctx).await
    }

    async fn execute(
        &self,
        _ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        next.call().await
    }

    async fn init_host_provider(&self) -> Result<(), WrapperError> {
        Ok(())
    }

    async fn notify_connection_changed(
        &self,
        _changes: &HashSet<ConnectionChange>,
    ) -> OldConnectionSuggestedAction {
        OldConnectionSuggestedAction::NoOpinion
    }

    async fn notify_host_list_changed(&self, _hosts: &[HostInfo]) {}
}
