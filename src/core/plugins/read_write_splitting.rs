// src/core/plugins/read_write_splitting.rs

//! Routes `setReadOnly` between the writer and a selected reader, keeping one
//! cached writer connection and one cached reader connection per logical
//! connection.

use super::service::PluginService;
use super::{
    ConnectionChange, ConnectionPlugin, ExecuteContext, ExecuteOutcome, NextExecute,
    OldConnectionSuggestedAction, methods,
};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use crate::core::sql;
use crate::core::topology::writer_of;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const READ_WRITE_SPLITTING_PLUGIN_NAME: &str = "readWriteSplitting";

const SUBSCRIBED: &[&str] = &[
    methods::QUERY,
    methods::EXECUTE,
    methods::SET_READ_ONLY,
    methods::NOTIFY_CONNECTION_CHANGED,
];

struct CachedTarget {
    client: Arc<dyn DriverConnection>,
    host: HostInfo,
    cached_at: Instant,
}

pub struct ReadWriteSplittingPlugin {
    service: Arc<PluginService>,
    writer_cache: Mutex<Option<CachedTarget>>,
    reader_cache: Mutex<Option<CachedTarget>>,
    /// Set while this plugin itself swaps the target, so its own
    /// notification does not invalidate the caches it is maintaining.
    switching: AtomicBool,
}

impl ReadWriteSplittingPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self {
            service,
            writer_cache: Mutex::new(None),
            reader_cache: Mutex::new(None),
            switching: AtomicBool::new(false),
        }
    }

    async fn switch_if_required(&self, read_only: bool) -> Result<(), WrapperError> {
        let current_host = self.service.current_host().ok_or_else(|| {
            WrapperError::InvalidState("cannot switch read-only state before connecting".to_string())
        })?;

        if let Err(e) = self.service.refresh_host_list().await {
            debug!("Topology refresh before read-only switch failed: {}", e);
        }

        if read_only {
            if self.service.is_in_transaction() {
                // Cannot leave the writer mid-transaction; the toggle itself
                // still reaches the current target.
                debug!("In a transaction; staying on {} for read-only.", current_host.url());
                return Ok(());
            }
            if current_host.role == HostRole::Reader {
                return Ok(());
            }
            self.switch_to_reader(&current_host).await
        } else {
            if self.service.is_in_transaction() {
                return Err(WrapperError::InvalidState(
                    "setReadOnly(false) is not allowed inside a transaction".to_string(),
                ));
            }
            if current_host.role == HostRole::Writer {
                return Ok(());
            }
            self.switch_to_writer(&current_host).await
        }
    }

    async fn switch_to_reader(&self, current_host: &HostInfo) -> Result<(), WrapperError> {
        // Remember the writer we are leaving so switching back is cheap.
        if current_host.role == HostRole::Writer {
            if let Some(client) = self.service.current_client() {
                *self.writer_cache.lock().await = Some(CachedTarget {
                    client,
                    host: current_host.clone(),
                    cached_at: Instant::now(),
                });
            }
        }

        let reader = match self.cached_reader().await {
            Some(reader) => Some(reader),
            None => self.connect_to_reader().await,
        };
        let Some((client, host)) = reader else {
            warn!(
                "No reader is reachable; staying on the writer {}.",
                current_host.url()
            );
            return Ok(());
        };

        self.install(Arc::clone(&client), host.clone()).await?;
        *self.reader_cache.lock().await = Some(CachedTarget {
            client,
            host,
            cached_at: Instant::now(),
        });

        // A pooled writer standby is cheap to re-borrow; return it.
        let mut writer_cache = self.writer_cache.lock().await;
        if let Some(writer) = writer_cache.as_ref() {
            if writer.client.is_pooled() {
                let _ = writer.client.close().await;
                *writer_cache = None;
            }
        }
        Ok(())
    }

    async fn switch_to_writer(&self, current_host: &HostInfo) -> Result<(), WrapperError> {
        if current_host.role == HostRole::Reader {
            if let Some(client) = self.service.current_client() {
                *self.reader_cache.lock().await = Some(CachedTarget {
                    client,
                    host: current_host.clone(),
                    cached_at: Instant::now(),
                });
            }
        }

        let cached = {
            let mut cache = self.writer_cache.lock().await;
            match cache.take() {
                Some(writer) if !writer.client.is_closed() => Some(writer),
                _ => None,
            }
        };
        let (client, host) = match cached {
            Some(writer) => (writer.client, writer.host),
            None => {
                let writer_host = writer_of(&self.service.hosts()).cloned().ok_or_else(|| {
                    WrapperError::UnavailableHost("no writer in the current topology".to_string())
                })?;
                let client = self.service.connect(&writer_host, false).await?;
                (client, writer_host)
            }
        };

        self.install(Arc::clone(&client), host.clone()).await?;
        *self.writer_cache.lock().await = Some(CachedTarget {
            client,
            host,
            cached_at: Instant::now(),
        });
        Ok(())
    }

    async fn cached_reader(&self) -> Option<(Arc<dyn DriverConnection>, HostInfo)> {
        let keep_alive = self.service.settings().reader_cache_keep_alive;
        let mut cache = self.reader_cache.lock().await;
        let stale = match cache.as_ref() {
            Some(reader)
                if !reader.client.is_closed()
                    && (keep_alive.is_zero() || reader.cached_at.elapsed() < keep_alive) =>
            {
                return Some((Arc::clone(&reader.client), reader.host.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            *cache = None;
        }
        None
    }

    /// Walks the configured selector over the eligible readers until one
    /// connects, marking candidates that fail.
    async fn connect_to_reader(&self) -> Option<(Arc<dyn DriverConnection>, HostInfo)> {
        let selector = match self.service.reader_selector() {
            Ok(selector) => selector,
            Err(e) => {
                warn!("Reader selector unavailable: {}", e);
                return None;
            }
        };
        let settings = self.service.settings();
        let mut excluded: HashSet<String> = HashSet::new();
        loop {
            let hosts: Vec<HostInfo> = self
                .service
                .hosts()
                .into_iter()
                .filter(|h| !excluded.contains(&h.url()))
                .collect();
            let host = match selector.select(&hosts, HostRole::Reader, settings) {
                Ok(host) => host,
                Err(_) => return None,
            };
            match self.service.connect(&host, false).await {
                Ok(client) => {
                    debug!("Reader {} selected for read-only work.", host.url());
                    return Some((client, host));
                }
                Err(e) => {
                    debug!("Reader {} rejected the connection: {}", host.url(), e);
                    excluded.insert(host.url());
                }
            }
        }
    }

    async fn install(
        &self,
        client: Arc<dyn DriverConnection>,
        host: HostInfo,
    ) -> Result<(), WrapperError> {
        self.switching.store(true, Ordering::Release);
        let result = self.service.set_current_client(client, host).await;
        self.switching.store(false, Ordering::Release);
        result.map(|_| ())
    }

    async fn invalidate_caches(&self) {
        let writer = self.writer_cache.lock().await.take();
        let reader = self.reader_cache.lock().await.take();
        for cached in [writer, reader].into_iter().flatten() {
            if cached.client.is_pooled() {
                let _ = cached.client.close().await;
            }
        }
    }
}

#[async_trait::async_trait]
impl ConnectionPlugin for ReadWriteSplittingPlugin {
    fn name(&self) -> &'static str {
        READ_WRITE_SPLITTING_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        SUBSCRIBED
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        let toggle = ctx
            .set_read_only
            .or_else(|| ctx.sql.as_deref().and_then(sql::parse_set_read_only));
        if let Some(read_only) = toggle {
            self.switch_if_required(read_only).await?;
        }
        next.call().await
    }

    async fn notify_connection_changed(
        &self,
        changes: &HashSet<ConnectionChange>,
    ) -> OldConnectionSuggestedAction {
        if self.switching.load(Ordering::Acquire) {
            // Our own switch; the replaced client is one of our caches.
            return OldConnectionSuggestedAction::Preserve;
        }
        if changes.contains(&ConnectionChange::ConnectionObjectChanged)
            || changes.contains(&ConnectionChange::HostChanged)
        {
            // Some other plugin (failover) moved the connection; the cached
            // targets may point at dead hosts.
            self.invalidate_caches().await;
        }
        OldConnectionSuggestedAction::NoOpinion
    }
}
