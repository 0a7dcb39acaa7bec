// src/core/providers/pooled.rs

//! Internal connection pools, keyed by `(instance URL, user-derived key)`.
//!
//! Pools live in a sliding-expiration cache whose disposal is gated on the
//! pool being fully idle, so entries with borrowed connections survive
//! expiry until returned.

use super::ConnectionProvider;
use crate::config::WrapperSettings;
use crate::core::cache::SlidingExpirationCacheWithCleanupTask;
use crate::core::dialect::dialect_for_code;
use crate::core::driver::{ConnectSpec, DriverConnection, DriverFactory, QueryResult};
use crate::core::errors::WrapperError;
use crate::core::host::HostInfo;
use crate::core::rds_url::{self, RdsUrlType};
use crate::core::selectors::PoolStatus;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_POOL_TTL: Duration = Duration::from_secs(30 * 60);
const POOL_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_MAX_POOL_SIZE: usize = 10;

/// Identity of one internal pool. The user-derived key exists so that two
/// security principals never share a pooled physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub url: String,
    pub user_key: String,
}

/// Maps a host/configuration pair to the user-derived part of the pool key.
/// Defaults to the configured user.
pub type PoolKeyFunc = Arc<dyn Fn(&HostInfo, &WrapperSettings) -> String + Send + Sync>;

/// A fixed-capacity pool of physical connections to one instance.
pub struct InternalPool {
    url: String,
    factory: Arc<dyn DriverFactory>,
    idle: Mutex<Vec<Arc<dyn DriverConnection>>>,
    total: AtomicUsize,
    max_size: usize,
}

impl InternalPool {
    fn new(url: String, factory: Arc<dyn DriverFactory>, max_size: usize) -> Self {
        Self {
            url,
            factory,
            idle: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            max_size,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Borrows an idle connection if one exists; otherwise dials a new one
    /// with the supplied spec. An idle connection is reused as-is, without
    /// re-checking credentials.
    async fn acquire(
        self: &Arc<Self>,
        spec: &ConnectSpec,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                Some(conn) if conn.is_closed() => {
                    self.total.fetch_sub(1, Ordering::AcqRel);
                    continue;
                }
                Some(conn) => {
                    debug!("Reusing idle pooled connection to {}.", self.url);
                    return Ok(self.wrap(conn));
                }
                None => break,
            }
        }
        if self.total.load(Ordering::Acquire) >= self.max_size {
            return Err(WrapperError::UnavailableHost(format!(
                "internal pool for {} is exhausted",
                self.url
            )));
        }
        self.total.fetch_add(1, Ordering::AcqRel);
        match self.factory.connect(spec).await {
            Ok(conn) => Ok(self.wrap(conn)),
            Err(e) => {
                self.total.fetch_sub(1, Ordering::AcqRel);
                Err(e)
            }
        }
    }

    fn wrap(self: &Arc<Self>, inner: Arc<dyn DriverConnection>) -> Arc<dyn DriverConnection> {
        Arc::new(PooledDriverConnection {
            inner,
            pool: Arc::downgrade(self),
            released: AtomicBool::new(false),
        })
    }

    fn release(&self, conn: Arc<dyn DriverConnection>) {
        if conn.is_closed() {
            self.total.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        self.idle.lock().push(conn);
    }

    /// Closes every idle connection. Borrowed connections are accounted for
    /// when they come back.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<dyn DriverConnection>> = self.idle.lock().drain(..).collect();
        for conn in drained {
            self.total.fetch_sub(1, Ordering::AcqRel);
            if let Err(e) = conn.close().await {
                debug!("Error closing pooled connection to {}: {}", self.url, e);
            }
        }
    }
}

/// A borrowed pool connection. `close()` releases it back to the pool
/// instead of tearing it down.
struct PooledDriverConnection {
    inner: Arc<dyn DriverConnection>,
    pool: std::sync::Weak<InternalPool>,
    released: AtomicBool,
}

impl PooledDriverConnection {
    fn check_open(&self) -> Result<(), WrapperError> {
        if self.released.load(Ordering::Acquire) {
            return Err(WrapperError::driver("connection is in closed state"));
        }
        Ok(())
    }
}

#[async_trait]
impl DriverConnection for PooledDriverConnection {
    async fn query(&self, sql: &str) -> Result<QueryResult, WrapperError> {
        self.check_open()?;
        self.inner.query(sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64, WrapperError> {
        self.check_open()?;
        self.inner.execute(sql).await
    }

    async fn ping(&self) -> Result<(), WrapperError> {
        self.check_open()?;
        self.inner.ping().await
    }

    fn abort(&self) {
        self.inner.abort();
    }

    async fn close(&self) -> Result<(), WrapperError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.pool.upgrade() {
            Some(pool) => {
                pool.release(Arc::clone(&self.inner));
                Ok(())
            }
            // The pool is gone; tear the physical connection down.
            None => self.inner.close().await,
        }
    }

    fn is_closed(&self) -> bool {
        self.released.load(Ordering::Acquire) || self.inner.is_closed()
    }

    fn connected_url(&self) -> String {
        self.inner.connected_url()
    }

    fn is_pooled(&self) -> bool {
        true
    }
}

/// The pooled provider: one `InternalPool` per `(instance URL, user key)`.
pub struct InternalPooledConnectionProvider {
    factory: Arc<dyn DriverFactory>,
    pools: SlidingExpirationCacheWithCleanupTask<PoolKey, Arc<InternalPool>>,
    pool_key_func: Option<PoolKeyFunc>,
    max_pool_size: usize,
    pool_ttl: Duration,
}

impl InternalPooledConnectionProvider {
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self::with_options(factory, None, DEFAULT_MAX_POOL_SIZE, DEFAULT_POOL_TTL)
    }

    pub fn with_options(
        factory: Arc<dyn DriverFactory>,
        pool_key_func: Option<PoolKeyFunc>,
        max_pool_size: usize,
        pool_ttl: Duration,
    ) -> Self {
        let pools = SlidingExpirationCacheWithCleanupTask::new(
            POOL_CLEANUP_INTERVAL,
            Some(Arc::new(|pool: &Arc<InternalPool>| {
                pool.idle_count() == pool.total_count()
            })),
            Some(Arc::new(|pool: Arc<InternalPool>| {
                tokio::spawn(async move { pool.close_all().await });
            })),
        );
        Self {
            factory,
            pools,
            pool_key_func,
            max_pool_size,
            pool_ttl,
        }
    }

    fn pool_key(&self, host: &HostInfo, settings: &WrapperSettings, url: &str) -> PoolKey {
        let user_key = match &self.pool_key_func {
            Some(func) => func(host, settings),
            None => settings.user.clone(),
        };
        PoolKey {
            url: url.to_string(),
            user_key,
        }
    }

    /// Rewrites a green blue/green name to its blue-side counterpart once the
    /// green DNS record has been retired.
    async fn effective_host(&self, host: &HostInfo, settings: &WrapperSettings) -> HostInfo {
        if !settings.enable_green_host_replacement || !rds_url::is_green_host(&host.host) {
            return host.clone();
        }
        let port = host.port.unwrap_or(0);
        if tokio::net::lookup_host((host.host.as_str(), port)).await.is_ok() {
            return host.clone();
        }
        let replacement = rds_url::remove_green_prefix(&host.host);
        warn!(
            "Green host {} no longer resolves; replacing with {}.",
            host.host, replacement
        );
        let mut rewritten = host.clone();
        rewritten.host = replacement;
        rewritten
    }

    /// Stops the cleanup task and closes every pool.
    pub async fn release_pools(&self) {
        self.pools.clear().await;
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[async_trait]
impl ConnectionProvider for InternalPooledConnectionProvider {
    fn accepts(&self, host: &HostInfo, _settings: &WrapperSettings) -> bool {
        rds_url::identify(&host.host) == RdsUrlType::RdsInstance
    }

    async fn connect(
        &self,
        host: &HostInfo,
        spec: &ConnectSpec,
        settings: &WrapperSettings,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let host = self.effective_host(host, settings).await;
        let dialect = dialect_for_code(settings.dialect);
        let mut spec = dialect.prepare_pool_spec(spec);
        spec.host = host.host.clone();
        let key = self.pool_key(&host, settings, &spec.url());
        let pool = self.pools.compute_if_absent(
            key,
            || {
                Arc::new(InternalPool::new(
                    spec.url(),
                    Arc::clone(&self.factory),
                    self.max_pool_size,
                ))
            },
            self.pool_ttl,
        );
        pool.acquire(&spec).await
    }
}

impl PoolStatus for InternalPooledConnectionProvider {
    fn in_use_count(&self, url: &str) -> usize {
        self.pools
            .values()
            .into_iter()
            .filter(|pool| pool.url() == url)
            .map(|pool| pool.total_count().saturating_sub(pool.idle_count()))
            .sum()
    }
}
