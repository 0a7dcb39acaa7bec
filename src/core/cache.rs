// src/core/cache.rs

//! Sliding-expiration caches shared by every cluster-scoped registry
//! (topology monitors, host monitors, pools, custom-endpoint monitors).
//!
//! Two variants share a contract: the plain cache does opportunistic cleanup
//! on mutating calls; the task-backed variant runs a single cooperative
//! cleanup loop, started lazily on first insert and stopped by `clear()`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Predicate gating removal of an expired entry. An expired entry that
/// reports `false` is retained with its deadline unchanged, so it is
/// reconsidered on the next cycle.
pub type ShouldDisposeFunc<V> = Arc<dyn Fn(&V) -> bool + Send + Sync>;
/// Resource-release callback. Failures inside it must be handled by the
/// callback itself; the cache logs nothing more than a debug line per call.
pub type DisposalFunc<V> = Arc<dyn Fn(V) + Send + Sync>;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    inserted_seq: u64,
}

/// A keyed map whose entries expire `ttl` after their last access.
pub struct SlidingExpirationCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    entries: DashMap<K, CacheEntry<V>>,
    should_dispose: Option<ShouldDisposeFunc<V>>,
    dispose: Option<DisposalFunc<V>>,
    cleanup_interval: Duration,
    next_cleanup: Mutex<Instant>,
    seq: AtomicU64,
}

impl<K, V> SlidingExpirationCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(cleanup_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            should_dispose: None,
            dispose: None,
            cleanup_interval,
            next_cleanup: Mutex::new(Instant::now() + cleanup_interval),
            seq: AtomicU64::new(0),
        }
    }

    pub fn with_callbacks(
        cleanup_interval: Duration,
        should_dispose: Option<ShouldDisposeFunc<V>>,
        dispose: Option<DisposalFunc<V>>,
    ) -> Self {
        Self {
            should_dispose,
            dispose,
            ..Self::new(cleanup_interval)
        }
    }

    /// Returns the value for `key`, creating it with `factory` if absent or
    /// expired. The factory runs at most once per missing key across
    /// concurrent callers (the entry lock is held for the duration). The
    /// returned entry's deadline is refreshed to `now + ttl` on hit and miss
    /// alike.
    pub fn compute_if_absent(&self, key: K, factory: impl FnOnce() -> V, ttl: Duration) -> V {
        self.cleanup_if_due();
        let now = Instant::now();
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expires_at <= now {
                    let old = occupied.insert(CacheEntry {
                        value: factory(),
                        expires_at: now + ttl,
                        inserted_seq: self.seq.fetch_add(1, Ordering::Relaxed),
                    });
                    self.dispose_value(old.value);
                } else {
                    occupied.get_mut().expires_at = now + ttl;
                }
                occupied.get().value.clone()
            }
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(CacheEntry {
                    value: factory(),
                    expires_at: now + ttl,
                    inserted_seq: self.seq.fetch_add(1, Ordering::Relaxed),
                });
                entry.value.clone()
            }
        }
    }

    /// A hit iff the entry exists and has not expired. Refreshes the deadline
    /// when `ttl` is supplied.
    pub fn get(&self, key: &K, ttl: Option<Duration>) -> Option<V> {
        let now = Instant::now();
        let mut entry = self.entries.get_mut(key)?;
        if entry.expires_at <= now {
            return None;
        }
        if let Some(ttl) = ttl {
            entry.expires_at = now + ttl;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.cleanup_if_due();
        let old = self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                inserted_seq: self.seq.fetch_add(1, Ordering::Relaxed),
            },
        );
        if let Some(old) = old {
            self.dispose_value(old.value);
        }
    }

    /// Removes and disposes the entry for `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, entry) = self.entries.remove(key)?;
        let value = entry.value.clone();
        self.dispose_value(entry.value);
        Some(value)
    }

    /// Disposes every entry, oldest insertion first, and leaves the map empty.
    pub fn clear(&self) {
        let mut drained: Vec<(u64, V)> = Vec::with_capacity(self.entries.len());
        let keys: Vec<K> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                drained.push((entry.inserted_seq, entry.value));
            }
        }
        drained.sort_by_key(|(seq, _)| *seq);
        for (_, value) in drained {
            self.dispose_value(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// A point-in-time copy of all live values.
    pub fn values(&self) -> Vec<V> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
            .collect()
    }

    fn dispose_value(&self, value: V) {
        if let Some(dispose) = &self.dispose {
            debug!("Disposing evicted cache entry.");
            dispose(value);
        }
    }

    /// Amortized cleanup: runs a full sweep at most once per interval.
    fn cleanup_if_due(&self) {
        {
            let mut next = self.next_cleanup.lock();
            if *next > Instant::now() {
                return;
            }
            *next = Instant::now() + self.cleanup_interval;
        }
        self.remove_expired();
    }

    /// Removes every expired entry whose `should_dispose` allows it. Runs
    /// amortized from mutating calls and from the background task variant.
    pub fn remove_expired(&self) {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|e| {
                e.expires_at <= now
                    && self
                        .should_dispose
                        .as_ref()
                        .map(|f| f(&e.value))
                        .unwrap_or(true)
            })
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            // Re-check under the entry lock; the entry may have been
            // refreshed between the scan and now.
            if let Entry::Occupied(occupied) = self.entries.entry(key) {
                if occupied.get().expires_at <= Instant::now() {
                    let (_, entry) = occupied.remove_entry();
                    self.dispose_value(entry.value);
                }
            }
        }
    }
}

/// The task-backed variant: one cooperative cleanup loop per cache instance.
pub struct SlidingExpirationCacheWithCleanupTask<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<SlidingExpirationCache<K, V>>,
    cleanup_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> SlidingExpirationCacheWithCleanupTask<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        cleanup_interval: Duration,
        should_dispose: Option<ShouldDisposeFunc<V>>,
        dispose: Option<DisposalFunc<V>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(SlidingExpirationCache::with_callbacks(
                cleanup_interval,
                should_dispose,
                dispose,
            )),
            cleanup_interval,
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn compute_if_absent(&self, key: K, factory: impl FnOnce() -> V, ttl: Duration) -> V {
        let value = self.inner.compute_if_absent(key, factory, ttl);
        self.ensure_cleanup_task();
        value
    }

    pub fn get(&self, key: &K, ttl: Option<Duration>) -> Option<V> {
        self.inner.get(key, ttl)
    }

    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.inner.put(key, value, ttl);
        self.ensure_cleanup_task();
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.keys()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.values()
    }

    /// Stops the cleanup task, awaits its exit, then disposes every remaining
    /// entry in insertion order.
    pub async fn clear(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown_tx.send(());
            if let Err(e) = handle.await {
                warn!("Cache cleanup task did not exit cleanly: {}", e);
            }
        }
        self.inner.clear();
    }

    /// Spawns the cleanup loop the first time an entry is inserted.
    fn ensure_cleanup_task(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let interval = self.cleanup_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // The first tick fires immediately; skip it.
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.remove_expired();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache cleanup task shutting down.");
                        return;
                    }
                }
            }
        }));
    }
}
