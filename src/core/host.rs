// src/core/host.rs

//! The host model: `HostInfo` value objects produced by topology refreshes,
//! plus the availability bookkeeping shared by the health monitor, the
//! failover coordinator, and the host selectors.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// The role a host plays within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HostRole {
    Writer,
    Reader,
    /// Only seen before the first topology refresh completes for the host.
    Unknown,
}

/// The last observed availability of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostAvailability {
    Available,
    NotAvailable,
}

/// Default weight for hosts whose topology row carries none.
pub const DEFAULT_WEIGHT: u64 = 100;

/// A single database instance as seen by the topology service.
///
/// Equality and hashing are by endpoint (`host`, `port`) only; everything else
/// is descriptive state that changes between topology refreshes.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub host: String,
    pub port: Option<u16>,
    pub role: HostRole,
    pub availability: HostAvailability,
    pub weight: u64,
    /// The instance identifier, when known (e.g. the Aurora server id).
    pub host_id: Option<String>,
    /// Alternative names for this host, including resolved IP addresses.
    pub aliases: HashSet<String>,
    pub last_update: Option<DateTime<Utc>>,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: Option<u16>, role: HostRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            availability: HostAvailability::Available,
            weight: DEFAULT_WEIGHT,
            host_id: None,
            aliases: HashSet::new(),
            last_update: None,
        }
    }

    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_availability(mut self, availability: HostAvailability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_last_update(mut self, at: DateTime<Utc>) -> Self {
        self.last_update = Some(at);
        self
    }

    /// The canonical `host:port` endpoint string, used as a cache key
    /// throughout the wrapper.
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// The instance identifier, falling back to the bare hostname.
    pub fn host_id_or_host(&self) -> &str {
        self.host_id.as_deref().unwrap_or(&self.host)
    }

    pub fn add_alias(&mut self, alias: impl Into<String>) {
        self.aliases.insert(alias.into());
    }

    /// True if `name` matches this host's endpoint, id, or any alias.
    pub fn matches(&self, name: &str) -> bool {
        self.host == name
            || self.url() == name
            || self.host_id.as_deref() == Some(name)
            || self.aliases.contains(name)
    }

    pub fn is_writer(&self) -> bool {
        self.role == HostRole::Writer
    }

    pub fn is_available(&self) -> bool {
        self.availability == HostAvailability::Available
    }
}

impl PartialEq for HostInfo {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for HostInfo {}

impl Hash for HostInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {:?}]", self.url(), self.role, self.availability)
    }
}

/// Per-host retry bookkeeping with exponential backoff.
///
/// After `max_retries` consecutive failures the host is reported unavailable
/// until a cooldown (doubled on every further failure, capped) has elapsed.
#[derive(Debug)]
struct BackoffState {
    failures: u32,
    last_failure: Instant,
}

/// Shared, process-wide availability overlay. Written by the health monitor
/// and the failover coordinator; consulted by selectors and the plugin
/// service when presenting topology to callers.
#[derive(Debug)]
pub struct HostAvailabilityRegistry {
    states: DashMap<String, HostAvailability>,
    backoff: DashMap<String, BackoffState>,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for HostAvailabilityRegistry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30), Duration::from_secs(300))
    }
}

impl HostAvailabilityRegistry {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            states: DashMap::new(),
            backoff: DashMap::new(),
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    /// Records an explicit availability observation for `url`.
    pub fn set_availability(&self, url: &str, availability: HostAvailability) {
        debug!("Host {} marked {:?}.", url, availability);
        self.states.insert(url.to_string(), availability);
        if availability == HostAvailability::Available {
            self.backoff.remove(url);
        }
    }

    /// The overlaid availability for `url`; hosts never observed are available.
    pub fn availability_of(&self, url: &str) -> HostAvailability {
        if let Some(state) = self.states.get(url) {
            if *state == HostAvailability::NotAvailable && !self.cooldown_elapsed(url) {
                return HostAvailability::NotAvailable;
            }
        }
        HostAvailability::Available
    }

    /// Records a failed attempt against `url` and flips it to unavailable
    /// once the retry budget is exhausted.
    pub fn record_failure(&self, url: &str) {
        let mut entry = self.backoff.entry(url.to_string()).or_insert(BackoffState {
            failures: 0,
            last_failure: Instant::now(),
        });
        entry.failures += 1;
        entry.last_failure = Instant::now();
        if entry.failures >= self.max_retries {
            drop(entry);
            self.states
                .insert(url.to_string(), HostAvailability::NotAvailable);
        }
    }

    /// Clears failure bookkeeping after a successful use of `url`.
    pub fn record_success(&self, url: &str) {
        self.backoff.remove(url);
        self.states
            .insert(url.to_string(), HostAvailability::Available);
    }

    fn cooldown_elapsed(&self, url: &str) -> bool {
        match self.backoff.get(url) {
            Some(state) => {
                let exponent = state.failures.saturating_sub(self.max_retries).min(16);
                let cooldown = self
                    .initial_backoff
                    .saturating_mul(1u32 << exponent)
                    .min(self.max_backoff);
                state.last_failure.elapsed() >= cooldown
            }
            // Explicitly marked down without backoff bookkeeping: stays down
            // until a success or explicit mark clears it.
            None => false,
        }
    }

    /// Applies the overlay to a topology snapshot.
    pub fn overlay(&self, hosts: &[HostInfo]) -> Vec<HostInfo> {
        hosts
            .iter()
            .map(|h| {
                let mut h = h.clone();
                if self.availability_of(&h.url()) == HostAvailability::NotAvailable {
                    h.availability = HostAvailability::NotAvailable;
                }
                h
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_endpoint() {
        let a = HostInfo::new("db-1.cluster.local", Some(5432), HostRole::Writer);
        let mut b = HostInfo::new("db-1.cluster.local", Some(5432), HostRole::Reader);
        b.weight = 7;
        assert_eq!(a, b);
        let c = HostInfo::new("db-1.cluster.local", Some(5433), HostRole::Writer);
        assert_ne!(a, c);
    }

    #[test]
    fn registry_flips_after_retry_budget() {
        let registry = HostAvailabilityRegistry::new(2, Duration::from_secs(60), Duration::from_secs(60));
        registry.record_failure("h:1");
        assert_eq!(registry.availability_of("h:1"), HostAvailability::Available);
        registry.record_failure("h:1");
        assert_eq!(
            registry.availability_of("h:1"),
            HostAvailability::NotAvailable
        );
        registry.record_success("h:1");
        assert_eq!(registry.availability_of("h:1"), HostAvailability::Available);
    }
}
