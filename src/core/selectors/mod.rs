// src/core/selectors/mod.rs

//! Host selection strategies used by the read/write splitter and by reader
//! failover: random, weighted round-robin, highest weight, least connections.

mod highest_weight;
mod least_connections;
mod random;
mod round_robin;

use crate::config::WrapperSettings;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use std::collections::HashMap;
use std::sync::Arc;

pub use highest_weight::HighestWeightHostSelector;
pub use least_connections::{LeastConnectionsHostSelector, PoolStatus};
pub use random::RandomHostSelector;
pub use round_robin::RoundRobinHostSelector;

pub const STRATEGY_RANDOM: &str = "random";
pub const STRATEGY_ROUND_ROBIN: &str = "roundRobin";
pub const STRATEGY_LEAST_CONNECTIONS: &str = "leastConnections";
pub const STRATEGY_HIGHEST_WEIGHT: &str = "highestWeight";

/// Picks one host out of a topology snapshot.
pub trait HostSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(
        &self,
        hosts: &[HostInfo],
        role: HostRole,
        settings: &WrapperSettings,
    ) -> Result<HostInfo, WrapperError>;
}

/// The hosts matching `role` that are currently available.
pub(crate) fn eligible_hosts(hosts: &[HostInfo], role: HostRole) -> Vec<HostInfo> {
    hosts
        .iter()
        .filter(|h| h.role == role && h.is_available())
        .cloned()
        .collect()
}

pub(crate) fn no_hosts_error(role: HostRole) -> WrapperError {
    WrapperError::UnavailableHost(format!("no hosts matching role {role}"))
}

/// Strategy lookup by configured name. Round-robin state and pool counters
/// are shared through the registry, so one registry exists per runtime.
pub struct SelectorRegistry {
    selectors: HashMap<&'static str, Arc<dyn HostSelector>>,
}

impl SelectorRegistry {
    pub fn new(pool_status: Option<Arc<dyn PoolStatus>>) -> Self {
        let mut selectors: HashMap<&'static str, Arc<dyn HostSelector>> = HashMap::new();
        selectors.insert(STRATEGY_RANDOM, Arc::new(RandomHostSelector));
        selectors.insert(STRATEGY_ROUND_ROBIN, Arc::new(RoundRobinHostSelector::new()));
        selectors.insert(STRATEGY_HIGHEST_WEIGHT, Arc::new(HighestWeightHostSelector));
        if let Some(pool_status) = pool_status {
            selectors.insert(
                STRATEGY_LEAST_CONNECTIONS,
                Arc::new(LeastConnectionsHostSelector::new(pool_status)),
            );
        }
        Self { selectors }
    }

    pub fn for_strategy(&self, name: &str) -> Result<Arc<dyn HostSelector>, WrapperError> {
        self.selectors
            .get(name)
            .cloned()
            .ok_or_else(|| WrapperError::UnsupportedStrategy(name.to_string()))
    }
}
