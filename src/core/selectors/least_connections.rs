// src/core/selectors/least_connections.rs

use super::{HostSelector, STRATEGY_LEAST_CONNECTIONS, eligible_hosts, no_hosts_error};
use crate::config::WrapperSettings;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use std::sync::Arc;

/// Read-only view of pool occupancy, implemented by the internal pool
/// provider. `in_use_count` sums `total - idle` across pool entries whose
/// instance URL matches.
pub trait PoolStatus: Send + Sync {
    fn in_use_count(&self, url: &str) -> usize;
}

/// Stable sort ascending by in-use connection count; pick the first.
pub struct LeastConnectionsHostSelector {
    pool_status: Arc<dyn PoolStatus>,
}

impl LeastConnectionsHostSelector {
    pub fn new(pool_status: Arc<dyn PoolStatus>) -> Self {
        Self { pool_status }
    }
}

impl HostSelector for LeastConnectionsHostSelector {
    fn name(&self) -> &'static str {
        STRATEGY_LEAST_CONNECTIONS
    }

    fn select(
        &self,
        hosts: &[HostInfo],
        role: HostRole,
        _settings: &WrapperSettings,
    ) -> Result<HostInfo, WrapperError> {
        let mut eligible = eligible_hosts(hosts, role);
        if eligible.is_empty() {
            return Err(no_hosts_error(role));
        }
        eligible.sort_by_key(|h| self.pool_status.in_use_count(&h.url()));
        Ok(eligible.remove(0))
    }
}
