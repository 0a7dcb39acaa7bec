// src/core/selectors/round_robin.rs

//! Weighted round-robin selection with cluster-scoped shared state, so every
//! logical connection against the same cluster advances the same cursor.

use super::{HostSelector, STRATEGY_ROUND_ROBIN, eligible_hosts, no_hosts_error};
use crate::config::WrapperSettings;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Cursor state for one cluster.
#[derive(Debug, Default)]
struct ClusterCursor {
    /// The host id the cursor currently rests on.
    current: Option<String>,
    /// Picks left before the cursor advances.
    remaining_slots: u64,
}

/// Weighted round-robin. State is keyed by the sorted eligible host-id set,
/// which is stable for a cluster across refreshes and shared across logical
/// connections.
pub struct RoundRobinHostSelector {
    clusters: DashMap<String, Arc<Mutex<ClusterCursor>>>,
}

impl Default for RoundRobinHostSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinHostSelector {
    pub fn new() -> Self {
        Self {
            clusters: DashMap::new(),
        }
    }

    /// Parses `host:weight,host:weight` pairs. Invalid entries are typed
    /// configuration errors, not silently defaulted.
    fn parse_weights(pairs: &str) -> Result<HashMap<String, u64>, WrapperError> {
        let mut weights = HashMap::new();
        for pair in pairs.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (host, weight) = pair.split_once(':').ok_or_else(|| {
                WrapperError::IllegalArgument(format!(
                    "round-robin weight pair '{pair}' is not in host:weight form"
                ))
            })?;
            let weight: u64 = weight.trim().parse().map_err(|_| {
                WrapperError::IllegalArgument(format!(
                    "round-robin weight '{}' for host '{}' is not an integer",
                    weight.trim(),
                    host.trim()
                ))
            })?;
            if weight < 1 {
                return Err(WrapperError::IllegalArgument(format!(
                    "round-robin weight for host '{}' must be >= 1",
                    host.trim()
                )));
            }
            weights.insert(host.trim().to_string(), weight);
        }
        Ok(weights)
    }

    fn weight_of(
        host_id: &str,
        weights: &HashMap<String, u64>,
        default_weight: u64,
    ) -> u64 {
        weights.get(host_id).copied().unwrap_or(default_weight)
    }
}

impl HostSelector for RoundRobinHostSelector {
    fn name(&self) -> &'static str {
        STRATEGY_ROUND_ROBIN
    }

    fn select(
        &self,
        hosts: &[HostInfo],
        role: HostRole,
        settings: &WrapperSettings,
    ) -> Result<HostInfo, WrapperError> {
        let eligible = eligible_hosts(hosts, role);
        if eligible.is_empty() {
            return Err(no_hosts_error(role));
        }
        if settings.round_robin_default_weight < 1 {
            return Err(WrapperError::IllegalArgument(
                "round-robin default weight must be >= 1".to_string(),
            ));
        }
        let weights = Self::parse_weights(&settings.round_robin_host_weight_pairs)?;

        // Stable iteration order by instance id.
        let mut ordered: Vec<&HostInfo> = eligible.iter().collect();
        ordered.sort_by(|a, b| a.host_id_or_host().cmp(b.host_id_or_host()));
        let ids: Vec<&str> = ordered.iter().map(|h| h.host_id_or_host()).collect();

        let cluster_key = ids.join(",");
        let cursor = self
            .clusters
            .entry(cluster_key)
            .or_insert_with(|| Arc::new(Mutex::new(ClusterCursor::default())))
            .clone();
        let mut cursor = cursor.lock();

        let current_valid = cursor
            .current
            .as_deref()
            .map(|id| ids.contains(&id))
            .unwrap_or(false);

        if !current_valid || cursor.remaining_slots == 0 {
            let next_index = match cursor.current.as_deref() {
                Some(id) if current_valid => {
                    let pos = ids.iter().position(|i| *i == id).unwrap_or(0);
                    (pos + 1) % ids.len()
                }
                _ => 0,
            };
            cursor.current = Some(ids[next_index].to_string());
            cursor.remaining_slots = Self::weight_of(
                ids[next_index],
                &weights,
                settings.round_robin_default_weight,
            );
        }

        cursor.remaining_slots -= 1;
        let selected_id = cursor.current.clone().expect("cursor is set");
        drop(cursor);

        ordered
            .into_iter()
            .find(|h| h.host_id_or_host() == selected_id)
            .cloned()
            .ok_or_else(|| no_hosts_error(role))
    }
}
