// src/core/selectors/highest_weight.rs

use super::{HostSelector, STRATEGY_HIGHEST_WEIGHT, eligible_hosts, no_hosts_error};
use crate::config::WrapperSettings;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};

/// Stable sort by weight descending; pick the first.
#[derive(Debug, Default)]
pub struct HighestWeightHostSelector;

impl HostSelector for HighestWeightHostSelector {
    fn name(&self) -> &'static str {
        STRATEGY_HIGHEST_WEIGHT
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
        eligible.sort_by(|a, b| b.weight.cmp(&a.weight));
        Ok(eligible.remove(0))
    }
}
