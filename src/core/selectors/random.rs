// src/core/selectors/random.rs

use super::{HostSelector, STRATEGY_RANDOM, eligible_hosts, no_hosts_error};
use crate::config::WrapperSettings;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use rand::Rng;

/// Uniform random pick over the eligible hosts.
#[derive(Debug, Default)]
pub struct RandomHostSelector;

impl HostSelector for RandomHostSelector {
    fn name(&self) -> &'static str {
        STRATEGY_RANDOM
    }

    fn select(
        &self,
        hosts: &[HostInfo],
        role: HostRole,
        _settings: &WrapperSettings,
    ) -> Result<HostInfo, WrapperError> {
        let eligible = eligible_hosts(hosts, role);
        if eligible.is_empty() {
            return Err(no_hosts_error(role));
        }
        let index = rand::thread_rng().gen_range(0..eligible.len());
        Ok(eligible[index].clone())
    }
}
