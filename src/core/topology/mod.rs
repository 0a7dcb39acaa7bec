// src/core/topology/mod.rs

//! The topology service: a cluster-scoped, shared, background-refreshed model
//! of the cluster's hosts, which one is the writer, and the readers' state.

mod monitor;
mod provider;

pub use monitor::ClusterTopologyMonitor;
pub use provider::RdsHostListProvider;

use crate::core::host::HostInfo;
use std::sync::Arc;

/// An immutable, atomically published topology snapshot; writer first.
pub type TopologySnapshot = Arc<Vec<HostInfo>>;

/// The writer of a snapshot, if one is present.
pub fn writer_of(hosts: &[HostInfo]) -> Option<&HostInfo> {
    hosts.iter().find(|h| h.is_writer())
}
