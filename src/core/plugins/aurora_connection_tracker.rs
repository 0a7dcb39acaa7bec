// src/core/plugins/aurora_connection_tracker.rs

//! Tracks every opened physical connection by host, together with the role
//! the host had when the connection was dialed. Connections are aborted when
//! their instance vanishes from the topology, or when a host connected to as
//! the writer comes back as a reader after a failover.

use super::{ConnectContext, ConnectionPlugin, NextConnect, methods};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::host::{HostInfo, HostRole};
use crate::core::rds_url::{self, RdsUrlType};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

pub const AURORA_CONNECTION_TRACKER_PLUGIN_NAME: &str = "auroraConnectionTracker";

const SUBSCRIBED: &[&str] = &[
    methods::CONNECT,
    methods::FORCE_CONNECT,
    methods::NOTIFY_HOST_LIST_CHANGED,
];

/// Open connections to one endpoint, held weakly: a dropped logical
/// connection must not pin its physical connections here.
struct TrackedHost {
    /// The role the host had when these connections were dialed.
    role: HostRole,
    connections: Vec<Weak<dyn DriverConnection>>,
}

#[derive(Default)]
pub struct AuroraConnectionTrackerPlugin {
    tracked: DashMap<String, TrackedHost>,
}

impl AuroraConnectionTrackerPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, host: &HostInfo, client: &Arc<dyn DriverConnection>) {
        let mut entry = self.tracked.entry(host.url()).or_insert_with(|| TrackedHost {
            role: host.role,
            connections: Vec::new(),
        });
        entry.role = host.role;
        entry
            .connections
            .retain(|weak| weak.upgrade().map(|c| !c.is_closed()).unwrap_or(false));
        entry.connections.push(Arc::downgrade(client));
    }

    fn abort_all_for(&self, url: &str) {
        if let Some((_, tracked)) = self.tracked.remove(url) {
            let mut aborted = 0usize;
            for weak in tracked.connections {
                if let Some(client) = weak.upgrade() {
                    if !client.is_closed() {
                        client.abort();
                        aborted += 1;
                    }
                }
            }
            if aborted > 0 {
                debug!("Aborted {} tracked connection(s) to {}.", aborted, url);
            }
        }
    }

    /// True for endpoints that appear in topology host lists at all. Cluster
    /// and custom DNS names never do; their connections must not be cut just
    /// because the list does not mention them.
    fn addressed_by_topology(url: &str) -> bool {
        let host = url.rsplit_once(':').map(|(h, _)| h).unwrap_or(url);
        matches!(
            rds_url::identify(host),
            RdsUrlType::RdsInstance | RdsUrlType::OtherRds | RdsUrlType::NotRds
        )
    }
}

#[async_trait]
impl ConnectionPlugin for AuroraConnectionTrackerPlugin {
    fn name(&self) -> &'static str {
        AURORA_CONNECTION_TRACKER_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        SUBSCRIBED
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let host = ctx.host.clone();
        let client = next.call(ctx).await?;
        self.track(&host, &client);
        Ok(client)
    }

    async fn force_connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let host = ctx.host.clone();
        let client = next.call(ctx).await?;
        self.track(&host, &client);
        Ok(client)
    }

    async fn notify_host_list_changed(&self, hosts: &[HostInfo]) {
        if hosts.is_empty() {
            return;
        }
        let keys: Vec<String> = self.tracked.iter().map(|e| e.key().clone()).collect();
        for url in keys {
            let tracked_role = match self.tracked.get(&url) {
                Some(entry) => entry.role,
                None => continue,
            };
            match hosts.iter().find(|h| h.url() == url) {
                Some(host) => {
                    if tracked_role == HostRole::Writer && host.role == HostRole::Reader {
                        debug!(
                            "Host {} was demoted from writer to reader; cutting its connections.",
                            url
                        );
                        self.abort_all_for(&url);
                    } else if let Some(mut entry) = self.tracked.get_mut(&url) {
                        entry.role = host.role;
                    }
                }
                None => {
                    if Self::addressed_by_topology(&url) {
                        self.abort_all_for(&url);
                    }
                }
            }
        }
    }
}
