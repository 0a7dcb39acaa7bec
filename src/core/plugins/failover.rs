// src/core/plugins/failover.rs

//! The failover coordinator. On a network error against the current target it
//! drives reconnection to a new writer (or any reader, depending on mode) and
//! surfaces a typed outcome to the caller.

use super::service::PluginService;
use super::{
    ConnectionPlugin, ExecuteContext, ExecuteOutcome, NETWORK_BOUND_METHODS, NextExecute, methods,
};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::host::{HostAvailability, HostInfo, HostRole};
use crate::core::rds_url::{self, RdsUrlType};
use crate::core::telemetry::TelemetryCounter;
use crate::core::topology::writer_of;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use strum_macros::{Display, EnumString};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const FAILOVER_PLUGIN_NAME: &str = "failover";

/// Whether failover may land on a writer, a reader, or either.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum FailoverMode {
    StrictWriter,
    StrictReader,
    ReaderOrWriter,
}

impl FailoverMode {
    /// The default is resolved from the initial endpoint's shape: writer
    /// endpoints and instances fail over strictly to the writer, reader
    /// endpoints to whatever is reachable.
    pub fn default_for(url_type: RdsUrlType) -> Self {
        match url_type {
            RdsUrlType::RdsReaderCluster => FailoverMode::ReaderOrWriter,
            _ => FailoverMode::StrictWriter,
        }
    }
}

const SUBSCRIBED: &[&str] = &[
    methods::QUERY,
    methods::EXECUTE,
    methods::PING,
    methods::IS_VALID,
    methods::ROLLBACK,
    methods::END,
    methods::SET_READ_ONLY,
    methods::SET_AUTO_COMMIT,
    methods::SET_CATALOG,
    methods::SET_SCHEMA,
    methods::SET_TRANSACTION_ISOLATION,
    methods::INIT_HOST_PROVIDER,
];

/// Budget for the per-round topology refresh inside reader failover.
const READER_TOPOLOGY_REFRESH_BUDGET: Duration = Duration::from_secs(5);
/// Pause between reader rounds so a flapping cluster is not hammered.
const READER_ROUND_DELAY: Duration = Duration::from_secs(1);
/// How long each wait-for-new-writer poll blocks before re-checking the
/// deadline.
const WRITER_POLL_CHUNK: Duration = Duration::from_secs(30);

pub struct FailoverPlugin {
    service: Arc<PluginService>,
    mode: Mutex<Option<FailoverMode>>,
    failover_counter: Arc<dyn TelemetryCounter>,
    success_counter: Arc<dyn TelemetryCounter>,
    failure_counter: Arc<dyn TelemetryCounter>,
}

impl FailoverPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        let telemetry = service.runtime().telemetry();
        let failover_counter = telemetry.create_counter("failover.triggered");
        let success_counter = telemetry.create_counter("failover.completed");
        let failure_counter = telemetry.create_counter("failover.failed");
        Self {
            service,
            mode: Mutex::new(None),
            failover_counter,
            success_counter,
            failure_counter,
        }
    }

    /// The effective mode: configured, or resolved from the initial URL.
    pub fn mode(&self) -> FailoverMode {
        if let Some(mode) = *self.mode.lock() {
            return mode;
        }
        let resolved = self
            .service
            .settings()
            .failover_mode
            .unwrap_or_else(|| {
                FailoverMode::default_for(rds_url::identify(&self.service.settings().host))
            });
        *self.mode.lock() = Some(resolved);
        resolved
    }

    fn should_attempt_failover(&self, error: &WrapperError) -> bool {
        !error.is_failover_error() && self.service.is_network_error(error)
    }

    /// Runs failover and translates the outcome into the typed error the
    /// caller observes.
    async fn failover_and_raise(&self) -> WrapperError {
        self.failover_counter.inc();
        if let Some(host) = self.service.current_host() {
            self.service
                .mark_host_availability(&host.url(), HostAvailability::NotAvailable);
        }
        if let Ok(provider) = self.service.host_list_provider() {
            provider.monitor().set_writer_unavailable(true);
        }
        let was_in_transaction = self.service.is_in_transaction();

        let result = match self.mode() {
            FailoverMode::StrictWriter => self.failover_writer().await,
            mode => self.failover_reader(mode).await,
        };

        match result {
            Ok(new_host) => {
                self.success_counter.inc();
                info!("Failover completed; now connected to {}.", new_host.url());
                if was_in_transaction {
                    self.service.set_in_transaction(false);
                    WrapperError::TransactionResolutionUnknown
                } else {
                    WrapperError::FailoverSuccess
                }
            }
            Err(e) => {
                self.failure_counter.inc();
                warn!("Failover did not produce a connection: {}", e);
                match e {
                    WrapperError::FailoverFailed(_) => e,
                    other => WrapperError::FailoverFailed(other.to_string()),
                }
            }
        }
    }

    async fn failover_writer(&self) -> Result<HostInfo, WrapperError> {
        let deadline = Instant::now() + self.service.settings().failover_timeout;
        let handler = WriterFailoverHandler {
            service: Arc::clone(&self.service),
        };
        let (client, host) = handler.failover(deadline).await?;
        self.install(client, host.clone()).await?;
        Ok(host)
    }

    async fn failover_reader(&self, mode: FailoverMode) -> Result<HostInfo, WrapperError> {
        let deadline = Instant::now() + self.service.settings().failover_timeout;
        let handler = ReaderFailoverHandler {
            service: Arc::clone(&self.service),
        };
        let (client, host) = handler.failover(mode, deadline).await?;
        self.install(client, host.clone()).await?;
        Ok(host)
    }

    async fn install(
        &self,
        client: Arc<dyn DriverConnection>,
        host: HostInfo,
    ) -> Result<(), WrapperError> {
        self.service
            .mark_host_availability(&host.url(), HostAvailability::Available);
        self.service.set_current_client(client, host).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConnectionPlugin for FailoverPlugin {
    fn name(&self) -> &'static str {
        FAILOVER_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        SUBSCRIBED
    }

    async fn init_host_provider(&self) -> Result<(), WrapperError> {
        // Resolve the mode eagerly so a later misconfiguration cannot change
        // behavior between calls.
        let mode = self.mode();
        debug!("Failover mode resolved to {}.", mode);
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ExecuteContext,
        next: NextExecute<'_>,
    ) -> Result<ExecuteOutcome, WrapperError> {
        debug_assert!(NETWORK_BOUND_METHODS.contains(&ctx.method));
        match next.call().await {
            Ok(outcome) => Ok(outcome),
            Err(error) if self.should_attempt_failover(&error) => {
                warn!(
                    "Network error during '{}' ({}); starting failover.",
                    ctx.method, error
                );
                Err(self.failover_and_raise().await)
            }
            Err(error) => Err(error),
        }
    }
}

// --- reader failover ---

struct ReaderFailoverHandler {
    service: Arc<PluginService>,
}

impl ReaderFailoverHandler {
    /// Builds a candidate priority list (shuffled active readers, shuffled
    /// down readers, then the writer when the mode permits), races batches of
    /// two with a per-attempt timeout, and re-verifies the winner's role
    /// under `strict-reader`.
    async fn failover(
        &self,
        mode: FailoverMode,
        deadline: Instant,
    ) -> Result<(Arc<dyn DriverConnection>, HostInfo), WrapperError> {
        let per_attempt = self.service.settings().failover_reader_connect_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(WrapperError::FailoverFailed(
                    "timed out waiting for a reachable reader".to_string(),
                ));
            }
            let candidates = self.build_candidates(mode);
            if candidates.is_empty() {
                debug!("No failover candidates in topology yet; waiting for refresh.");
            }
            for batch in candidates.chunks(2) {
                if Instant::now() >= deadline {
                    break;
                }
                let Some((client, host)) = self.race_batch(batch, per_attempt).await else {
                    continue;
                };
                if mode == FailoverMode::StrictReader
                    && self.is_actually_writer(&client, &host).await
                {
                    debug!(
                        "Candidate {} turned out to be the writer; discarding (strict-reader).",
                        host.url()
                    );
                    let _ = client.close().await;
                    continue;
                }
                return Ok((client, host));
            }
            let refresh_budget =
                READER_TOPOLOGY_REFRESH_BUDGET.min(deadline.saturating_duration_since(Instant::now()));
            let _ = self
                .service
                .host_list_provider()?
                .force_monitoring_refresh(false, refresh_budget)
                .await;
            tokio::time::sleep(
                READER_ROUND_DELAY.min(deadline.saturating_duration_since(Instant::now())),
            )
            .await;
        }
    }

    fn build_candidates(&self, mode: FailoverMode) -> Vec<HostInfo> {
        let hosts = self.service.hosts();
        let mut rng = rand::thread_rng();
        let mut active: Vec<HostInfo> = hosts
            .iter()
            .filter(|h| h.role == HostRole::Reader && h.is_available())
            .cloned()
            .collect();
        let mut down: Vec<HostInfo> = hosts
            .iter()
            .filter(|h| h.role == HostRole::Reader && !h.is_available())
            .cloned()
            .collect();
        active.shuffle(&mut rng);
        down.shuffle(&mut rng);
        let mut candidates = active;
        candidates.append(&mut down);
        if mode == FailoverMode::ReaderOrWriter {
            if let Some(writer) = writer_of(&hosts) {
                candidates.push(writer.clone());
            }
        }
        candidates
    }

    /// Races up to two connection attempts; the winner is kept, a late loser
    /// closes itself in deferred cleanup.
    async fn race_batch(
        &self,
        batch: &[HostInfo],
        per_attempt: Duration,
    ) -> Option<(Arc<dyn DriverConnection>, HostInfo)> {
        let claimed = Arc::new(AtomicBool::new(false));
        let mut attempts = JoinSet::new();
        for host in batch {
            let service = Arc::clone(&self.service);
            let host = host.clone();
            let claimed = Arc::clone(&claimed);
            attempts.spawn(async move {
                match tokio::time::timeout(per_attempt, service.force_connect(&host)).await {
                    Ok(Ok(client)) => {
                        if claimed.swap(true, Ordering::AcqRel) {
                            let _ = client.close().await;
                            None
                        } else {
                            Some((client, host))
                        }
                    }
                    Ok(Err(e)) => {
                        debug!("Reader candidate {} failed: {}", host.url(), e);
                        None
                    }
                    Err(_) => {
                        debug!("Reader candidate {} timed out.", host.url());
                        None
                    }
                }
            });
        }
        let mut winner = None;
        while let Some(result) = attempts.join_next().await {
            if let Ok(Some(pair)) = result {
                winner = Some(pair);
                break;
            }
        }
        // Let a still-running sibling finish and clean itself up.
        attempts.detach_all();
        winner
    }

    async fn is_actually_writer(
        &self,
        client: &Arc<dyn DriverConnection>,
        host: &HostInfo,
    ) -> bool {
        let Ok(provider) = self.service.host_list_provider() else {
            return false;
        };
        let Some(fresh) = provider
            .force_refresh(client, READER_TOPOLOGY_REFRESH_BUDGET)
            .await
        else {
            return false;
        };
        writer_of(&fresh)
            .map(|w| w.url() == host.url())
            .unwrap_or(false)
    }
}

// --- writer failover ---

/// Role check with a budget, for candidates that may be stalled.
async fn still_writer(
    service: &Arc<PluginService>,
    client: &Arc<dyn DriverConnection>,
    budget: Duration,
) -> bool {
    let dialect = service.dialect();
    match tokio::time::timeout(budget, client.query(dialect.is_reader_query())).await {
        Ok(Ok(result)) => !matches!(result.first("is_reader"), Some("true") | Some("1")),
        _ => false,
    }
}

struct WriterFailoverHandler {
    service: Arc<PluginService>,
}

impl WriterFailoverHandler {
    /// Races "reconnect to the old writer" against "wait for a newly elected
    /// writer"; the first task to produce a writer connection wins.
    async fn failover(
        &self,
        deadline: Instant,
    ) -> Result<(Arc<dyn DriverConnection>, HostInfo), WrapperError> {
        let settings = self.service.settings();
        let provider = self.service.host_list_provider()?;
        let original_writer = writer_of(&self.service.all_hosts()).cloned();
        let claimed = Arc::new(AtomicBool::new(false));
        let mut attempts = JoinSet::new();

        if let Some(writer) = original_writer.clone() {
            let service = Arc::clone(&self.service);
            let claimed = Arc::clone(&claimed);
            let retry_interval = settings.failover_writer_reconnect_interval;
            let verify_budget = settings.wrapper_query_timeout;
            attempts.spawn(async move {
                loop {
                    if claimed.load(Ordering::Acquire) || Instant::now() >= deadline {
                        return None;
                    }
                    match service.force_connect(&writer).await {
                        Ok(client) => {
                            // The old writer may have come back as a reader
                            // after a completed election.
                            if still_writer(&service, &client, verify_budget).await {
                                if claimed.swap(true, Ordering::AcqRel) {
                                    let _ = client.close().await;
                                    return None;
                                }
                                debug!("Reconnected to the original writer {}.", writer.url());
                                return Some((client, writer));
                            }
                            debug!(
                                "Original writer {} is no longer a writer.",
                                writer.url()
                            );
                            let _ = client.close().await;
                        }
                        Err(e) => {
                            debug!(
                                "Original writer {} still unreachable: {}",
                                writer.url(),
                                e
                            );
                        }
                    }
                    tokio::time::sleep(
                        retry_interval.min(deadline.saturating_duration_since(Instant::now())),
                    )
                    .await;
                }
            });
        }

        {
            let service = Arc::clone(&self.service);
            let provider = Arc::clone(&provider);
            let claimed = Arc::clone(&claimed);
            attempts.spawn(async move {
                loop {
                    if claimed.load(Ordering::Acquire) || Instant::now() >= deadline {
                        return None;
                    }
                    let budget =
                        WRITER_POLL_CHUNK.min(deadline.saturating_duration_since(Instant::now()));
                    let Some(topology) = provider.force_monitoring_refresh(true, budget).await
                    else {
                        continue;
                    };
                    let Some(new_writer) = writer_of(&topology).cloned() else {
                        continue;
                    };
                    match service.force_connect(&new_writer).await {
                        Ok(client) => {
                            if claimed.swap(true, Ordering::AcqRel) {
                                let _ = client.close().await;
                                return None;
                            }
                            debug!("Connected to the newly elected writer {}.", new_writer.url());
                            return Some((client, new_writer));
                        }
                        Err(e) => {
                            debug!(
                                "Newly elected writer {} not reachable yet: {}",
                                new_writer.url(),
                                e
                            );
                        }
                    }
                }
            });
        }

        let overall = deadline.saturating_duration_since(Instant::now());
        let winner = tokio::time::timeout(overall, async {
            while let Some(result) = attempts.join_next().await {
                if let Ok(Some(pair)) = result {
                    return Some(pair);
                }
            }
            None
        })
        .await
        .ok()
        .flatten();
        attempts.detach_all();

        match winner {
            Some((client, mut host)) => {
                host.role = HostRole::Writer;
                Ok((client, host))
            }
            None => {
                // Stop the detached attempts at their next check.
                claimed.store(true, Ordering::Release);
                Err(WrapperError::FailoverFailed(format!(
                    "no writer became reachable within {:?}",
                    settings.failover_timeout
                )))
            }
        }
    }
}
