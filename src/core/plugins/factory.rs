// src/core/plugins/factory.rs

//! Builds the ordered plugin chain from the configured plugin codes.

use super::aurora_connection_tracker::AuroraConnectionTrackerPlugin;
use super::custom_endpoint::CustomEndpointPlugin;
use super::default::DefaultPlugin;
use super::efm::HostMonitoringPlugin;
use super::failover::FailoverPlugin;
use super::federated_auth::{
    FederatedAuthPlugin, FederatedTokenGenerator, IDP_ARN_KEY, ROLE_ARN_KEY,
    SamlAssertionProvider, StsClient,
};
use super::iam::{IamAuthPlugin, IamTokenGenerator};
use super::limitless::LimitlessPlugin;
use super::manager::PluginManager;
use super::read_write_splitting::ReadWriteSplittingPlugin;
use super::secrets_manager::{SECRET_ID_KEY, SecretsClient, SecretsManagerPlugin};
use super::service::PluginService;
use super::stale_dns::StaleDnsPlugin;
use super::timing::{ConnectTimePlugin, ExecuteTimePlugin};
use super::ConnectionPlugin;
use crate::core::custom_endpoint::RdsApiClient;
use crate::core::errors::WrapperError;
use std::sync::Arc;

/// Externally supplied collaborators consumed through narrow seams. Plugins
/// that need one fail at chain build when it is absent.
#[derive(Default, Clone)]
pub struct AuxServices {
    pub rds_api: Option<Arc<dyn RdsApiClient>>,
    pub secrets: Option<Arc<dyn SecretsClient>>,
    pub iam_tokens: Option<Arc<dyn IamTokenGenerator>>,
    pub saml: Option<Arc<dyn SamlAssertionProvider>>,
    pub sts: Option<Arc<dyn StsClient>>,
    pub federated_tokens: Option<Arc<dyn FederatedTokenGenerator>>,
}

/// Plugins carrying this weight stay adjacent to whatever preceded them in
/// the configured order ("stick to prior").
const WEIGHT_STICK_TO_PRIOR: u32 = 0;

fn plugin_weight(code: &str) -> u32 {
    match code {
        "customEndpoint" => 380,
        "auroraConnectionTracker" => 400,
        "staleDns" => 500,
        "readWriteSplitting" => 600,
        "failover" | "failover2" => 700,
        "efm" | "efm2" => 800,
        "limitless" => 950,
        "iam" => 1000,
        "secretsManager" => 1100,
        "federatedAuth" => 1200,
        "connectTime" | "executeTime" => WEIGHT_STICK_TO_PRIOR,
        _ => u32::MAX,
    }
}

fn missing(code: &str, what: &str) -> WrapperError {
    WrapperError::IllegalArgument(format!("the '{code}' plugin requires {what}"))
}

fn create_plugin(
    code: &str,
    service: &Arc<PluginService>,
    aux: &AuxServices,
) -> Result<Arc<dyn ConnectionPlugin>, WrapperError> {
    let settings = service.settings();
    let plugin: Arc<dyn ConnectionPlugin> = match code {
        "failover" | "failover2" => Arc::new(FailoverPlugin::new(Arc::clone(service))),
        "efm" | "efm2" => Arc::new(HostMonitoringPlugin::new(Arc::clone(service))),
        "readWriteSplitting" => Arc::new(ReadWriteSplittingPlugin::new(Arc::clone(service))),
        "auroraConnectionTracker" => Arc::new(AuroraConnectionTrackerPlugin::new()),
        "staleDns" => Arc::new(StaleDnsPlugin::new(Arc::clone(service))),
        "limitless" => Arc::new(LimitlessPlugin::new(Arc::clone(service))),
        "connectTime" => Arc::new(ConnectTimePlugin::new(service.runtime().telemetry())),
        "executeTime" => Arc::new(ExecuteTimePlugin::new(service.runtime().telemetry())),
        "customEndpoint" => {
            let rds_api = aux
                .rds_api
                .clone()
                .ok_or_else(|| missing(code, "an RDS API client"))?;
            Arc::new(CustomEndpointPlugin::new(Arc::clone(service), rds_api))
        }
        "iam" => {
            let generator = aux
                .iam_tokens
                .clone()
                .ok_or_else(|| missing(code, "an IAM token generator"))?;
            let region = settings.extra.get("iamRegion").cloned();
            Arc::new(IamAuthPlugin::new(generator, region))
        }
        "secretsManager" => {
            let client = aux
                .secrets
                .clone()
                .ok_or_else(|| missing(code, "a Secrets Manager client"))?;
            let secret_id = settings
                .extra
                .get(SECRET_ID_KEY)
                .cloned()
                .ok_or_else(|| missing(code, &format!("the '{SECRET_ID_KEY}' property")))?;
            Arc::new(SecretsManagerPlugin::new(client, secret_id))
        }
        "federatedAuth" => {
            let saml = aux
                .saml
                .clone()
                .ok_or_else(|| missing(code, "a SAML assertion provider"))?;
            let sts = aux
                .sts
                .clone()
                .ok_or_else(|| missing(code, "an STS client"))?;
            let tokens = aux
                .federated_tokens
                .clone()
                .ok_or_else(|| missing(code, "a federated token generator"))?;
            let role_arn = settings
                .extra
                .get(ROLE_ARN_KEY)
                .cloned()
                .ok_or_else(|| missing(code, &format!("the '{ROLE_ARN_KEY}' property")))?;
            let idp_arn = settings
                .extra
                .get(IDP_ARN_KEY)
                .cloned()
                .ok_or_else(|| missing(code, &format!("the '{IDP_ARN_KEY}' property")))?;
            let region = settings.custom_endpoint_region.clone();
            Arc::new(FederatedAuthPlugin::new(
                saml, sts, tokens, role_arn, idp_arn, region,
            ))
        }
        unknown => {
            return Err(WrapperError::IllegalArgument(format!(
                "unknown plugin code '{unknown}'"
            )));
        }
    };
    Ok(plugin)
}

/// Builds the chain in configured order, priority-sorts it unless the caller
/// opted out, appends the terminal plugin, and wires the manager back into
/// the plugin service.
pub fn build_plugin_manager(
    service: &Arc<PluginService>,
    aux: &AuxServices,
) -> Result<Arc<PluginManager>, WrapperError> {
    let settings = service.settings();
    let mut entries: Vec<(u32, Arc<dyn ConnectionPlugin>)> = Vec::new();
    for code in settings.plugin_codes() {
        entries.push((plugin_weight(&code), create_plugin(&code, service, aux)?));
    }

    if settings.auto_sort_plugin_order {
        // Resolve stick-to-prior weights against the configured order, then
        // stable-sort so ties keep that order.
        let mut effective = Vec::with_capacity(entries.len());
        let mut last = 0u32;
        for (weight, _) in &entries {
            let resolved = if *weight == WEIGHT_STICK_TO_PRIOR {
                last
            } else {
                *weight
            };
            effective.push(resolved);
            last = resolved;
        }
        let mut indexed: Vec<usize> = (0..entries.len()).collect();
        indexed.sort_by_key(|i| effective[*i]);
        entries = indexed.into_iter().map(|i| entries[i].clone()).collect();
    }

    let mut plugins: Vec<Arc<dyn ConnectionPlugin>> =
        entries.into_iter().map(|(_, plugin)| plugin).collect();
    plugins.push(Arc::new(DefaultPlugin::new(Arc::clone(service))));

    let manager = PluginManager::new(plugins);
    service.set_manager(Arc::downgrade(&manager));
    Ok(manager)
}
