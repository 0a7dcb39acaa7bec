// src/core/plugins/federated_auth.rs

//! Federated authentication: a SAML assertion (ADFS/Okta flows live behind
//! the provider seam) is exchanged through STS for temporary credentials,
//! which back an IAM token used as the database password.

use super::{ConnectContext, ConnectionPlugin, NextConnect, methods};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::rds_url;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const FEDERATED_AUTH_PLUGIN_NAME: &str = "federatedAuth";

/// Configuration keys consumed from the forwarded property bag.
pub const ROLE_ARN_KEY: &str = "roleArn";
pub const IDP_ARN_KEY: &str = "idpArn";

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Produces a SAML assertion; the HTTP login flow is out of scope.
#[async_trait]
pub trait SamlAssertionProvider: Send + Sync {
    async fn get_saml_assertion(&self) -> Result<String, WrapperError>;
}

/// Narrow STS seam (`AssumeRoleWithSAML`).
#[async_trait]
pub trait StsClient: Send + Sync {
    async fn assume_role_with_saml(
        &self,
        assertion: &str,
        role_arn: &str,
        principal_arn: &str,
    ) -> Result<AwsCredentials, WrapperError>;
}

/// Turns temporary credentials into a database auth token.
pub trait FederatedTokenGenerator: Send + Sync {
    fn generate_token(
        &self,
        credentials: &AwsCredentials,
        host: &str,
        port: u16,
        user: &str,
        region: &str,
    ) -> String;
}

pub struct FederatedAuthPlugin {
    saml: Arc<dyn SamlAssertionProvider>,
    sts: Arc<dyn StsClient>,
    tokens: Arc<dyn FederatedTokenGenerator>,
    role_arn: String,
    idp_arn: String,
    region: Option<String>,
}

impl FederatedAuthPlugin {
    pub fn new(
        saml: Arc<dyn SamlAssertionProvider>,
        sts: Arc<dyn StsClient>,
        tokens: Arc<dyn FederatedTokenGenerator>,
        role_arn: String,
        idp_arn: String,
        region: Option<String>,
    ) -> Self {
        Self {
            saml,
            sts,
            tokens,
            role_arn,
            idp_arn,
            region,
        }
    }

    async fn resolve_password(&self, ctx: &ConnectContext) -> Result<String, WrapperError> {
        let assertion = self
            .saml
            .get_saml_assertion()
            .await
            .map_err(|e| WrapperError::Login(format!("SAML assertion failed: {e}")))?;
        let credentials = self
            .sts
            .assume_role_with_saml(&assertion, &self.role_arn, &self.idp_arn)
            .await
            .map_err(|e| WrapperError::Login(format!("AssumeRoleWithSAML failed: {e}")))?;
        let region = self
            .region
            .clone()
            .or_else(|| rds_url::extract_region(&ctx.spec.host))
            .unwrap_or_else(|| "us-east-1".to_string());
        debug!("Federated credentials resolved for role {}.", self.role_arn);
        Ok(self.tokens.generate_token(
            &credentials,
            &ctx.spec.host,
            ctx.spec.port.unwrap_or(0),
            &ctx.spec.user,
            &region,
        ))
    }
}

#[async_trait]
impl ConnectionPlugin for FederatedAuthPlugin {
    fn name(&self) -> &'static str {
        FEDERATED_AUTH_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[methods::CONNECT, methods::FORCE_CONNECT]
    }

    async fn connect(
        &self,
        mut ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        ctx.spec.password = self.resolve_password(&ctx).await?;
        next.call(ctx).await
    }

    async fn force_connect(
        &self,
        mut ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        ctx.spec.password = self.resolve_password(&ctx).await?;
        next.call(ctx).await
    }
}
