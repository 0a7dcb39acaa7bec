// src/core/plugins/secrets_manager.rs

//! Resolves credentials from Secrets Manager before connecting. On an
//! access-denied failure the secret is refreshed and the connect retried at
//! most once, covering rotation races.

use super::{ConnectContext, ConnectionPlugin, NextConnect, methods};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use async_trait::async_trait;
use tokio::sync::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SECRETS_MANAGER_PLUGIN_NAME: &str = "secretsManager";

/// Configuration key naming the secret to fetch.
pub const SECRET_ID_KEY: &str = "secretsManagerSecretId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbSecret {
    pub username: String,
    pub password: String,
}

/// Narrow Secrets Manager seam (`GetSecretValue`).
#[async_trait]
pub trait SecretsClient: Send + Sync {
    async fn get_secret(&self, secret_id: &str) -> Result<DbSecret, WrapperError>;
}

pub struct SecretsManagerPlugin {
    client: Arc<dyn SecretsClient>,
    secret_id: String,
    cached: Mutex<Option<DbSecret>>,
}

impl SecretsManagerPlugin {
    pub fn new(client: Arc<dyn SecretsClient>, secret_id: String) -> Self {
        Self {
            client,
            secret_id,
            cached: Mutex::new(None),
        }
    }

    async fn secret(&self, force_refresh: bool) -> Result<DbSecret, WrapperError> {
        let mut cached = self.cached.lock().await;
        if !force_refresh {
            if let Some(secret) = cached.as_ref() {
                return Ok(secret.clone());
            }
        }
        debug!(
            "Fetching secret '{}'{}.",
            self.secret_id,
            if force_refresh { " (forced refresh)" } else { "" }
        );
        let secret = self
            .client
            .get_secret(&self.secret_id)
            .await
            .map_err(|e| WrapperError::Login(format!("secret fetch failed: {e}")))?;
        *cached = Some(secret.clone());
        Ok(secret)
    }

    fn with_secret(ctx: &ConnectContext, secret: &DbSecret) -> ConnectContext {
        let mut ctx = ctx.clone();
        ctx.spec.user = secret.username.clone();
        ctx.spec.password = secret.password.clone();
        ctx
    }

    async fn connect_with_retry(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let secret = self.secret(false).await?;
        let first = next.call(Self::with_secret(&ctx, &secret)).await;
        match first {
            Err(error)
                if matches!(
                    error,
                    WrapperError::AccessDenied(_) | WrapperError::Login(_)
                ) || error.sqlstate().map(|s| s.starts_with("28")).unwrap_or(false) =>
            {
                warn!("Access denied with cached secret; refreshing and retrying once.");
                let refreshed = self.secret(true).await?;
                next.call(Self::with_secret(&ctx, &refreshed)).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ConnectionPlugin for SecretsManagerPlugin {
    fn name(&self) -> &'static str {
        SECRETS_MANAGER_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[methods::CONNECT, methods::FORCE_CONNECT]
    }

    async fn connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        self.connect_with_retry(ctx, next).await
    }

    async fn force_connect(
        &self,
        ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        self.connect_with_retry(ctx, next).await
    }
}
