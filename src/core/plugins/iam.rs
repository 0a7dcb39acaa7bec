// src/core/plugins/iam.rs

//! IAM database authentication: replaces the password with a short-lived
//! signed token before the driver dials. Token computation is a pure function
//! of `(host, port, user, region)` and is consumed through a seam.

use super::{ConnectContext, ConnectionPlugin, NextConnect, methods};
use crate::core::driver::DriverConnection;
use crate::core::errors::WrapperError;
use crate::core::rds_url;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const IAM_PLUGIN_NAME: &str = "iam";

/// Tokens are valid for 15 minutes; keep a margin.
const TOKEN_TTL: Duration = Duration::from_secs(14 * 60);

/// Computes an IAM authentication token. Out-of-scope signing lives behind
/// this seam; tests supply a deterministic implementation.
pub trait IamTokenGenerator: Send + Sync {
    fn generate_token(&self, host: &str, port: u16, user: &str, region: &str) -> String;
}

struct CachedToken {
    token: String,
    issued_at: Instant,
}

pub struct IamAuthPlugin {
    generator: Arc<dyn IamTokenGenerator>,
    region: Option<String>,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl IamAuthPlugin {
    pub fn new(generator: Arc<dyn IamTokenGenerator>, region: Option<String>) -> Self {
        Self {
            generator,
            region,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn token_for(&self, host: &str, port: u16, user: &str) -> String {
        let region = self
            .region
            .clone()
            .or_else(|| rds_url::extract_region(host))
            .unwrap_or_else(|| "us-east-1".to_string());
        let cache_key = format!("{user}@{host}:{port}/{region}");
        {
            let tokens = self.tokens.lock();
            if let Some(cached) = tokens.get(&cache_key) {
                if cached.issued_at.elapsed() < TOKEN_TTL {
                    return cached.token.clone();
                }
            }
        }
        let token = self.generator.generate_token(host, port, user, &region);
        debug!("Generated IAM token for {}.", cache_key);
        self.tokens.lock().insert(
            cache_key,
            CachedToken {
                token: token.clone(),
                issued_at: Instant::now(),
            },
        );
        token
    }
}

#[async_trait]
impl ConnectionPlugin for IamAuthPlugin {
    fn name(&self) -> &'static str {
        IAM_PLUGIN_NAME
    }

    fn subscribed_methods(&self) -> &'static [&'static str] {
        &[methods::CONNECT, methods::FORCE_CONNECT]
    }

    async fn connect(
        &self,
        mut ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let port = ctx.spec.port.unwrap_or(0);
        ctx.spec.password = self.token_for(&ctx.spec.host, port, &ctx.spec.user);
        next.call(ctx).await
    }

    async fn force_connect(
        &self,
        mut ctx: ConnectContext,
        next: NextConnect<'_>,
    ) -> Result<Arc<dyn DriverConnection>, WrapperError> {
        let port = ctx.spec.port.unwrap_or(0);
        ctx.spec.password = self.token_for(&ctx.spec.host, port, &ctx.spec.user);
        next.call(ctx).await
    }
}
