use std::{fmt, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sts::{
    Client,
    config::{Credentials, Region},
    types,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;

use crate::cache::{SessionCache, SessionCredentials, cache_key};

/// Region used for the session exchange when no profile in the chain sets one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Long-lived credentials the session is derived from.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl SourceCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.access_key_id)
    }
}

impl fmt::Debug for SourceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .finish()
    }
}

/// Inputs of an MFA-gated `GetSessionToken` call.
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    pub source: &'a SourceCredentials,
    pub region: &'a str,
    pub mfa_serial: &'a str,
    pub mfa_token: &'a str,
    /// Skip the exchange's own cache lookup.
    pub force_refresh: bool,
}

/// Exchanges source credentials plus an MFA code for a session.
#[async_trait]
pub trait SessionExchange: Send + Sync {
    async fn get_session_token(&self, request: SessionRequest<'_>) -> Result<SessionCredentials>;
}

/// Session exchange backed by STS that keeps the session cache up to date.
pub struct StsSessionExchange {
    cache: Arc<dyn SessionCache>,
    duration: u32,
}

impl StsSessionExchange {
    pub fn new(cache: Arc<dyn SessionCache>, duration: u32) -> Self {
        Self { cache, duration }
    }
}

#[async_trait]
impl SessionExchange for StsSessionExchange {
    async fn get_session_token(&self, request: SessionRequest<'_>) -> Result<SessionCredentials> {
        let key = request.source.cache_key();
        if !request.force_refresh {
            if let Some(session) = self.cache.read(&key).filter(SessionCredentials::is_valid) {
                debug!("Reusing cached session for {}", request.source.access_key_id);
                return Ok(session);
            }
        }

        info!("Fetching credentials - Duration: {}s", self.duration);
        let credentials = Credentials::new(
            &request.source.access_key_id,
            &request.source.secret_access_key,
            None,
            None,
            "aws-1password-mfa",
        );
        let config = aws_config::from_env()
            .credentials_provider(credentials)
            .region(Region::new(request.region.to_owned()))
            .load()
            .await;

        let credentials = Client::new(&config)
            .get_session_token()
            .duration_seconds(self.duration as i32)
            .serial_number(request.mfa_serial)
            .token_code(request.mfa_token)
            .send()
            .await?
            .credentials()
            .cloned()
            .context("No credentials returned")?;

        let session = session_from_sts(&credentials, request.region)?;
        self.cache.write(&key, &session)?;
        info!("Success! Credentials expire at: {}", session.expiration);
        Ok(session)
    }
}

fn session_from_sts(credentials: &types::Credentials, region: &str) -> Result<SessionCredentials> {
    let expiration = credentials.expiration();
    let expiration = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
        .context("Session expiration out of range")?;
    Ok(SessionCredentials {
        access_key_id: credentials.access_key_id().to_owned(),
        secret_access_key: credentials.secret_access_key().to_owned(),
        session_token: credentials.session_token().to_owned(),
        expiration,
        region: Some(region.to_owned()),
    })
}
