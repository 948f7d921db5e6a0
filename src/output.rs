//! Credentials in the format expected from an AWS `credential_process`.
//!
//! <https://docs.aws.amazon.com/sdkref/latest/guide/feature-process-credentials.html>

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{cache::SessionCredentials, credentials::SourceCredentials, profile::Profile};

#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialProcessResponse {
    pub version: i64,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl From<&SessionCredentials> for CredentialProcessResponse {
    fn from(session: &SessionCredentials) -> Self {
        Self {
            version: 1,
            access_key_id: session.access_key_id.clone(),
            secret_access_key: session.secret_access_key.clone(),
            session_token: Some(session.session_token.clone()),
            expiration: Some(session.expiration),
        }
    }
}

impl From<&SourceCredentials> for CredentialProcessResponse {
    fn from(source: &SourceCredentials) -> Self {
        Self {
            version: 1,
            access_key_id: source.access_key_id.clone(),
            secret_access_key: source.secret_access_key.clone(),
            session_token: None,
            expiration: None,
        }
    }
}

impl TryFrom<&Profile> for CredentialProcessResponse {
    type Error = anyhow::Error;

    fn try_from(profile: &Profile) -> Result<Self> {
        Ok(Self {
            version: 1,
            access_key_id: profile.aws_access_key_id.clone().context("Missing aws_access_key_id")?,
            secret_access_key: profile
                .aws_secret_access_key
                .clone()
                .context("Missing aws_secret_access_key")?,
            session_token: profile.aws_session_token.clone(),
            expiration: profile.expiration,
        })
    }
}

impl std::fmt::Debug for CredentialProcessResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProcessResponse")
            .field("version", &self.version)
            .field("access_key_id", &self.access_key_id)
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_keys_omit_session_fields() {
        let response = CredentialProcessResponse::from(&SourceCredentials::new("AKIA1", "s3cr3t"));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "Version": 1,
                "AccessKeyId": "AKIA1",
                "SecretAccessKey": "s3cr3t",
            })
        );
    }

    #[test]
    fn sessions_include_token_and_expiration() {
        let expiration = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let session = SessionCredentials {
            access_key_id: "ASIA2".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration,
            region: None,
        };
        let value = serde_json::to_value(CredentialProcessResponse::from(&session)).unwrap();
        assert_eq!(value["SessionToken"], "token");
        assert_eq!(value["Expiration"], "2030-01-01T00:00:00Z");
    }

    #[test]
    fn profile_without_keys_is_rejected() {
        assert!(CredentialProcessResponse::try_from(&Profile::default()).is_err());
    }
}
