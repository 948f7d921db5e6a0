//! MFA for profiles whose base credentials come from a `credential_process`.
//!
//! The process output is exchanged, together with a one-time password, for a session
//! that replaces the process in the profile view handed back to the host.

use std::{io, process::Stdio};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error};
use thiserror::Error;
use tokio::process::Command;

use crate::{
    cache::SessionCredentials,
    config::PluginConfig,
    credentials::{DEFAULT_REGION, SessionRequest, SourceCredentials},
    hook::{Arguments, MfaHook, Resolution, SkipReason},
    profile::{Profiles, ResolvedChain},
};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to run credential process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "credential process `{command}` failed ({}): {stderr}",
        .status.map_or_else(|| "terminated by signal".to_owned(), |code| format!("exit code {code}"))
    )]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("credential process `{command}` printed malformed credentials: {source}")]
    Parse {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Runs a credential-generating command.
#[async_trait]
pub trait CredentialProcess: Send + Sync {
    async fn run(&self, command: &str) -> Result<SourceCredentials, ProcessError>;
}

/// Runs `credential_process` commands through `sh -c`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellCredentialProcess;

#[async_trait]
impl CredentialProcess for ShellCredentialProcess {
    async fn run(&self, command: &str) -> Result<SourceCredentials, ProcessError> {
        debug!("Running credential process `{command}`");
        let output = Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::inherit())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                command: command.to_owned(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProcessError::Failed {
                command: command.to_owned(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        parse_output(command, &String::from_utf8_lossy(&output.stdout))
    }
}

pub(crate) fn parse_output(command: &str, stdout: &str) -> Result<SourceCredentials, ProcessError> {
    serde_json::from_str(stdout.trim()).map_err(|source| ProcessError::Parse {
        command: command.to_owned(),
        source,
    })
}

/// Resolves a session for a first profile backed by `command`.
///
/// Every failure degrades to a skip so the host carries on without MFA injection.
pub(crate) async fn resolve(
    hook: &MfaHook,
    config: &PluginConfig,
    args: &Arguments,
    profiles: &Profiles,
    chain: &ResolvedChain,
    command: &str,
) -> Result<Resolution> {
    let source = match hook.process.run(command).await {
        Ok(source) => source,
        Err(e) => {
            error!("{e}");
            return Ok(Resolution::Skip(SkipReason::ProcessFailed));
        }
    };

    if !args.force_refresh {
        if let Some(session) = hook.cache.read(&source.cache_key()).filter(SessionCredentials::is_valid) {
            debug!("Using cached session for {}", source.access_key_id);
            return Ok(Resolution::Session {
                profile: chain.first().to_owned(),
                session,
            });
        }
    }

    let Some(mfa_serial) = profiles.mfa_serial(chain) else {
        return Ok(Resolution::Skip(SkipReason::NoMfaSerial));
    };
    let Some(item) = config.vault_items.resolve(mfa_serial) else {
        return Ok(Resolution::Skip(SkipReason::NoVaultItem));
    };
    let mfa_token = match hook.otp.fetch(item).await {
        Ok(mfa_token) => mfa_token,
        Err(e) => {
            debug!("No one-time password for {mfa_serial}: {e}");
            return Ok(Resolution::Skip(SkipReason::OtpUnavailable));
        }
    };

    let request = SessionRequest {
        source: &source,
        region: profiles.region(chain).unwrap_or(DEFAULT_REGION),
        mfa_serial,
        mfa_token: &mfa_token,
        force_refresh: args.force_refresh,
    };
    match hook.exchange.get_session_token(request).await {
        Ok(session) => Ok(Resolution::Session {
            profile: chain.first().to_owned(),
            session,
        }),
        Err(e) => {
            hook.console.error(&format!("Failed to get session token: {e}"));
            error!("Session exchange for profile {} failed: {e:?}", chain.first());
            Ok(Resolution::Skip(SkipReason::ExchangeFailed))
        }
    }
}
