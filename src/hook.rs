//! Entry point invoked before credential resolution.
//!
//! The hook walks the requested profile's chain, dispatches on where the first
//! profile's credentials come from and merges the handler's [`Resolution`] back into the
//! arguments or profile view. Handlers report expected problems as [`SkipReason`]s; an
//! `Err` means something unexpected happened and is collapsed into a single console
//! message here, so the host always carries on.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;

use crate::{
    cache::{SessionCache, SessionCredentials},
    config::PluginConfig,
    console::Console,
    credentials::SessionExchange,
    otp::OtpSource,
    process::{self, CredentialProcess},
    profile::{CredentialSource, Profiles},
    static_keys,
};

/// Message shown when the hook fails unexpectedly.
pub const BUG_REPORT_MESSAGE: &str = concat!(
    "Unexpected failure; continuing without automated MFA. Please report a bug at ",
    env!("CARGO_PKG_NAME"),
    "'s issue tracker and include the output of RUST_LOG=debug."
);

/// Request state shared with the downstream credential resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments {
    pub target_profile_name: String,
    /// Code for the MFA device, once supplied or fetched.
    pub mfa_token: Option<String>,
    /// Ignore cached sessions.
    pub force_refresh: bool,
}

/// Why a handler left the request untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ProfileNotFound,
    NoCredentialSource,
    NoAccessKey,
    NoMfaSerial,
    TokenSupplied,
    SessionCached,
    NoVaultItem,
    OtpUnavailable,
    ProcessFailed,
    ExchangeFailed,
}

/// Outcome of a handler, merged by [`MfaHook::pre_get_credentials`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Skip(SkipReason),
    /// One-time password for the downstream session exchange.
    MfaToken(String),
    /// Session replacing the credential process of `profile`.
    Session {
        profile: String,
        session: SessionCredentials,
    },
}

pub struct MfaHook {
    pub(crate) otp: Arc<dyn OtpSource>,
    pub(crate) cache: Arc<dyn SessionCache>,
    pub(crate) exchange: Arc<dyn SessionExchange>,
    pub(crate) process: Arc<dyn CredentialProcess>,
    pub(crate) console: Arc<dyn Console>,
}

impl MfaHook {
    pub fn new(
        otp: Arc<dyn OtpSource>,
        cache: Arc<dyn SessionCache>,
        exchange: Arc<dyn SessionExchange>,
        process: Arc<dyn CredentialProcess>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            otp,
            cache,
            exchange,
            process,
            console,
        }
    }

    /// Prepares MFA for `args.target_profile_name` before credentials are resolved.
    ///
    /// Runs [`MfaHook::resolve`] and applies its outcome:
    /// 1. [`Resolution::MfaToken`] fills `args.mfa_token` unless a token is already there
    /// 2. [`Resolution::Session`] replaces the first profile's credential process with the
    ///    session
    /// 3. [`Resolution::Skip`] changes nothing
    ///
    /// # Arguments
    /// * `config` - Plugin configuration naming the 1Password items
    /// * `args` - Arguments of the current invocation; may receive an MFA token
    /// * `profiles` - Loaded profiles; may receive a session
    ///
    /// # Error Handling Pattern
    /// This never fails. Unexpected errors anywhere in the pipeline are reported on the
    /// console with a bug-report pointer and logged in full at debug level. The
    /// arguments and profiles are then left as they were, so the caller carries on
    /// without MFA automation.
    pub async fn pre_get_credentials(
        &self,
        config: &PluginConfig,
        args: &mut Arguments,
        profiles: &mut Profiles,
    ) {
        match self.resolve(config, args, profiles).await {
            Ok(resolution) => {
                debug!("MFA resolution: {resolution:?}");
                apply(resolution, args, profiles);
            }
            Err(e) => {
                self.console.error(BUG_REPORT_MESSAGE);
                debug!("Unexpected failure: {e:?}");
            }
        }
    }

    /// Decides what MFA preparation the requested profile needs, without applying it.
    ///
    /// Unknown profiles resolve to [`SkipReason::ProfileNotFound`]. Known ones are
    /// dispatched on the credential source of the first profile in their chain.
    ///
    /// # Errors
    /// Returns an error if the profile chain is broken (a loop or a missing source
    /// profile) or a collaborator fails unexpectedly.
    pub async fn resolve(
        &self,
        config: &PluginConfig,
        args: &Arguments,
        profiles: &Profiles,
    ) -> Result<Resolution> {
        let Some(chain) = profiles.resolve_chain(&args.target_profile_name)? else {
            return Ok(Resolution::Skip(SkipReason::ProfileNotFound));
        };
        let first = profiles
            .get(chain.first())
            .with_context(|| format!("Profile {} vanished from the profile set", chain.first()))?;

        match first.credential_source() {
            CredentialSource::Process(command) => {
                process::resolve(self, config, args, profiles, &chain, command).await
            }
            CredentialSource::Static => static_keys::resolve(self, config, args, profiles, &chain).await,
            CredentialSource::None => {
                debug!("Profile {} has no base credentials", chain.first());
                Ok(Resolution::Skip(SkipReason::NoCredentialSource))
            }
        }
    }
}

fn apply(resolution: Resolution, args: &mut Arguments, profiles: &mut Profiles) {
    match resolution {
        Resolution::Skip(_) => {}
        Resolution::MfaToken(token) => {
            args.mfa_token.get_or_insert(token);
        }
        Resolution::Session { profile, session } => {
            if let Some(profile) = profiles.get_mut(&profile) {
                profile.apply_session(&session);
            }
        }
    }
}
