//! MFA for profiles holding static access keys.
//!
//! Only decides whether a one-time password is needed and fetches it; the session
//! exchange is left to whoever consumes the arguments.

use anyhow::Result;
use log::debug;

use crate::{
    cache::{SessionCredentials, cache_key},
    config::PluginConfig,
    hook::{Arguments, MfaHook, Resolution, SkipReason},
    profile::{Profiles, ResolvedChain},
};

pub(crate) async fn resolve(
    hook: &MfaHook,
    config: &PluginConfig,
    args: &Arguments,
    profiles: &Profiles,
    chain: &ResolvedChain,
) -> Result<Resolution> {
    let Some(access_key_id) = profiles
        .get(chain.first())
        .and_then(|p| p.aws_access_key_id.as_deref())
    else {
        debug!("Profile {} has no access key id", chain.first());
        return Ok(Resolution::Skip(SkipReason::NoAccessKey));
    };

    let cache_valid = hook
        .cache
        .read(&cache_key(access_key_id))
        .is_some_and(|session| SessionCredentials::is_valid(&session));

    let Some(mfa_serial) = profiles.mfa_serial(chain) else {
        return Ok(Resolution::Skip(SkipReason::NoMfaSerial));
    };
    if args.mfa_token.is_some() {
        debug!("MFA token supplied by caller");
        return Ok(Resolution::Skip(SkipReason::TokenSupplied));
    }
    if cache_valid && !args.force_refresh {
        debug!("Cached session for {access_key_id} is still valid");
        return Ok(Resolution::Skip(SkipReason::SessionCached));
    }

    let Some(item) = config.vault_items.resolve(mfa_serial) else {
        return Ok(Resolution::Skip(SkipReason::NoVaultItem));
    };
    match hook.otp.fetch(item).await {
        Ok(mfa_token) => Ok(Resolution::MfaToken(mfa_token)),
        Err(e) => {
            debug!("No one-time password for {mfa_serial}: {e}");
            Ok(Resolution::Skip(SkipReason::OtpUnavailable))
        }
    }
}
