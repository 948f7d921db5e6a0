//! AWS MFA credentials with 1Password
//!
//! Resolves credentials for an AWS profile, fetching MFA codes from 1Password:
//! 1. Parses command-line arguments and loads profiles and plugin configuration
//! 2. Runs the MFA hook, which fetches a one-time password when the profile needs one,
//!    or exchanges `credential_process` output for a cached MFA session
//! 3. Completes the session exchange the hook prepared, falling back to manual input
//!    when no code could be fetched
//! 4. Prints the credentials in the `credential_process` JSON format

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::debug;

mod cache;
mod cli;
mod config;
mod console;
mod credentials;
mod hook;
mod otp;
mod output;
mod process;
mod profile;
mod static_keys;
#[cfg(test)]
mod testing;

use cache::{FileCache, SessionCache, SessionCredentials};
use cli::Args;
use config::PluginConfig;
use console::{Console, Terminal};
use credentials::{DEFAULT_REGION, SessionExchange, SessionRequest, SourceCredentials, StsSessionExchange};
use hook::{Arguments, MfaHook};
use otp::OpCli;
use output::CredentialProcessResponse;
use process::{CredentialProcess, ShellCredentialProcess};
use profile::{CredentialSource, Profiles};

/// Main entry point.
///
/// 1. Initializes logging at INFO level unless `RUST_LOG` says otherwise
/// 2. Parses command-line arguments
/// 3. Wires the 1Password CLI, session cache, STS exchange and credential process runner
///    into an [`MfaHook`]
/// 4. Loads the plugin configuration and the AWS profiles
/// 5. Lets the hook prepare MFA, then resolves and prints the credentials
///
/// # Returns
/// * `Ok(())` - If credentials were printed to stdout
/// * `Err(anyhow::Error)` - If they could not be resolved
///
/// # Errors
/// This function will return an error if:
/// * The plugin config or profile files cannot be read
/// * The requested profile is unknown or has no credentials
/// * The credential process or the session exchange fails
#[tokio::main]
async fn main() -> Result<()> {
    // INFO by default; RUST_LOG=debug shows diagnostics the console truncates
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Args {
        profile,
        mfa_token,
        force_refresh,
        config,
        aws_config_file,
        credentials_path,
        cache_dir,
        duration,
        op_account,
        op_program,
    } = Args::parse();

    // The hook and the CLI share the cache and exchange so sessions are written once
    let console: Arc<dyn Console> = Arc::new(Terminal);
    let cache = Arc::new(FileCache::new(cache_dir)?);
    debug!("Session cache: {}", cache.dir().display());
    let exchange = Arc::new(StsSessionExchange::new(cache.clone(), duration));
    let process = Arc::new(ShellCredentialProcess);
    let hook = MfaHook::new(
        Arc::new(OpCli::new(op_program, op_account, console.clone())),
        cache.clone(),
        exchange.clone(),
        process.clone(),
        console,
    );

    // A missing default config file means no vault items are configured
    let config = PluginConfig::load(config)?;
    let mut profiles = Profiles::load(aws_config_file, credentials_path)?;
    let mut arguments = Arguments {
        target_profile_name: profile,
        mfa_token,
        force_refresh,
    };

    // Never fails; at worst it leaves everything untouched
    hook.pre_get_credentials(&config, &mut arguments, &mut profiles).await;

    let response = resolve_credentials(
        &arguments,
        &profiles,
        cache.as_ref(),
        exchange.as_ref(),
        process.as_ref(),
        prompt_mfa_token,
    )
    .await?;
    serde_json::to_writer(std::io::stdout(), &response)?;
    Ok(())
}

/// Resolves the credentials the hook prepared.
///
/// Follows the first profile of the requested profile's chain:
/// 1. A session the hook already put into the profile is returned as it is
/// 2. Base credentials come from the profile's keys or its credential process
/// 3. Without an MFA serial the base credentials are returned
/// 4. A valid cached session is used unless a token was supplied or a refresh forced
/// 5. Otherwise a new session is requested with the supplied token, or one from `prompt`
///
/// # Arguments
/// * `args` - Arguments after the hook ran, possibly carrying an MFA token
/// * `profiles` - Profiles after the hook ran
/// * `cache` - Session cache keyed by source access key
/// * `exchange` - Session token exchange
/// * `process` - Runner for `credential_process` commands
/// * `prompt` - Manual fallback called with the MFA serial when no token is available
///
/// # Returns
/// * `Ok(CredentialProcessResponse)` - Credentials to print
/// * `Err(anyhow::Error)` - If any step fails
///
/// # Errors
/// This function will return an error if:
/// * The profile is unknown, its chain is broken or it has no credentials
/// * The credential process fails or prints malformed output
/// * The prompt or the session exchange fails
async fn resolve_credentials(
    args: &Arguments,
    profiles: &Profiles,
    cache: &dyn SessionCache,
    exchange: &dyn SessionExchange,
    process: &dyn CredentialProcess,
    prompt: impl FnOnce(&str) -> Result<String>,
) -> Result<CredentialProcessResponse> {
    let chain = profiles
        .resolve_chain(&args.target_profile_name)?
        .with_context(|| format!("Profile not found: {}", args.target_profile_name))?;
    let first = profiles
        .get(chain.first())
        .with_context(|| format!("Profile not found: {}", chain.first()))?;

    let source = match first.credential_source() {
        CredentialSource::Process(command) => process.run(command).await?,
        CredentialSource::Static if first.aws_session_token.is_some() => {
            return CredentialProcessResponse::try_from(first);
        }
        CredentialSource::Static => SourceCredentials::new(
            first.aws_access_key_id.as_deref().context("Missing aws_access_key_id")?,
            first
                .aws_secret_access_key
                .as_deref()
                .context("Missing aws_secret_access_key")?,
        ),
        CredentialSource::None => bail!("Profile {} has no credentials", chain.first()),
    };

    let Some(mfa_serial) = profiles.mfa_serial(&chain) else {
        return Ok((&source).into());
    };

    if args.mfa_token.is_none() && !args.force_refresh {
        if let Some(session) = cache.read(&source.cache_key()).filter(SessionCredentials::is_valid) {
            return Ok((&session).into());
        }
    }

    let mfa_token = match &args.mfa_token {
        Some(token) => token.clone(),
        None => {
            debug!("No MFA token from 1Password, falling back to manual input");
            prompt(mfa_serial)?
        }
    };

    let session = exchange
        .get_session_token(SessionRequest {
            source: &source,
            region: profiles.region(&chain).unwrap_or(DEFAULT_REGION),
            mfa_serial,
            mfa_token: &mfa_token,
            // the cache was consulted above
            force_refresh: true,
        })
        .await?;
    Ok((&session).into())
}

/// Prompts for an MFA code on the terminal.
///
/// The prompt goes to stderr since stdout carries the credentials.
///
/// # Errors
/// Returns an error if stderr cannot be written or stdin cannot be read.
fn prompt_mfa_token(mfa_serial: &str) -> Result<String> {
    {
        let mut stderr = std::io::stderr().lock();
        write!(stderr, "Enter AWS MFA code for device {mfa_serial}: ")?;
        stderr.flush()?;
    }

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
