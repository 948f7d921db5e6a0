//! Command-line interface definitions.

use std::path::PathBuf;

use clap::Parser;

/// Resolve AWS credentials for a profile, fetching MFA codes from 1Password.
///
/// Prints the credentials in the `credential_process` JSON format. Sessions obtained
/// with MFA are cached per source access key and reused until they expire.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Profile to resolve
    #[arg(env = "AWS_PROFILE", default_value = "default")]
    pub profile: String,

    /// MFA code to use instead of fetching one from 1Password
    #[arg(long, env = "AWS_MFA_TOKEN")]
    pub mfa_token: Option<String>,

    /// Ignore cached sessions and request a new one
    #[arg(short, long)]
    pub force_refresh: bool,

    /// Plugin config file [default: ~/.awsume/config.yaml]
    #[arg(long, env = "AWS_1PASSWORD_MFA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to AWS config file [default: ~/.aws/config]
    #[arg(long, env = "AWS_CONFIG_FILE")]
    pub aws_config_file: Option<PathBuf>,

    /// Path to AWS credentials file [default: ~/.aws/credentials]
    #[arg(short, long, env = "AWS_SHARED_CREDENTIALS_FILE")]
    pub credentials_path: Option<PathBuf>,

    /// Session cache directory [default: ~/.awsume/cache]
    #[arg(long, env = "AWS_1PASSWORD_MFA_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Session duration in seconds (900-129600)
    #[arg(
        short,
        long,
        env = "AWS_SESSION_DURATION",
        default_value = "43200",
        value_parser = clap::value_parser!(u32).range(900..=129600)
    )]
    pub duration: u32,

    /// 1Password account for MFA token retrieval
    #[arg(long, env = "AWS_MFA_OP_ACCOUNT")]
    pub op_account: Option<String>,

    /// 1Password CLI executable
    #[arg(long, env = "AWS_MFA_OP_PROGRAM", default_value = "op")]
    pub op_program: String,
}
