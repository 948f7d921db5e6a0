//! AWS profiles and role-assumption chains.
//!
//! Profiles are read from the shared config file (`[profile NAME]` sections) and the
//! shared credentials file (`[NAME]` sections); keys from the credentials file win.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use configparser::ini::Ini;
use log::debug;
use thiserror::Error;

use crate::cache::SessionCredentials;

/// Root profile; it is always the first profile of its own chain.
pub const DEFAULT_PROFILE: &str = "default";

const PROFILE_PREFIX: &str = "profile ";

type Sections = HashMap<String, HashMap<String, Option<String>>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile `{profile}` names missing source profile `{source_profile}`")]
    MissingSourceProfile {
        profile: String,
        source_profile: String,
    },

    #[error("credential loop: {} -> {next}", .profiles.join(" -> "))]
    CredentialLoop { profiles: Vec<String>, next: String },
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub aws_session_token: Option<String>,
    pub credential_process: Option<String>,
    pub mfa_serial: Option<String>,
    pub region: Option<String>,
    pub source_profile: Option<String>,
    pub role_arn: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

/// Where a profile's base credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    /// External command printing credentials as JSON.
    Process(&'a str),
    /// Keys stored in the profile.
    Static,
    /// Neither (SSO, instance metadata, ...).
    None,
}

impl Profile {
    fn from_section(values: &HashMap<String, Option<String>>) -> Self {
        let get = |key: &str| values.get(key).cloned().flatten().filter(|v| !v.is_empty());
        Self {
            aws_access_key_id: get("aws_access_key_id"),
            aws_secret_access_key: get("aws_secret_access_key"),
            aws_session_token: get("aws_session_token"),
            credential_process: get("credential_process"),
            mfa_serial: get("mfa_serial"),
            region: get("region"),
            source_profile: get("source_profile"),
            role_arn: get("role_arn"),
            expiration: get("expiration")
                .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    fn merge(&mut self, other: Profile) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            aws_access_key_id,
            aws_secret_access_key,
            aws_session_token,
            credential_process,
            mfa_serial,
            region,
            source_profile,
            role_arn,
            expiration
        );
    }

    pub fn credential_source(&self) -> CredentialSource<'_> {
        match (&self.credential_process, &self.aws_access_key_id, &self.aws_secret_access_key) {
            (Some(command), _, _) => CredentialSource::Process(command),
            (None, None, None) => CredentialSource::None,
            _ => CredentialSource::Static,
        }
    }

    /// Replaces the credential process with the resolved session.
    ///
    /// The MFA serial is dropped as well since the session already satisfied it. This
    /// only changes the in-memory view; nothing is written back to disk.
    pub fn apply_session(&mut self, session: &SessionCredentials) {
        self.credential_process = None;
        self.mfa_serial = None;
        self.aws_access_key_id = Some(session.access_key_id.clone());
        self.aws_secret_access_key = Some(session.secret_access_key.clone());
        self.aws_session_token = Some(session.session_token.clone());
        self.expiration = Some(session.expiration);
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "** redacted **");
        f.debug_struct("Profile")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &redact(&self.aws_secret_access_key))
            .field("aws_session_token", &redact(&self.aws_session_token))
            .field("credential_process", &self.credential_process)
            .field("mfa_serial", &self.mfa_serial)
            .field("region", &self.region)
            .field("source_profile", &self.source_profile)
            .field("role_arn", &self.role_arn)
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Profile names from the requested profile back to the profile holding base credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChain {
    names: Vec<String>,
}

impl ResolvedChain {
    /// Canonical name of the requested profile.
    pub fn target(&self) -> &str {
        &self.names[0]
    }

    /// Profile whose credentials are the MFA subject.
    pub fn first(&self) -> &str {
        &self.names[self.names.len() - 1]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profiles(BTreeMap<String, Profile>);

impl Profiles {
    /// Loads `~/.aws/config` and `~/.aws/credentials`, or the given paths.
    /// Missing files contribute no profiles.
    pub fn load(config_path: Option<PathBuf>, credentials_path: Option<PathBuf>) -> Result<Self> {
        let aws_dir = dirs::home_dir().map(|d| d.join(".aws"));
        let config_path = config_path.or_else(|| aws_dir.as_ref().map(|d| d.join("config")));
        let credentials_path = credentials_path.or_else(|| aws_dir.as_ref().map(|d| d.join("credentials")));

        let mut profiles = Self::default();
        if let Some(path) = config_path.filter(|p| p.exists()) {
            profiles.merge(load_ini(&path)?, true);
        }
        if let Some(path) = credentials_path.filter(|p| p.exists()) {
            profiles.merge(load_ini(&path)?, false);
        }
        debug!("Loaded {} profiles", profiles.0.len());
        Ok(profiles)
    }

    /// Parses profiles from the contents of a config file and a credentials file.
    pub fn parse(config: &str, credentials: &str) -> Result<Self> {
        let mut profiles = Self::default();
        profiles.merge(read_ini(config)?, true);
        profiles.merge(read_ini(credentials)?, false);
        Ok(profiles)
    }

    fn merge(&mut self, sections: Sections, config_file: bool) {
        for (section, values) in sections {
            let name = match section.strip_prefix(PROFILE_PREFIX) {
                Some(name) if config_file => name.trim(),
                _ if !config_file || section == DEFAULT_PROFILE => section.as_str(),
                // sso-session and services sections
                _ => continue,
            };
            self.0
                .entry(name.to_owned())
                .or_default()
                .merge(Profile::from_section(&values));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Profile> {
        self.0.get_mut(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, profile: Profile) {
        self.0.insert(name.into(), profile);
    }

    /// Maps a requested name onto a known profile.
    ///
    /// Accepts the exact name or its `profile NAME` spelling from the config file. Anything
    /// else is not found; near matches are never substituted since they name another
    /// account.
    pub fn canonical_name(&self, requested: &str) -> Option<String> {
        let requested = requested.trim();
        [Some(requested), requested.strip_prefix(PROFILE_PREFIX).map(str::trim)]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty() && self.0.contains_key(*name))
            .map(str::to_owned)
    }

    /// Walks `source_profile` links from the requested profile to the first profile.
    ///
    /// Returns `Ok(None)` when the requested profile is unknown, which is a normal
    /// outcome for profiles defined only in downstream tools.
    pub fn resolve_chain(&self, requested: &str) -> Result<Option<ResolvedChain>, ProfileError> {
        let Some(target) = self.canonical_name(requested) else {
            debug!("Profile {requested:?} not found");
            return Ok(None);
        };

        let mut names = vec![target];
        loop {
            let current = &names[names.len() - 1];
            if current == DEFAULT_PROFILE {
                break;
            }
            let source = match self.0.get(current).and_then(|p| p.source_profile.as_deref()) {
                Some(source) if source != current => source,
                _ => break,
            };
            if !self.0.contains_key(source) {
                return Err(ProfileError::MissingSourceProfile {
                    profile: current.clone(),
                    source_profile: source.to_owned(),
                });
            }
            if names.iter().any(|n| n == source) {
                return Err(ProfileError::CredentialLoop {
                    profiles: names,
                    next: source.to_owned(),
                });
            }
            names.push(source.to_owned());
        }

        debug!("Resolved profile chain: {}", names.join(" -> "));
        Ok(Some(ResolvedChain { names }))
    }

    /// MFA serial of the nearest profile in the chain that declares one.
    pub fn mfa_serial(&self, chain: &ResolvedChain) -> Option<&str> {
        let serial = chain
            .names()
            .iter()
            .find_map(|name| self.get(name)?.mfa_serial.as_deref());
        if serial.is_none() {
            debug!("No MFA required");
        }
        serial
    }

    /// Region of the first profile, falling back to the requested profile.
    pub fn region(&self, chain: &ResolvedChain) -> Option<&str> {
        [chain.first(), chain.target()]
            .into_iter()
            .find_map(|name| self.get(name)?.region.as_deref())
    }
}

/// Case-sensitive parser that only treats `#` and `;` as comments at the start of a line.
///
/// Values such as `credential_process` are shell commands and may contain either symbol.
fn ini() -> Ini {
    let mut ini = Ini::new_cs();
    ini.set_inline_comment_symbols(Some(&[]));
    ini
}

fn load_ini(path: &Path) -> Result<Sections> {
    ini()
        .load(path)
        .map_err(|e| anyhow!("Failed to load {}: {e}", path.display()))
}

fn read_ini(text: &str) -> Result<Sections> {
    ini()
        .read(text.to_owned())
        .map_err(|e| anyhow!("Failed to parse profiles: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const CONFIG: &str = r#"
[default]
region = us-west-2

[profile admin]
role_arn = arn:aws:iam::123456789012:role/Admin
source_profile = work
mfa_serial = arn:aws:iam::123456789012:mfa/alice

[profile readonly]
role_arn = arn:aws:iam::123456789012:role/ReadOnly
source_profile = admin

[profile work]
region = eu-west-1

[profile vaulted]
credential_process = /usr/local/bin/vault-creds --account work
mfa_serial = arn:aws:iam::123456789012:mfa/bob

[profile Staging]
region = ap-southeast-2

[sso-session corp]
sso_region = us-east-1
"#;

    const CREDENTIALS: &str = r#"
[default]
aws_access_key_id = AKIADEFAULT
aws_secret_access_key = default-secret

[work]
aws_access_key_id = AKIAWORK
aws_secret_access_key = work-secret
"#;

    fn profiles() -> Profiles {
        Profiles::parse(CONFIG, CREDENTIALS).unwrap()
    }

    #[test]
    fn merges_config_and_credentials_files() {
        let profiles = profiles();
        let work = profiles.get("work").unwrap();
        assert_eq!(work.aws_access_key_id.as_deref(), Some("AKIAWORK"));
        assert_eq!(work.region.as_deref(), Some("eu-west-1"));
        assert_eq!(work.credential_source(), CredentialSource::Static);
        assert!(profiles.get("corp").is_none());
        assert!(profiles.get("sso-session corp").is_none());
    }

    #[test]
    fn classifies_credential_sources() {
        let profiles = profiles();
        assert_eq!(
            profiles.get("vaulted").unwrap().credential_source(),
            CredentialSource::Process("/usr/local/bin/vault-creds --account work")
        );
        assert_eq!(profiles.get("admin").unwrap().credential_source(), CredentialSource::None);
    }

    #[test]
    fn canonicalizes_requested_names() {
        let profiles = profiles();
        assert_eq!(profiles.canonical_name("admin").as_deref(), Some("admin"));
        assert_eq!(profiles.canonical_name("profile admin").as_deref(), Some("admin"));
        assert_eq!(profiles.canonical_name(" Staging ").as_deref(), Some("Staging"));
        assert_eq!(profiles.canonical_name("missing"), None);
        assert_eq!(profiles.canonical_name(""), None);
        assert_eq!(profiles.canonical_name("profile "), None);
    }

    #[test]
    fn near_matches_are_not_found() {
        let profiles = profiles();
        assert_eq!(profiles.canonical_name("staging"), None);
        assert_eq!(profiles.canonical_name("vau"), None);
        assert_eq!(profiles.canonical_name("a"), None);
        assert_eq!(profiles.canonical_name("wor"), None);
        assert_eq!(profiles.resolve_chain("prod").unwrap(), None);
    }

    #[test]
    fn keeps_comment_symbols_inside_values() {
        let config = r#"
# leading comments are still skipped
[profile vaulted]
; so is this one
credential_process = vault-creds --item op://Private/aws#otp ; x
"#;
        let profiles = Profiles::parse(config, "").unwrap();
        assert_eq!(
            profiles.get("vaulted").unwrap().credential_process.as_deref(),
            Some("vault-creds --item op://Private/aws#otp ; x")
        );
        assert_eq!(profiles.0.len(), 1);
    }

    #[test]
    fn walks_role_chain_to_first_profile() {
        let chain = profiles().resolve_chain("readonly").unwrap().unwrap();
        assert_eq!(chain.names(), ["readonly", "admin", "work"]);
        assert_eq!(chain.target(), "readonly");
        assert_eq!(chain.first(), "work");
    }

    #[test]
    fn default_profile_is_its_own_first_profile() {
        let mut profiles = profiles();
        profiles.get_mut(DEFAULT_PROFILE).unwrap().source_profile = Some("work".into());
        let chain = profiles.resolve_chain(DEFAULT_PROFILE).unwrap().unwrap();
        assert_eq!(chain.names(), [DEFAULT_PROFILE]);
    }

    #[test]
    fn self_referencing_source_ends_the_walk() {
        let mut profiles = profiles();
        profiles.get_mut("work").unwrap().source_profile = Some("work".into());
        let chain = profiles.resolve_chain("admin").unwrap().unwrap();
        assert_eq!(chain.first(), "work");
    }

    #[test]
    fn unknown_profile_is_not_an_error() {
        assert_eq!(profiles().resolve_chain("downstream-only").unwrap(), None);
    }

    #[test]
    fn detects_credential_loops() {
        let mut profiles = profiles();
        profiles.get_mut("work").unwrap().source_profile = Some("readonly".into());
        let err = profiles.resolve_chain("readonly").unwrap_err();
        assert!(matches!(err, ProfileError::CredentialLoop { ref next, .. } if next == "readonly"));
    }

    #[test]
    fn missing_source_profile_is_an_error() {
        let mut profiles = profiles();
        profiles.get_mut("work").unwrap().source_profile = Some("gone".into());
        assert_eq!(
            profiles.resolve_chain("work").unwrap_err(),
            ProfileError::MissingSourceProfile {
                profile: "work".into(),
                source_profile: "gone".into()
            }
        );
    }

    #[test]
    fn mfa_serial_is_taken_from_nearest_profile() {
        let profiles = profiles();
        let chain = profiles.resolve_chain("readonly").unwrap().unwrap();
        assert_eq!(profiles.mfa_serial(&chain), Some("arn:aws:iam::123456789012:mfa/alice"));

        let chain = profiles.resolve_chain("work").unwrap().unwrap();
        assert_eq!(profiles.mfa_serial(&chain), None);
    }

    #[test]
    fn region_prefers_first_profile() {
        let profiles = profiles();
        let chain = profiles.resolve_chain("admin").unwrap().unwrap();
        assert_eq!(profiles.region(&chain), Some("eu-west-1"));
        let chain = profiles.resolve_chain("vaulted").unwrap().unwrap();
        assert_eq!(profiles.region(&chain), None);
    }

    #[test]
    fn applying_a_session_drops_process_and_serial() {
        let mut profile = profiles().get("vaulted").unwrap().clone();
        let session = SessionCredentials {
            access_key_id: "ASIA2".into(),
            secret_access_key: "secret".into(),
            session_token: "token".into(),
            expiration: Utc::now() + Duration::hours(1),
            region: None,
        };
        profile.apply_session(&session);
        assert_eq!(profile.credential_process, None);
        assert_eq!(profile.mfa_serial, None);
        assert_eq!(profile.aws_access_key_id.as_deref(), Some("ASIA2"));
        assert_eq!(profile.aws_session_token.as_deref(), Some("token"));
        assert_eq!(profile.expiration, Some(session.expiration));
        assert_eq!(profile.credential_source(), CredentialSource::Static);
    }

    #[test]
    fn loads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        let credentials = dir.path().join("credentials");
        std::fs::write(&config, CONFIG).unwrap();
        std::fs::write(&credentials, CREDENTIALS).unwrap();

        let profiles = Profiles::load(Some(config), Some(credentials)).unwrap();
        assert_eq!(profiles, self::profiles());

        let empty = Profiles::load(Some(dir.path().join("nope")), Some(dir.path().join("nada"))).unwrap();
        assert_eq!(empty, Profiles::default());
    }
}
