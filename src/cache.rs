//! Session credential cache.
//!
//! Sessions are stored as JSON files named after the long-lived access key that
//! produced them, so a cached session is only ever reused for the same source
//! credentials. Staleness is decided from the embedded expiration alone; the store is
//! not locked.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

const KEY_PREFIX: &str = "aws-credentials-";

/// Cache key for sessions derived from `access_key_id`.
pub fn cache_key(access_key_id: &str) -> String {
    format!("{KEY_PREFIX}{access_key_id}")
}

/// Short-lived credentials returned by `GetSessionToken`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl SessionCredentials {
    /// Whether the session can still be used.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_key_id.is_empty()
            && !self.secret_access_key.is_empty()
            && !self.session_token.is_empty()
            && self.expiration > now
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration)
            .field("region", &self.region)
            .finish()
    }
}

/// Key-value store for cached sessions.
pub trait SessionCache: Send + Sync {
    /// Returns the record stored under `key`. Missing or unreadable records are `None`.
    fn read(&self, key: &str) -> Option<SessionCredentials>;

    fn write(&self, key: &str, session: &SessionCredentials) -> Result<()>;
}

/// Cache of JSON files in a directory, `~/.awsume/cache` by default.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir
            .or_else(|| dirs::home_dir().map(|d| d.join(".awsume").join("cache")))
            .context("Could not determine home directory")?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl SessionCache for FileCache {
    fn read(&self, key: &str) -> Option<SessionCredentials> {
        let path = self.path(key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No cached session at {}: {e}", path.display());
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(session) => Some(session),
            Err(e) => {
                debug!("Ignoring unreadable cache record {}: {e}", path.display());
                None
            }
        }
    }

    fn write(&self, key: &str, session: &SessionCredentials) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory: {}", self.dir.display()))?;
        let path = self.path(key);
        let content = serde_json::to_string_pretty(session)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write cache record: {}", path.display()))?;
        restrict_permissions(&path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to restrict permissions: {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
