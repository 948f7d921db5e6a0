//! Plugin configuration and vault item lookup.
//!
//! The plugin reads the `1password` subsection of an awsume-style YAML config file:
//!
//! ```yaml
//! # one item shared by every MFA device
//! 1password: "AWS MFA"
//!
//! # or one item per MFA device
//! 1password:
//!   arn:aws:iam::123456789012:mfa/alice: "AWS (work)"
//!   arn:aws:iam::210987654321:mfa/alice: "AWS (personal)"
//! ```
//!
//! The shape is decided once at load time; anything that is neither a string nor a
//! string-to-string mapping is reported and treated as unconfigured.

use std::{collections::BTreeMap, fs, path::PathBuf};

use anyhow::{Context, Result, ensure};
use log::{debug, error};
use serde_yaml::Value;

/// Name of the plugin's subsection in the config file.
pub const SECTION: &str = "1password";

/// Mapping from MFA device serial to the 1Password item holding its TOTP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VaultItems {
    /// No subsection, or a malformed one.
    #[default]
    Absent,
    /// One item used for every MFA serial.
    SingleItem(String),
    /// Item per MFA serial.
    PerSerial(BTreeMap<String, String>),
}

impl VaultItems {
    /// Classifies the raw subsection value.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::String(item)) if item.is_empty() => Self::Absent,
            Some(Value::String(item)) => Self::SingleItem(item.clone()),
            Some(Value::Mapping(mapping)) => {
                let mut items = BTreeMap::new();
                for (serial, item) in mapping {
                    match (serial.as_str(), item.as_str()) {
                        (Some(serial), Some(item)) if !item.is_empty() => {
                            items.insert(serial.to_owned(), item.to_owned());
                        }
                        _ => error!("Malformed `{SECTION}` entry ignored: {serial:?} => {item:?}"),
                    }
                }
                Self::PerSerial(items)
            }
            Some(other) => {
                error!("Malformed `{SECTION}` config subsection: expected a string or a mapping, got {other:?}");
                Self::Absent
            }
        }
    }

    /// Returns the vault item for `mfa_serial`, if one is configured.
    ///
    /// `None` means MFA is required but nothing is wired up to supply the code, so
    /// the caller falls back to interactive entry.
    pub fn resolve(&self, mfa_serial: &str) -> Option<&str> {
        match self {
            Self::Absent => {
                debug!("No `{SECTION}` config subsection");
                None
            }
            Self::SingleItem(item) => Some(item),
            Self::PerSerial(items) => {
                let item = items.get(mfa_serial).map(String::as_str);
                if item.is_none() {
                    debug!("No vault item specified for {mfa_serial}");
                }
                item
            }
        }
    }
}

/// Merged plugin configuration handed to the hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginConfig {
    pub vault_items: VaultItems,
}

impl PluginConfig {
    /// Loads the plugin config from `path`, or from `~/.awsume/config.yaml`.
    ///
    /// A missing default file yields an empty config; an explicitly given path must exist.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => {
                ensure!(path.exists(), "Config file not found: {}", path.display());
                path
            }
            None => match dirs::home_dir().map(|d| d.join(".awsume").join("config.yaml")) {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No plugin config file");
                    return Ok(Self::default());
                }
            },
        };

        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Ok(Self {
            vault_items: VaultItems::from_value(value.get(SECTION)),
        })
    }
}
