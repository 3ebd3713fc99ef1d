//! YAML configuration for a reconciliation run.
//!
//! A config file names the two source groups, the target organization, sync
//! behavior flags, the mapping-store location, and logging preferences.
//! Validation collects every problem before reporting, so operators fix a
//! broken file in one round trip.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    pub source: SourceConfig,
    pub target: TargetConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Source directory settings: which groups define desired membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    /// Group whose active members receive the base role.
    pub base_group: String,
    /// Group whose active members receive the elevated role. Membership here
    /// always wins over the base group.
    pub elevated_group: String,
}

/// Target directory settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TargetConfig {
    pub organization: String,
}

/// Sync behavior flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Preview mode: plan actions but issue no directory calls.
    #[serde(default)]
    pub dry_run: bool,
    /// Overlay suspension status from the source directory before diffing.
    #[serde(default)]
    pub ignore_suspended: bool,
    /// Aggressive removal: any target member absent from desired state is
    /// removal-eligible, tracked or not.
    #[serde(default)]
    pub remove_extra_members: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            dry_run: false,
            ignore_suspended: false,
            remove_extra_members: false,
        }
    }
}

/// Mapping-store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path to the JSON store document.
    #[serde(default)]
    pub path: PathBuf,
    /// Days a persisted record lives before it may be purged. The window is
    /// refreshed from the resolution timestamp when a record resolves.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: i64,
}

fn default_ttl_days() -> i64 {
    90
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            enabled: false,
            path: PathBuf::new(),
            ttl_days: default_ttl_days(),
        }
    }
}

/// Logging preferences, consumed by the binary's subscriber setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Ensure the configuration is complete and well-formed.
    ///
    /// All problems are collected into a single [`ConfigError::Invalid`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errs = Vec::new();

        require_email(&self.source.base_group, "source.base_group", &mut errs);
        require_email(
            &self.source.elevated_group,
            "source.elevated_group",
            &mut errs,
        );
        if self.target.organization.is_empty() {
            errs.push("target.organization is required".to_string());
        }

        if self.store.enabled {
            if self.store.path.as_os_str().is_empty() {
                errs.push("store.path is required when store is enabled".to_string());
            }
            if self.store.ttl_days <= 0 {
                errs.push("store.ttl_days must be positive".to_string());
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errs.join("; ")))
        }
    }
}

fn require_email(value: &str, field: &str, errs: &mut Vec<String>) {
    if value.is_empty() {
        errs.push(format!("{field} is required"));
        return;
    }
    if !looks_like_email(value) {
        errs.push(format!("{field} must be a valid email address"));
    }
}

/// Minimal well-formedness check: one `@`, non-empty local part, and a domain
/// containing a dot. Group addresses are plain emails in the source directory.
fn looks_like_email(value: &str) -> bool {
    let mut parts = value.splitn(2, '@');
    let local = parts.next().unwrap_or("");
    let Some(domain) = parts.next() else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
