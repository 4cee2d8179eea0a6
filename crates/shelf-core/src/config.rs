use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ShelfError};
use crate::types::{SearchMode, SortOrder};

/// Top-level configuration for a Shelf library.
///
/// Loaded from `~/.shelf/config.toml` by default. Every section falls back to
/// its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShelfConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub feeds: FeedConfig,
}

impl ShelfConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ShelfConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing or
    /// cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ShelfError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General library settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Library directory holding the store files. `~/` is expanded.
    pub library_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            library_dir: "~/.shelf/library".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    /// Resolve `library_dir` to an absolute path, expanding a leading `~`.
    pub fn resolve_library_dir(&self) -> PathBuf {
        expand_home(&self.library_dir)
    }
}

/// Cloud synchronization settings.
///
/// Sync is only attempted when `enabled` is set and a secret is stored under
/// `credential_key` in the credential provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Account email passed to the cloud login.
    pub email: String,
    /// Key used to look up the account secret.
    pub credential_key: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            email: String::new(),
            credential_key: "shelf-sync".to_string(),
        }
    }
}

/// Search defaults used when the caller leaves them unspecified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_mode: SearchMode,
    /// Column the paper list is sorted by.
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_mode: SearchMode::General,
            sort_by: "add_time".to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

/// Feed article retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Read articles strictly older than this are purged.
    pub read_retention_days: u32,
    /// Unread articles strictly older than this are purged.
    pub unread_retention_days: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            read_retention_days: 3,
            unread_retention_days: 30,
        }
    }
}

/// Expand `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}
