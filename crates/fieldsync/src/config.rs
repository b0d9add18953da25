//! Configuration management for fieldsync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::notice::NoticeLevel;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "fieldsync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "fieldsync.db";

/// Default directory (under the config dir) holding form definition files.
const FORMS_DIR_NAME: &str = "forms";

/// Endpoint value shipped in templates before a deployment fills it in.
pub const ENDPOINT_PLACEHOLDER: &str = "YOUR_GOOGLE_APPS_SCRIPT_WEB_APP_URL_HERE";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FIELDSYNC_`, sections split on `__`)
/// 2. TOML config file at `~/.config/fieldsync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Sync endpoint configuration.
    pub sync: SyncConfig,
    /// Form catalog configuration.
    pub forms: FormsConfig,
    /// Notice display configuration.
    pub notices: NoticeConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/fieldsync/fieldsync.db`
    pub database_path: Option<PathBuf>,
}

/// Sync-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// URL of the batch submission endpoint.
    pub endpoint: Option<String>,
}

/// Form catalog configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormsConfig {
    /// Directory that relative form files are resolved against.
    /// Defaults to `~/.config/fieldsync/forms`
    pub base_dir: Option<PathBuf>,
    /// Known forms, in navigation order.
    pub catalog: Vec<FormEntry>,
}

/// One form known to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormEntry {
    /// Catalog key, also the navigation identifier.
    pub key: String,
    /// Display title.
    pub title: String,
    /// File path (relative to `base_dir`) or `http(s)` URL of the definition.
    pub file: String,
    /// Remote sheet the records land in.
    pub sheet_name: String,
}

/// Notice display configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeConfig {
    /// How long info and success notices stay visible, in milliseconds.
    pub info_ms: u64,
    /// How long warning and error notices stay visible, in milliseconds.
    pub alert_ms: u64,
}

impl Default for FormsConfig {
    fn default() -> Self {
        Self {
            base_dir: None, // Will be resolved to default at runtime
            catalog: default_catalog(),
        }
    }
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            info_ms: 4_000,
            alert_ms: 6_000,
        }
    }
}

impl FormEntry {
    /// Create a catalog entry.
    #[must_use]
    pub fn new(key: &str, title: &str, file: &str, sheet_name: &str) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            file: file.to_string(),
            sheet_name: sheet_name.to_string(),
        }
    }
}

/// Default form catalog.
fn default_catalog() -> Vec<FormEntry> {
    vec![
        FormEntry::new("health", "Health", "healthForm.json", "Health"),
        FormEntry::new("wash", "WASH", "washForm.json", "WASH"),
        FormEntry::new("gbv", "GBV", "gbvForm.json", "GBV"),
        FormEntry::new("nutrition", "Nutrition", "nutritionForm.json", "Nutrition"),
        FormEntry::new("finance", "Finance", "financeForm.json", "Finance"),
        FormEntry::new("hr", "HR", "hrForm.json", "HR"),
        FormEntry::new("audit", "Audit", "auditForm.json", "Audit"),
        FormEntry::new("logistics", "Logistics", "logisticsForm.json", "Logistics"),
        FormEntry::new(
            "childProtection",
            "Child Protection",
            "childProtectionForm.json",
            "ChildProtection",
        ),
        FormEntry::new("fsl", "FSL", "fslForm.json", "FSL"),
        FormEntry::new("it", "IT", "itForm.json", "IT"),
        FormEntry::new("mne", "M&E", "mneForm.json", "MNE"),
        FormEntry::new("general", "General", "generalForm.json", "General"),
    ]
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("FIELDSYNC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration directory.
    #[must_use]
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = self.endpoint() {
            if !is_http_url(endpoint) {
                return Err(Error::ConfigValidation {
                    message: format!("sync endpoint must be an http(s) URL: {endpoint}"),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.forms.catalog {
            if entry.key.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "form catalog entries need a non-empty key".to_string(),
                });
            }
            if entry.file.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: format!("form '{}' has no definition file", entry.key),
                });
            }
            if !seen.insert(entry.key.as_str()) {
                return Err(Error::ConfigValidation {
                    message: format!("duplicate form key in catalog: {}", entry.key),
                });
            }
        }

        if self.notices.info_ms == 0 || self.notices.alert_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "notice durations must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the configured sync endpoint.
    ///
    /// Returns `None` when it is unset, blank, or still the template placeholder.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.sync
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty() && !url.contains(ENDPOINT_PLACEHOLDER))
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the forms directory, resolving defaults if not set.
    #[must_use]
    pub fn forms_dir(&self) -> PathBuf {
        self.forms
            .base_dir
            .clone()
            .unwrap_or_else(|| Self::default_config_dir().join(FORMS_DIR_NAME))
    }

    /// Look up a catalog entry by key.
    #[must_use]
    pub fn form_entry(&self, key: &str) -> Option<&FormEntry> {
        self.forms.catalog.iter().find(|entry| entry.key == key)
    }

    /// How long a notice of `level` stays visible before it is dismissed.
    #[must_use]
    pub fn notice_duration(&self, level: NoticeLevel) -> Duration {
        if level.is_alert() {
            Duration::from_millis(self.notices.alert_ms)
        } else {
            Duration::from_millis(self.notices.info_ms)
        }
    }
}

/// Whether a string looks like an `http(s)` URL.
pub(crate) fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
