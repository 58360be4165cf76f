//! # Courier Configuration
//!
//! Configuration management for the delivery engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Defaults (lowest)                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. courier.toml (platform config dir, or explicit path)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  3. Environment variables (highest)                                    │
//! │     COURIER_RECORD_API_URL, COURIER_EXCHANGE_URL, COURIER_STUDY_ID,    │
//! │     COURIER_ENVELOPE_KEY, COURIER_DATA_DIR,                            │
//! │     COURIER_REQUEST_TIMEOUT_SECS                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate()                                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # courier.toml
//! [record_api]
//! base_url = "https://records.example.org/api/"
//! request_timeout_secs = 30
//!
//! [exchange]
//! base_url = "https://exchange.example.org"
//! study_id = "pilot-2024"
//! envelope_key = "base64 of 32 bytes"   # optional
//!
//! [storage]
//! data_dir = "/var/mobile/.../courier"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::envelope::EnvelopeKey;
use crate::error::{SyncError, SyncResult};

const CONFIG_FILE_NAME: &str = "courier.toml";
const QUEUE_DB_FILE_NAME: &str = "queue.db";
const IDENTIFIER_MAP_FILE_NAME: &str = "identifiers.json";

// =============================================================================
// Record API Settings
// =============================================================================

/// Where records are submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordApiSettings {
    /// Record import endpoint. Records are POSTed to this URL as-is.
    #[serde(default = "default_record_api_url")]
    pub base_url: String,

    /// Per-request timeout (seconds). Applies to exchange calls too.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_record_api_url() -> String {
    "http://127.0.0.1/api/".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for RecordApiSettings {
    fn default() -> Self {
        RecordApiSettings {
            base_url: default_record_api_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Exchange Settings
// =============================================================================

/// Credential-exchange service settings.
///
/// Absent when credentials are provisioned some other way; the coordinator
/// then cannot refresh or enroll.
#[derive(Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub base_url: String,
    pub study_id: String,

    /// Base64 of the 32-byte key that opens API token envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_key: Option<String>,
}

impl std::fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("base_url", &self.base_url)
            .field("study_id", &self.study_id)
            .field("envelope_key", &self.envelope_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ExchangeSettings {
    /// Decodes the configured envelope key, if any.
    pub fn envelope_key(&self) -> SyncResult<Option<EnvelopeKey>> {
        self.envelope_key
            .as_deref()
            .map(EnvelopeKey::from_base64)
            .transpose()
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// On-device storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "courier", "courier")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("courier-data"))
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageSettings {
    pub fn queue_db_path(&self) -> PathBuf {
        self.data_dir.join(QUEUE_DB_FILE_NAME)
    }

    pub fn identifier_map_path(&self) -> PathBuf {
        self.data_dir.join(IDENTIFIER_MAP_FILE_NAME)
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete Courier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub record_api: RecordApiSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<ExchangeSettings>,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl CourierConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (courier.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading courier config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load courier config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Courier config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        validate_http_url("record_api.base_url", &self.record_api.base_url)?;

        if self.record_api.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if let Some(ref exchange) = self.exchange {
            validate_http_url("exchange.base_url", &exchange.base_url)?;

            if exchange.study_id.trim().is_empty() {
                return Err(SyncError::InvalidConfig(
                    "exchange.study_id must not be empty".into(),
                ));
            }

            exchange.envelope_key()?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("COURIER_RECORD_API_URL") {
            debug!(url = %url, "Overriding record API URL from environment");
            self.record_api.base_url = url;
        }

        if let Ok(timeout) = std::env::var("COURIER_REQUEST_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.record_api.request_timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "Ignoring invalid COURIER_REQUEST_TIMEOUT_SECS"),
            }
        }

        if let Ok(dir) = std::env::var("COURIER_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }

        let exchange_url = std::env::var("COURIER_EXCHANGE_URL").ok();
        let study_id = std::env::var("COURIER_STUDY_ID").ok();
        let envelope_key = std::env::var("COURIER_ENVELOPE_KEY").ok();

        if exchange_url.is_none() && study_id.is_none() && envelope_key.is_none() {
            return;
        }

        let exchange = self.exchange.get_or_insert_with(|| ExchangeSettings {
            base_url: String::new(),
            study_id: String::new(),
            envelope_key: None,
        });
        if let Some(url) = exchange_url {
            debug!(url = %url, "Overriding exchange URL from environment");
            exchange.base_url = url;
        }
        if let Some(id) = study_id {
            exchange.study_id = id;
        }
        if let Some(key) = envelope_key {
            exchange.envelope_key = Some(key);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "courier", "courier")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.record_api.request_timeout_secs)
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.storage.queue_db_path()
    }

    pub fn identifier_map_path(&self) -> PathBuf {
        self.storage.identifier_map_path()
    }
}

fn validate_http_url(field: &str, value: &str) -> SyncResult<()> {
    let url = url::Url::parse(value)
        .map_err(|e| SyncError::InvalidUrl(format!("{field}: {e}")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SyncError::InvalidUrl(format!(
            "{field} must start with http:// or https://, got: {value}"
        )));
    }
    Ok(())
}
