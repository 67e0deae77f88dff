//! Configuration management infrastructure.
//!
//! Persists the signer's settings (active credential stores, PKCS#11 module
//! paths, timestamp authority, network timeout) as a TOML file.

use crate::domain::constants::APP_AUTHOR;
use crate::domain::types::{KeystoreKind, Secret, TimestampUrl};
use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration read by the signing core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfiguration {
    /// Credential stores consulted when listing candidates
    pub active_stores: Vec<KeystoreKind>,

    /// PKCS#11 module paths probed for hardware tokens
    pub pkcs11_library_paths: Vec<PathBuf>,

    /// Timestamp authority settings
    pub timestamp: TimestampSettings,

    /// Network timeout for TSA and CRL requests
    pub network_timeout_seconds: u64,

    /// Author string recorded as the signature creator
    pub author: String,
}

/// Timestamp authority endpoint and optional basic-auth credentials.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for TimestampSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for SignerConfiguration {
    fn default() -> Self {
        Self {
            active_stores: vec![KeystoreKind::File],
            pkcs11_library_paths: Vec::new(),
            timestamp: TimestampSettings::default(),
            network_timeout_seconds: 30,
            author: APP_AUTHOR.to_string(),
        }
    }
}

impl SignerConfiguration {
    #[must_use]
    pub fn is_store_active(&self, kind: KeystoreKind) -> bool {
        self.active_stores.contains(&kind)
    }

    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_seconds)
    }

    /// Configured TSA, or `None` when the URL is blank.
    pub fn timestamp_url(&self) -> SigningResult<Option<TimestampUrl>> {
        if self.timestamp.url.trim().is_empty() {
            return Ok(None);
        }
        TimestampUrl::new(self.timestamp.url.trim()).map(Some)
    }

    /// Basic-auth pair when a username is configured.
    #[must_use]
    pub fn timestamp_credentials(&self) -> Option<(String, Secret)> {
        let user = self.timestamp.username.as_deref()?.trim();
        if user.is_empty() {
            return None;
        }
        let password = self.timestamp.password.as_deref().unwrap_or_default();
        Some((user.to_string(), Secret::from(password)))
    }
}

/// Configuration manager for handling config files
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new configuration manager with default path
    pub fn new() -> SigningResult<Self> {
        let config_path = Self::default_config_path()?;
        Ok(Self { config_path })
    }

    /// Create a configuration manager with custom path
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            config_path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> SigningResult<PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Ok(config_dir.join("pdf-signer").join("config.toml"))
        } else {
            Ok(PathBuf::from("pdf-signer-config.toml"))
        }
    }

    /// Load configuration from file, creating default if it doesn't exist
    pub fn load_or_create_default(&self) -> SigningResult<SignerConfiguration> {
        if self.config_path.exists() {
            self.load()
        } else {
            log::info!(
                "Configuration file not found, creating default: {}",
                self.config_path.display()
            );
            let default_config = SignerConfiguration::default();
            self.save(&default_config)?;
            Ok(default_config)
        }
    }

    /// Load configuration from file
    pub fn load(&self) -> SigningResult<SignerConfiguration> {
        log::info!("Loading configuration from: {}", self.config_path.display());

        let content = fs::read_to_string(&self.config_path).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to read config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        let config: SignerConfiguration = toml::from_str(&content).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to parse config file: {e}"))
        })?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, config: &SignerConfiguration) -> SigningResult<()> {
        log::info!("Saving configuration to: {}", self.config_path.display());

        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                SigningError::ConfigurationError(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| {
            SigningError::ConfigurationError(format!("Failed to serialize config: {e}"))
        })?;

        fs::write(&self.config_path, content).map_err(|e| {
            SigningError::ConfigurationError(format!(
                "Failed to write config file {}: {}",
                self.config_path.display(),
                e
            ))
        })?;

        Ok(())
    }

    /// Update a specific configuration value
    pub fn update_value(&self, key: &str, value: &str) -> SigningResult<()> {
        let mut config = self.load_or_create_default()?;

        match key {
            "active_stores" => {
                config.active_stores = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::parse::<KeystoreKind>)
                    .collect::<SigningResult<Vec<_>>>()?;
            }
            "pkcs11_library_paths" => {
                config.pkcs11_library_paths = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect();
            }
            "timestamp.url" => {
                if !value.trim().is_empty() {
                    TimestampUrl::new(value.trim())?;
                }
                config.timestamp.url = value.trim().to_string();
            }
            "timestamp.username" => {
                config.timestamp.username = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            "timestamp.password" => {
                config.timestamp.password = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            "network_timeout_seconds" => {
                config.network_timeout_seconds = value.parse().map_err(|_| {
                    SigningError::ConfigurationError(format!("Invalid timeout value: {value}"))
                })?;
            }
            "author" => {
                config.author = value.to_string();
            }
            _ => {
                return Err(SigningError::ConfigurationError(format!(
                    "Unknown configuration key: {key}"
                )));
            }
        }

        validate_config(&config)?;
        self.save(&config)
    }

    /// Get the configuration file path
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Export configuration as a portable format
    pub fn export_config(&self, format: ExportFormat) -> SigningResult<String> {
        let config = self.load()?;

        match format {
            ExportFormat::Toml => toml::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("TOML export failed: {e}"))),
            ExportFormat::Json => serde_json::to_string_pretty(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("JSON export failed: {e}"))),
            ExportFormat::Yaml => serde_yaml::to_string(&config)
                .map_err(|e| SigningError::ConfigurationError(format!("YAML export failed: {e}"))),
        }
    }

    /// Import configuration from a string
    pub fn import_config(&self, content: &str, format: ExportFormat) -> SigningResult<()> {
        let config: SignerConfiguration = match format {
            ExportFormat::Toml => toml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("TOML import failed: {e}"))
            })?,
            ExportFormat::Json => serde_json::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("JSON import failed: {e}"))
            })?,
            ExportFormat::Yaml => serde_yaml::from_str(content).map_err(|e| {
                SigningError::ConfigurationError(format!("YAML import failed: {e}"))
            })?,
        };

        validate_config(&config)?;
        self.save(&config)
    }
}

/// Validate configuration values
pub fn validate_config(config: &SignerConfiguration) -> SigningResult<()> {
    config.timestamp_url()?;

    if config.network_timeout_seconds == 0 {
        return Err(SigningError::ConfigurationError(
            "Network timeout must be greater than 0".to_string(),
        ));
    }

    if config.active_stores.contains(&KeystoreKind::HardwareToken)
        && config.pkcs11_library_paths.is_empty()
    {
        log::warn!("Hardware token store is active but no PKCS#11 library paths are configured");
    }

    Ok(())
}

/// Configuration export/import formats
#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    Toml,
    Json,
    Yaml,
}
