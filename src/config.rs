//! Configuration module for vmcrypt
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/vmcrypt/vmcrypt.toml)
//! - User configuration (~/.vmcrypt.toml)
//! - Project configuration (./vmcrypt.toml)
//! - Environment variables
//! - Command-line arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::resources::ModuleCatalog;

/// Subscription id used in simulated resource ids when none is configured.
pub const PLACEHOLDER_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default settings
    pub defaults: Defaults,

    /// Resource name prefixes
    pub naming: NamingConfig,

    /// Module source overrides per resource kind
    pub modules: ModuleCatalog,

    /// Colors and output settings
    pub colors: ColorsConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Default configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Location used when parameters do not set one
    pub location: Option<String>,

    /// Subscription the simulated provisioner builds resource ids under
    pub subscription_id: String,

    /// Output format: human, json or yaml
    pub output: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            location: None,
            subscription_id: PLACEHOLDER_SUBSCRIPTION_ID.to_string(),
            output: "human".to_string(),
        }
    }
}

/// Resource name prefixes. A name is `<prefix><separator><root>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub resource_group: String,
    pub key_vault: String,
    pub identity: String,
    pub disk_encryption_set: String,
    pub separator: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            resource_group: "rg".to_string(),
            key_vault: "kv".to_string(),
            identity: "uami".to_string(),
            disk_encryption_set: "des".to_string(),
            separator: "-".to_string(),
        }
    }
}

impl NamingConfig {
    fn compose(&self, prefix: &str, root: &str) -> String {
        if prefix.is_empty() {
            root.to_string()
        } else {
            format!("{}{}{}", prefix, self.separator, root)
        }
    }

    pub fn resource_group(&self, root: &str) -> String {
        self.compose(&self.resource_group, root)
    }

    pub fn key_vault(&self, root: &str) -> String {
        self.compose(&self.key_vault, root)
    }

    pub fn identity(&self, root: &str) -> String {
        self.compose(&self.identity, root)
    }

    pub fn disk_encryption_set(&self, root: &str) -> String {
        self.compose(&self.disk_encryption_set, root)
    }
}

/// Colors and output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    /// Enable colors
    pub enabled: bool,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, or any `EnvFilter` directive
    pub level: String,

    /// Log format: text or json
    pub format: String,

    /// Log timestamp
    pub timestamp: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
            timestamp: false,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::default();

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config file");
                config = config.merge_from_file(&path)?;
            } else if config_path == Some(&path) {
                return Err(Error::FileNotFound(path).into());
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }

        if let Ok(env_config) = std::env::var("VMCRYPT_CONFIG") {
            return vec![PathBuf::from(env_config)];
        }

        let mut paths = vec![PathBuf::from("/etc/vmcrypt/vmcrypt.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".vmcrypt.toml"));
        }

        paths.push(PathBuf::from("vmcrypt.toml"));
        paths
    }

    /// Merge configuration from a file
    fn merge_from_file(&self, path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let file_config: Config = match extension {
            "yml" | "yaml" => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        Ok(self.merge(file_config))
    }

    /// Merge another config into this one. Values in `other` that differ
    /// from the defaults take precedence.
    fn merge(&self, other: Config) -> Config {
        let defaults = Defaults::default();
        let naming = NamingConfig::default();
        let logging = LoggingConfig::default();

        let pick = |theirs: String, ours: &String, default: &String| {
            if &theirs != default {
                theirs
            } else {
                ours.clone()
            }
        };

        Config {
            defaults: Defaults {
                location: other
                    .defaults
                    .location
                    .or_else(|| self.defaults.location.clone()),
                subscription_id: pick(
                    other.defaults.subscription_id,
                    &self.defaults.subscription_id,
                    &defaults.subscription_id,
                ),
                output: pick(other.defaults.output, &self.defaults.output, &defaults.output),
            },
            naming: NamingConfig {
                resource_group: pick(
                    other.naming.resource_group,
                    &self.naming.resource_group,
                    &naming.resource_group,
                ),
                key_vault: pick(other.naming.key_vault, &self.naming.key_vault, &naming.key_vault),
                identity: pick(other.naming.identity, &self.naming.identity, &naming.identity),
                disk_encryption_set: pick(
                    other.naming.disk_encryption_set,
                    &self.naming.disk_encryption_set,
                    &naming.disk_encryption_set,
                ),
                separator: pick(other.naming.separator, &self.naming.separator, &naming.separator),
            },
            modules: {
                let mut modules = self.modules.clone();
                modules.overrides.extend(other.modules.overrides);
                modules
            },
            colors: ColorsConfig {
                enabled: self.colors.enabled && other.colors.enabled,
            },
            logging: LoggingConfig {
                level: pick(other.logging.level, &self.logging.level, &logging.level),
                format: pick(other.logging.format, &self.logging.format, &logging.format),
                timestamp: self.logging.timestamp || other.logging.timestamp,
            },
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // VMCRYPT_LOCATION
        if let Ok(location) = std::env::var("VMCRYPT_LOCATION") {
            self.defaults.location = Some(location);
        }

        // VMCRYPT_SUBSCRIPTION_ID
        if let Ok(id) = std::env::var("VMCRYPT_SUBSCRIPTION_ID") {
            self.defaults.subscription_id = id;
        }

        // VMCRYPT_OUTPUT
        if let Ok(output) = std::env::var("VMCRYPT_OUTPUT") {
            self.defaults.output = output;
        }

        // VMCRYPT_LOG_LEVEL
        if let Ok(level) = std::env::var("VMCRYPT_LOG_LEVEL") {
            self.logging.level = level;
        }

        // VMCRYPT_LOG_FORMAT
        if let Ok(format) = std::env::var("VMCRYPT_LOG_FORMAT") {
            self.logging.format = format;
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() || std::env::var("VMCRYPT_NO_COLOR").is_ok() {
            self.colors.enabled = false;
        }
    }

    /// Reject values no command can act on
    pub fn validate(&self) -> Result<(), Error> {
        if !matches!(self.defaults.output.as_str(), "human" | "json" | "yaml") {
            return Err(Error::invalid_config(
                "defaults.output",
                format!("'{}' is not one of human, json, yaml", self.defaults.output),
            ));
        }
        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(Error::invalid_config(
                "logging.format",
                format!("'{}' is not one of text, json", self.logging.format),
            ));
        }
        if self.defaults.subscription_id.trim().is_empty() {
            return Err(Error::invalid_config(
                "defaults.subscription_id",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Load from a specific file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Config::default().merge_from_file(path.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ModuleSource, ResourceKind};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.defaults.subscription_id, PLACEHOLDER_SUBSCRIPTION_ID);
        assert_eq!(config.defaults.output, "human");
        assert_eq!(config.naming.key_vault("vmSse"), "kv-vmSse");
        assert_eq!(config.naming.resource_group("vmAde"), "rg-vmAde");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_merge() {
        let base = Config {
            defaults: Defaults {
                location: Some("westeurope".to_string()),
                ..Defaults::default()
            },
            ..Config::default()
        };
        let other = Config {
            naming: NamingConfig {
                key_vault: "vault".to_string(),
                ..NamingConfig::default()
            },
            modules: ModuleCatalog::default().with_override(
                ResourceKind::KeyVault,
                ModuleSource::new("br/public:avm/res/key-vault/vault", "0.12.0"),
            ),
            ..Config::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.defaults.location.as_deref(), Some("westeurope"));
        assert_eq!(merged.naming.key_vault("x"), "vault-x");
        assert_eq!(merged.naming.identity("x"), "uami-x");
        assert_eq!(merged.modules.source(ResourceKind::KeyVault).version, "0.12.0");
    }

    #[test]
    fn test_empty_prefix() {
        let naming = NamingConfig {
            disk_encryption_set: String::new(),
            ..NamingConfig::default()
        };
        assert_eq!(naming.disk_encryption_set("vmSse"), "vmSse");
    }

    #[test]
    fn test_validate_rejects_unknown_output() {
        let config = Config {
            defaults: Defaults {
                output: "xml".to_string(),
                ..Defaults::default()
            },
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { key, .. }) if key == "defaults.output"
        ));
    }
}
