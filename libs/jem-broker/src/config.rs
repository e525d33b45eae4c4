// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Broker configuration.
//!
//! Values are resolved in order:
//! 1. Built-in defaults
//! 2. A TOML file (when one is given)
//! 3. `JEM_DEVICE_NAME` / `JEM_MAX_ENTRIES` environment variables

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BrokerError, Result};

/// Device and registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Name the device node is registered under.
    pub device_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    /// Upper bound on registry entries. `None` leaves the registry unbounded.
    pub max_entries: Option<usize>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            device_name: "jem".to_string(),
            version_major: 0,
            version_minor: 0,
            max_entries: None,
        }
    }
}

impl BrokerConfig {
    /// Environment variable overriding [`device_name`](Self::device_name).
    pub const ENV_DEVICE_NAME: &'static str = "JEM_DEVICE_NAME";

    /// Environment variable overriding [`max_entries`](Self::max_entries).
    /// `0`, `none` and `unbounded` clear the limit.
    pub const ENV_MAX_ENTRIES: &'static str = "JEM_MAX_ENTRIES";

    /// Parse a TOML document. Missing fields keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| BrokerError::Configuration(format!("invalid broker config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Resolve the full configuration: defaults, optional file, then environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.with_env_overrides()
    }

    /// Apply `JEM_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(name) = std::env::var(Self::ENV_DEVICE_NAME) {
            self.device_name = name;
        }

        if let Ok(value) = std::env::var(Self::ENV_MAX_ENTRIES) {
            self.max_entries = parse_max_entries(&value)?;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.device_name.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "device_name must not be empty".into(),
            ));
        }
        if self.max_entries == Some(0) {
            return Err(BrokerError::Configuration(
                "max_entries must be at least 1 (omit it for no limit)".into(),
            ));
        }
        Ok(())
    }
}

fn parse_max_entries(value: &str) -> Result<Option<usize>> {
    match value.trim().to_lowercase().as_str() {
        "" | "0" | "none" | "unbounded" => Ok(None),
        other => other.parse().map(Some).map_err(|_| {
            BrokerError::Configuration(format!(
                "{} must be a positive integer, got '{}'",
                BrokerConfig::ENV_MAX_ENTRIES,
                value
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        // SAFETY: every test touching JEM_* runs under #[serial].
        unsafe {
            std::env::remove_var(BrokerConfig::ENV_DEVICE_NAME);
            std::env::remove_var(BrokerConfig::ENV_MAX_ENTRIES);
        }
    }

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.device_name, "jem");
        assert_eq!(config.version_major, 0);
        assert_eq!(config.max_entries, None);
    }

    #[test]
    fn test_partial_toml() {
        let config = BrokerConfig::from_toml_str("max_entries = 64\n").unwrap();
        assert_eq!(config.device_name, "jem");
        assert_eq!(config.max_entries, Some(64));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            BrokerConfig::from_toml_str("max_entries = \"lots\""),
            Err(BrokerError::Configuration(_))
        ));
        assert!(matches!(
            BrokerConfig::from_toml_str("unknown_key = 1"),
            Err(BrokerError::Configuration(_))
        ));
        assert!(matches!(
            BrokerConfig::from_toml_str("max_entries = 0"),
            Err(BrokerError::Configuration(_))
        ));
        assert!(matches!(
            BrokerConfig::from_toml_str("device_name = \"\""),
            Err(BrokerError::Configuration(_))
        ));
    }

    #[test]
    #[serial]
    fn test_load_file_then_env() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jem.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "device_name = \"jem-test\"").unwrap();
        writeln!(file, "version_minor = 2").unwrap();
        drop(file);

        let config = BrokerConfig::resolve(Some(path.as_path())).unwrap();
        assert_eq!(config.device_name, "jem-test");
        assert_eq!(config.version_minor, 2);

        // SAFETY: serialized with the other env tests.
        unsafe {
            std::env::set_var(BrokerConfig::ENV_DEVICE_NAME, "jem-env");
            std::env::set_var(BrokerConfig::ENV_MAX_ENTRIES, "8");
        }
        let config = BrokerConfig::resolve(Some(path.as_path())).unwrap();
        assert_eq!(config.device_name, "jem-env");
        assert_eq!(config.max_entries, Some(8));
        assert_eq!(config.version_minor, 2);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_max_entries_parsing() {
        clear_env();
        // SAFETY: serialized with the other env tests.
        unsafe { std::env::set_var(BrokerConfig::ENV_MAX_ENTRIES, "unbounded") };
        let config = BrokerConfig {
            max_entries: Some(4),
            ..BrokerConfig::default()
        }
        .with_env_overrides()
        .unwrap();
        assert_eq!(config.max_entries, None);

        // SAFETY: serialized with the other env tests.
        unsafe { std::env::set_var(BrokerConfig::ENV_MAX_ENTRIES, "many") };
        assert!(matches!(
            BrokerConfig::default().with_env_overrides(),
            Err(BrokerError::Configuration(_))
        ));
        clear_env();
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BrokerConfig::load(dir.path().join("absent.toml")),
            Err(BrokerError::Io(_))
        ));
    }
}
