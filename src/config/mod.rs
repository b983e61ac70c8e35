//! Configuration module
//!
//! Loads a JSON configuration file, exposes named sub-sections to other
//! modules as typed settings, and keeps a flat string view of every scalar
//! with environment-variable overrides.
//!
//! # Example
//!
//! ```rust
//! use serde::Deserialize;
//! use tessera::config::ConfigModule;
//!
//! #[derive(Deserialize)]
//! struct Cache {
//!     capacity: usize,
//! }
//!
//! let config = ConfigModule::new();
//! config.load_str(r#"{ "modules": { "Cache": { "capacity": 64 } } }"#).unwrap();
//!
//! let cache: Cache = config.load_section("modules.Cache").unwrap();
//! assert_eq!(cache.capacity, 64);
//! assert_eq!(config.get("modules.Cache.capacity").as_deref(), Some("64"));
//! ```

mod providers;

pub use providers::{ProviderFn, Providers};

use crate::context::SharedContext;
use crate::error::BoxError;
use crate::module::Module;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No configuration has been loaded")]
    NotLoaded,

    #[error("Config section '{0}' not found")]
    MissingSection(String),

    #[error("Invalid config section '{section}': {source}")]
    Invalid {
        section: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown provider '{tag}' (known: {known})")]
    UnknownProvider { tag: String, known: String },

    #[error("Provider entry has no '{0}' field")]
    MissingProviderTag(String),

    #[error("Provider '{tag}' failed: {message}")]
    Provider { tag: String, message: String },
}

/// Configuration service
#[derive(Default)]
pub struct ConfigModule {
    path: Option<PathBuf>,
    env_prefix: Option<String>,
    document: RwLock<Option<Arc<Value>>>,
    settings: Arc<DashMap<String, String>>,
}

impl ConfigModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// File loaded when the module starts.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Prefix of environment variables that override flat settings.
    ///
    /// With prefix `APP`, `APP_SERVER__PORT=9000` sets `server.port`.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load (or reload) the whole configuration from a JSON file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let document = read_document(path.as_ref())?;
        self.install(document);
        Ok(())
    }

    /// Load (or reload) the whole configuration from JSON text.
    pub fn load_str(&self, json: &str) -> Result<(), ConfigError> {
        self.install(serde_json::from_str(json)?);
        Ok(())
    }

    fn install(&self, document: Value) {
        self.settings.clear();
        flatten("", &document, &self.settings);
        self.apply_env_overrides();
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(document));
    }

    fn apply_env_overrides(&self) {
        let Some(prefix) = self.env_prefix.as_deref() else {
            return;
        };
        let prefix = format!("{}_", prefix);
        for (key, value) in env::vars() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let key = rest.to_lowercase().replace("__", ".");
                tracing::debug!(key = %key, "Config value overridden from environment");
                self.settings.insert(key, value);
            }
        }
    }

    /// The raw JSON value at a dotted `section` path, e.g. `modules.Logger`.
    pub fn section(&self, section: &str) -> Result<Value, ConfigError> {
        let document = self
            .document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ConfigError::NotLoaded)?;
        find_section(&document, section).cloned()
    }

    /// Deserialize a dotted `section` path into a settings type.
    pub fn load_section<T: DeserializeOwned>(&self, section: &str) -> Result<T, ConfigError> {
        deserialize_section(self.section(section)?, section)
    }

    /// Whether a dotted `section` exists in the loaded configuration.
    pub fn has_section(&self, section: &str) -> bool {
        self.section(section).is_ok()
    }

    /// Read a section of a file without loading the file into this module.
    pub fn read_file_section<T: DeserializeOwned>(
        path: impl AsRef<Path>,
        section: &str,
    ) -> Result<T, ConfigError> {
        let document = read_document(path.as_ref())?;
        deserialize_section(find_section(&document, section)?.clone(), section)
    }

    /// A flat setting, e.g. `get("server.port")`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.settings.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.settings.insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl Module for ConfigModule {
    async fn start(&self, _ctx: &SharedContext) -> Result<(), BoxError> {
        match &self.path {
            Some(path) => {
                self.load_file(path)?;
                tracing::info!(path = %path.display(), settings = self.settings.len(), "Configuration loaded");
            }
            None => {
                self.apply_env_overrides();
                tracing::debug!("No configuration file set");
            }
        }
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn find_section<'a>(document: &'a Value, section: &str) -> Result<&'a Value, ConfigError> {
    section
        .split('.')
        .filter(|part| !part.is_empty())
        .try_fold(document, |value, part| value.get(part))
        .ok_or_else(|| ConfigError::MissingSection(section.to_string()))
}

fn deserialize_section<T: DeserializeOwned>(value: Value, section: &str) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|source| ConfigError::Invalid {
        section: section.to_string(),
        source,
    })
}

fn flatten(prefix: &str, value: &Value, into: &DashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&key, child, into);
            }
        }
        Value::String(text) => {
            into.insert(prefix.to_string(), text.clone());
        }
        Value::Null => {}
        other => {
            into.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    const DOCUMENT: &str = r#"{
        "server": { "port": 8080, "host": "localhost" },
        "modules": { "Cache": { "capacity": 16, "eager": true } }
    }"#;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Cache {
        capacity: usize,
        eager: bool,
    }

    #[test]
    fn test_load_section() {
        let config = ConfigModule::new();
        config.load_str(DOCUMENT).unwrap();

        let cache: Cache = config.load_section("modules.Cache").unwrap();
        assert_eq!(
            cache,
            Cache {
                capacity: 16,
                eager: true
            }
        );
        assert!(config.has_section("server"));
    }

    #[test]
    fn test_missing_and_invalid_sections() {
        let config = ConfigModule::new();
        assert!(matches!(
            config.section("server"),
            Err(ConfigError::NotLoaded)
        ));

        config.load_str(DOCUMENT).unwrap();
        assert!(matches!(
            config.section("modules.Logger"),
            Err(ConfigError::MissingSection(_))
        ));
        assert!(matches!(
            config.load_section::<Cache>("server"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_flat_settings() {
        let config = ConfigModule::new();
        config.load_str(DOCUMENT).unwrap();

        assert_eq!(config.get("server.port").as_deref(), Some("8080"));
        assert_eq!(config.get("server.host").as_deref(), Some("localhost"));
        assert_eq!(config.get("modules.Cache.eager").as_deref(), Some("true"));

        config.set("server.port", "9090");
        assert_eq!(config.get("server.port").as_deref(), Some("9090"));
    }

    #[tokio::test]
    async fn test_start_loads_file() {
        let path = env::temp_dir().join(format!("tessera-config-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, DOCUMENT).unwrap();

        let config = ConfigModule::new().with_file(&path);
        config.start(&SharedContext::new()).await.unwrap();
        assert_eq!(config.get("server.port").as_deref(), Some("8080"));

        let cache: Cache = ConfigModule::read_file_section(&path, "modules.Cache").unwrap();
        assert_eq!(cache.capacity, 16);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_start_fails_on_missing_file() {
        let config = ConfigModule::new().with_file("/definitely/not/here.json");
        assert!(config.start(&SharedContext::new()).await.is_err());
    }
}
