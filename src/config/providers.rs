//! Named provider constructors for polymorphic config fields
//!
//! A list like `"targets": [{ "type": "ConsoleTarget", ... }, { "type": "FileTarget", ... }]`
//! is turned into values of one trait object type by looking up the
//! constructor registered for each entry's tag.

use super::ConfigError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;

/// A constructor building a `T` from its config entry
pub type ProviderFn<T> = Box<dyn Fn(Value) -> Result<T, ConfigError> + Send + Sync>;

/// Mapping from type tags to constructors
pub struct Providers<T> {
    tag_field: String,
    constructors: BTreeMap<String, ProviderFn<T>>,
}

impl<T> Default for Providers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Providers<T> {
    /// Providers keyed by each entry's `"type"` field.
    pub fn new() -> Self {
        Self {
            tag_field: "type".to_string(),
            constructors: BTreeMap::new(),
        }
    }

    /// Use another field as the type tag.
    pub fn with_tag_field(mut self, field: impl Into<String>) -> Self {
        self.tag_field = field.into();
        self
    }

    /// Register a constructor under `tag`.
    pub fn register<F>(mut self, tag: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(Value) -> Result<T, ConfigError> + Send + Sync + 'static,
    {
        self.constructors.insert(tag.into(), Box::new(constructor));
        self
    }

    /// Register a settings type `S` that deserializes from the entry and converts into `T`.
    pub fn register_settings<S>(self, tag: impl Into<String>) -> Self
    where
        S: DeserializeOwned + Into<T> + 'static,
        T: 'static,
    {
        let tag = tag.into();
        let name = tag.clone();
        self.register(tag, move |value| {
            serde_json::from_value::<S>(value)
                .map(Into::into)
                .map_err(|source| ConfigError::Invalid {
                    section: name.clone(),
                    source,
                })
        })
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Build one value from a tagged config entry.
    pub fn build(&self, entry: Value) -> Result<T, ConfigError> {
        let tag = entry
            .get(&self.tag_field)
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::MissingProviderTag(self.tag_field.clone()))?
            .to_string();
        let constructor =
            self.constructors
                .get(&tag)
                .ok_or_else(|| ConfigError::UnknownProvider {
                    known: self.tags().collect::<Vec<_>>().join(", "),
                    tag: tag.clone(),
                })?;
        constructor(entry)
    }

    /// Build every entry of a list, failing on the first bad one.
    pub fn build_all(&self, entries: Vec<Value>) -> Result<Vec<T>, ConfigError> {
        entries.into_iter().map(|entry| self.build(entry)).collect()
    }
}
