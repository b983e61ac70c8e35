//! Log output targets
//!
//! Each target becomes one `tracing-subscriber` layer with its own level
//! filter and format.

use crate::config::ConfigError;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::{Layer, Registry};

/// A layer ready to be stacked onto the logger's registry
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Output format of a target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Text,
    Json,
}

/// A named log output
pub trait Target: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn layer(&self) -> Result<BoxedLayer, ConfigError>;
}

fn default_level() -> String {
    "info".to_string()
}

fn parse_level(target: &str, level: &str) -> Result<LevelFilter, ConfigError> {
    level
        .parse::<LevelFilter>()
        .map_err(|e| ConfigError::Provider {
            tag: target.to_string(),
            message: e.to_string(),
        })
}

fn fmt_layer(format: Format, writer: BoxMakeWriter, ansi: bool, filter: LevelFilter) -> BoxedLayer {
    match format {
        Format::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_filter(filter)
            .boxed(),
        Format::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

/// Writes to stdout, or stderr when `stderr` is set
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleTarget {
    #[serde(default = "ConsoleTarget::default_name")]
    name: String,
    #[serde(default = "default_level")]
    level: String,
    #[serde(default)]
    format: Format,
    #[serde(default)]
    stderr: bool,
}

impl ConsoleTarget {
    fn default_name() -> String {
        "console".to_string()
    }
}

impl Default for ConsoleTarget {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            level: default_level(),
            format: Format::Text,
            stderr: false,
        }
    }
}

impl Target for ConsoleTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer(&self) -> Result<BoxedLayer, ConfigError> {
        let filter = parse_level(&self.name, &self.level)?;
        let writer = if self.stderr {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::stdout)
        };
        Ok(fmt_layer(self.format, writer, true, filter))
    }
}

impl From<ConsoleTarget> for Box<dyn Target> {
    fn from(target: ConsoleTarget) -> Self {
        Box::new(target)
    }
}

/// Appends to a file, creating it if needed
#[derive(Debug, Clone, Deserialize)]
pub struct FileTarget {
    #[serde(default = "FileTarget::default_name")]
    name: String,
    path: PathBuf,
    #[serde(default = "default_level")]
    level: String,
    #[serde(default)]
    format: Format,
}

impl FileTarget {
    fn default_name() -> String {
        "file".to_string()
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: Self::default_name(),
            path: path.into(),
            level: default_level(),
            format: Format::Text,
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

impl Target for FileTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn layer(&self) -> Result<BoxedLayer, ConfigError> {
        let filter = parse_level(&self.name, &self.level)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(fmt_layer(
            self.format,
            BoxMakeWriter::new(Mutex::new(file)),
            false,
            filter,
        ))
    }
}

impl From<FileTarget> for Box<dyn Target> {
    fn from(target: FileTarget) -> Self {
        Box::new(target)
    }
}
