//! Logger module
//!
//! Builds named [`Logger`] handles whose output goes to the targets listed
//! in the `modules.Logger` section of the configuration:
//!
//! ```json
//! {
//!   "modules": {
//!     "Logger": {
//!       "targets": [
//!         { "type": "ConsoleTarget", "level": "info" },
//!         { "type": "FileTarget", "path": "logs/app.log", "format": "json" }
//!       ]
//!     }
//!   }
//! }
//! ```

mod target;

pub use target::{BoxedLayer, ConsoleTarget, FileTarget, Format, Target};

use crate::config::{ConfigError, ConfigModule, Providers};
use crate::context::SharedContext;
use crate::error::BoxError;
use crate::module::Module;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::Dispatch;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;

/// Config section read on startup when the module has a config handle
pub const DEFAULT_SECTION: &str = "modules.Logger";

#[derive(Debug, Default, Deserialize)]
struct LoggerSettings {
    #[serde(default)]
    targets: Vec<Value>,
}

/// The builtin logger module
pub struct LoggerModule {
    config: Option<Arc<ConfigModule>>,
    section: String,
    dispatch: RwLock<Dispatch>,
    targets: RwLock<Vec<String>>,
}

impl Default for LoggerModule {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerModule {
    /// A logger writing text to stdout until configured otherwise.
    pub fn new() -> Self {
        let console = ConsoleTarget::default();
        let targets = vec![console.name().to_string()];
        let dispatch = console
            .layer()
            .map(|layer| Dispatch::new(Registry::default().with(layer)))
            .unwrap_or_else(|_| Dispatch::none());

        Self {
            config: None,
            section: DEFAULT_SECTION.to_string(),
            dispatch: RwLock::new(dispatch),
            targets: RwLock::new(targets),
        }
    }

    /// Read targets from `config` when the module starts.
    pub fn with_config(config: Arc<ConfigModule>) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = section.into();
        self
    }

    /// Constructors for the builtin `ConsoleTarget` and `FileTarget`.
    pub fn default_providers() -> Providers<Box<dyn Target>> {
        Providers::new()
            .register_settings::<ConsoleTarget>("ConsoleTarget")
            .register_settings::<FileTarget>("FileTarget")
    }

    /// Replace the output targets.
    ///
    /// Loggers created earlier keep writing to the previous targets.
    pub fn configure(&self, targets: Vec<Box<dyn Target>>) -> Result<(), ConfigError> {
        let layers = targets
            .iter()
            .map(|target| target.layer())
            .collect::<Result<Vec<_>, _>>()?;
        let names: Vec<String> = targets.iter().map(|t| t.name().to_string()).collect();

        tracing::debug!(targets = ?names, "Logger targets configured");
        *self.dispatch.write().unwrap_or_else(PoisonError::into_inner) =
            Dispatch::new(Registry::default().with(layers));
        *self.targets.write().unwrap_or_else(PoisonError::into_inner) = names;
        Ok(())
    }

    fn configure_from(
        &self,
        settings: LoggerSettings,
        providers: &Providers<Box<dyn Target>>,
    ) -> Result<(), ConfigError> {
        self.configure(providers.build_all(settings.targets)?)
    }

    /// Configure targets from a section of a JSON file.
    pub fn load_module_file_config(
        &self,
        path: impl AsRef<Path>,
        providers: &Providers<Box<dyn Target>>,
        section: &str,
    ) -> Result<(), ConfigError> {
        let settings = ConfigModule::read_file_section(path, section)?;
        self.configure_from(settings, providers)
    }

    /// Configure targets from a section of an already loaded config module.
    pub fn load_module_config(
        &self,
        config: &ConfigModule,
        providers: &Providers<Box<dyn Target>>,
        section: &str,
    ) -> Result<(), ConfigError> {
        let settings = config.load_section(section)?;
        self.configure_from(settings, providers)
    }

    /// A named logger writing to the current targets.
    pub fn new_logger(&self, name: impl Into<String>) -> Logger {
        Logger {
            name: Arc::from(name.into()),
            dispatch: self
                .dispatch
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Module for LoggerModule {
    async fn start(&self, _ctx: &SharedContext) -> Result<(), BoxError> {
        if let Some(config) = &self.config {
            if config.has_section(&self.section) {
                self.load_module_config(config, &Self::default_providers(), &self.section)?;
                tracing::info!(section = %self.section, targets = ?self.target_names(), "Logger configured");
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Emergency,
}

/// A named, leveled logger handle
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    dispatch: Dispatch,
}

impl Logger {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Severity::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Severity::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.emit(Severity::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Severity::Error, message);
    }

    /// Highest severity: logged at error level and flagged `emergency=true`.
    pub fn emergency(&self, message: impl fmt::Display) {
        self.emit(Severity::Emergency, message);
    }

    fn emit(&self, severity: Severity, message: impl fmt::Display) {
        let name = &*self.name;
        tracing::dispatcher::with_default(&self.dispatch, || match severity {
            Severity::Debug => tracing::debug!(logger = name, "{}", message),
            Severity::Info => tracing::info!(logger = name, "{}", message),
            Severity::Warn => tracing::warn!(logger = name, "{}", message),
            Severity::Error => tracing::error!(logger = name, "{}", message),
            Severity::Emergency => {
                tracing::error!(logger = name, emergency = true, "{}", message)
            }
        });
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("name", &self.name).finish()
    }
}
