//! Lifecycle-specific error types

use super::EngineState;
use crate::error::BoxError;
use crate::routing::InvalidRoute;
use std::fmt;
use thiserror::Error;

/// A problem found while validating the module dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphProblem {
    /// Two modules were registered under the same name
    DuplicateModule(String),
    /// A module depends on a name nobody registered
    UnknownDependency { module: String, dependency: String },
    /// These modules sit on, or behind, a dependency cycle
    Cycle(Vec<String>),
}

impl fmt::Display for GraphProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateModule(name) => write!(f, "module '{}' registered twice", name),
            Self::UnknownDependency { module, dependency } => {
                write!(f, "module '{}' depends on unknown module '{}'", module, dependency)
            }
            Self::Cycle(modules) => write!(f, "dependency cycle among [{}]", modules.join(", ")),
        }
    }
}

/// A named component together with the error it returned
#[derive(Debug)]
pub struct Failure {
    pub name: String,
    pub error: BoxError,
}

impl Failure {
    pub fn new(name: impl Into<String>, error: BoxError) -> Self {
        Self {
            name: name.into(),
            error,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.error)
    }
}

/// Errors that can occur during engine lifecycle operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// The module graph cannot be started; nothing was started
    #[error("Invalid module configuration: {}", join(.0))]
    InvalidModuleGraph(Vec<GraphProblem>),

    /// A module failed to start; modules started before it were stopped again
    #[error("Module '{module}' failed to start: {source}")]
    ModuleStartFailed {
        module: String,
        #[source]
        source: BoxError,
    },

    /// One or more modules failed to stop; every other module was still stopped
    #[error("Module shutdown failed: {}", join(.0))]
    ModuleStopFailed(Vec<Failure>),

    /// The registry was asked to start while modules are still running
    #[error("Modules already started")]
    AlreadyStarted,

    /// An engine callback failed
    #[error("Callback '{callback}' failed during {phase}: {source}")]
    CallbackFailed {
        callback: String,
        phase: &'static str,
        #[source]
        source: BoxError,
    },

    /// A lifecycle operation was called in the wrong state
    #[error("Engine is {actual}, expected {expected}")]
    InvalidState {
        expected: EngineState,
        actual: EngineState,
    },

    #[error("Server '{0}' is not registered")]
    UnknownServer(String),

    #[error("Server '{0}' is already registered")]
    DuplicateServer(String),

    /// The server's router holds a route the matcher cannot accept
    #[error("Server '{server}' has an invalid route: {source}")]
    InvalidRoute {
        server: String,
        #[source]
        source: InvalidRoute,
    },

    #[error("Server '{0}' is already running")]
    ServerAlreadyRunning(String),

    /// Binding or serving a listener failed
    #[error("Server '{server}' failed: {source}")]
    Server {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation timed out
    #[error("Timeout during {phase}: {message}")]
    Timeout {
        /// The lifecycle phase where timeout occurred
        phase: String,
        /// Additional error message
        message: String,
    },

    /// Shutdown ran to completion but some steps failed
    #[error("Shutdown completed with errors: {}", join(.0))]
    ShutdownFailed(Vec<EngineError>),
}

impl EngineError {
    /// Create a timeout error
    pub fn timeout(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Create a callback failure error
    pub fn callback_failed(callback: impl Into<String>, phase: &'static str, source: BoxError) -> Self {
        Self::CallbackFailed {
            callback: callback.into(),
            phase,
            source,
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, EngineError>;
