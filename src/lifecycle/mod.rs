//! Engine Lifecycle
//!
//! The [`Engine`] owns the module registry, the shared context store, the
//! engine callbacks and the servers, and drives them through a fixed state
//! machine.
//!
//! # Lifecycle Phases
//!
//! ```text
//! Created
//!    ↓  startup()
//! Starting ── module start / OnStartup failure ──→ Failed
//!    │  1. modules start in dependency order
//!    │  2. OnStartup (each callback, registration order)
//!    ↓
//! Running            ← servers may start and accept requests
//!    ↓  shutdown()
//! ShuttingDown
//!    │  3. servers stop accepting and drain (bounded by their timeout)
//!    │  4. OnShutdown (each callback, reverse order)
//!    │  5. modules stop in reverse start order
//!    ↓
//! Stopped
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera::lifecycle::Engine;
//! use tessera::routing::Router;
//! use tessera::server::ServerConfig;
//!
//! let engine = Engine::builder()
//!     .config_file("config/services.json")
//!     .module("database", Database::new(), &["config"])
//!     .callback(Bootstrap)
//!     .build();
//!
//! engine.startup().await?;
//! engine.new_server(ServerConfig::new("api", 8080, read, grace), router)?;
//! engine.start_servers().await?;
//! // ...
//! engine.shutdown().await?;
//! ```

mod engine;
mod error;
mod manager;
mod shutdown;
mod traits;

pub use engine::{Engine, EngineBuilder, builtin};
pub use error::{EngineError, Failure, GraphProblem, Result};
pub use shutdown::shutdown_signal;
pub use traits::AppCallback;

use strum_macros::{AsRefStr, Display};

/// The states an [`Engine`] moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum EngineState {
    /// Modules and callbacks registered, nothing started
    Created,
    /// Modules and `OnStartup` callbacks are running
    Starting,
    /// Servers may be started and accept requests
    Running,
    /// Servers are draining; callbacks and modules are being stopped
    ShuttingDown,
    /// Terminal: shutdown completed
    Stopped,
    /// Terminal: startup failed
    Failed,
}

impl EngineState {
    /// Whether requests still in flight should start their drain countdown.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Self::ShuttingDown | Self::Stopped | Self::Failed)
    }
}
