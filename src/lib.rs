//! # Tessera
//!
//! An application engine that starts named modules in dependency order,
//! shares one typed context store between them, and serves HTTP through
//! servers whose routes are wrapped in layered request hooks.
//!
//! ## Features
//!
//! - **Modules**: Started in dependency order, rolled back on failure, stopped in reverse
//! - **Shared Context**: A typed, concurrent key/value store with request-local overlays
//! - **Lifecycle**: `Created → Starting → Running → ShuttingDown → Stopped` with engine callbacks
//! - **Request Hooks**: Server and route-group hooks wrapping every handler, outermost first
//! - **Pluggable Strategies**: Error handling, panic recovery, access logging, negotiation, CORS
//! - **Builtin Modules**: JSON configuration, named loggers with console/file targets, client IP lookup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tessera::prelude::*;
//! use std::time::Duration;
//!
//! const GREETING: ContextKey<String> = ContextKey::new("greeting");
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EngineError> {
//!     let engine = Engine::builder()
//!         .name("hello")
//!         .value(&GREETING, "Hello".to_string())
//!         .build();
//!
//!     let router = Router::new().group(RouteGroup::new("/").route(Method::GET, "hello/<name>", |ctx| {
//!         Box::pin(async move {
//!             let greeting = ctx.value(&GREETING).map(|g| g.to_string()).unwrap_or_default();
//!             let name = ctx.param("name").unwrap_or("world").to_string();
//!             ctx.write(format!("{}, {}!", greeting, name));
//!             Ok(())
//!         })
//!     }));
//!     engine.new_server(
//!         ServerConfig::new("web", 8080, Duration::from_secs(30), Duration::from_secs(3)),
//!         router,
//!     )?;
//!
//!     engine.run().await
//! }
//! ```

pub mod access;
pub mod config;
pub mod context;
pub mod cors;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod lifecycle;
pub mod logger;
pub mod logging;
pub mod module;
pub mod negotiate;
pub mod routing;
pub mod server;
pub mod utility;

// Re-export core types
pub use context::{ContextKey, RequestContext, SharedContext};
pub use error::{BoxError, HttpError};
pub use lifecycle::{AppCallback, Engine, EngineBuilder, EngineError, EngineState};
pub use module::{Module, ModuleRegistry};
pub use routing::{RequestHook, RouteGroup, Router};
pub use server::{Server, ServerConfig};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use tessera::prelude::*;
/// ```
pub mod prelude {
    pub use crate::access::{AccessLogger, AccessRecord, TracingAccessLogger};
    pub use crate::config::{ConfigError, ConfigModule, Providers};
    pub use crate::context::{ContextKey, RequestContext, SharedContext};
    pub use crate::cors::CorsPolicy;
    pub use crate::dispatch::{DispatchError, HookStage};
    pub use crate::error::{BoxError, HttpError};
    pub use crate::exception::{ErrorHandler, HttpErrorHandler, PanicLogger, TracingPanicLogger};
    pub use crate::lifecycle::{AppCallback, Engine, EngineBuilder, EngineError, EngineState, builtin};
    pub use crate::logger::{ConsoleTarget, FileTarget, Logger, LoggerModule};
    pub use crate::module::{Module, ModuleRegistry};
    pub use crate::negotiate::{LanguageNegotiator, TypeNegotiator};
    pub use crate::routing::{Handler, HandlerResult, RequestHook, RouteGroup, Router};
    pub use crate::server::{Server, ServerConfig};
    pub use crate::utility::UtilityModule;
    pub use async_trait::async_trait;
    pub use axum::http::{Method, StatusCode};
    pub use std::sync::Arc;
}
