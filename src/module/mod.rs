//! Modules
//!
//! A module is an independently lifecycled component: it is started once
//! when the engine starts (after every module it depends on) and stopped
//! once when the engine shuts down (before every module it depends on).
//!
//! # Example
//! ```
//! use tessera::context::SharedContext;
//! use tessera::error::BoxError;
//! use tessera::module::{Module, ModuleRegistry};
//! use tessera::async_trait;
//!
//! struct Database;
//!
//! #[async_trait]
//! impl Module for Database {
//!     async fn start(&self, _ctx: &SharedContext) -> Result<(), BoxError> {
//!         tracing::info!("Opening database pool");
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = ModuleRegistry::new();
//! registry.register("database", Database, &[]);
//! assert!(registry.get::<Database>("database").is_some());
//! ```

mod registry;

pub use registry::ModuleRegistry;

use crate::context::SharedContext;
use crate::error::BoxError;
use async_trait::async_trait;

/// The contract every module implements.
///
/// Start and stop are never called concurrently for the same engine.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Bring the module up. Values written into `ctx` are visible to every
    /// module started later, to engine callbacks and to all requests.
    async fn start(&self, ctx: &SharedContext) -> Result<(), BoxError>;

    /// Release whatever `start` acquired.
    async fn stop(&self, _ctx: &SharedContext) -> Result<(), BoxError> {
        Ok(())
    }
}
