//! Engine callback trait
//!
//! Engine callbacks run once per engine lifetime: `on_startup` after every
//! module has started, `on_shutdown` after the servers have drained and
//! before the modules are stopped.

use super::Engine;
use crate::error::BoxError;
use async_trait::async_trait;

/// Engine-level startup/shutdown hook pair
///
/// Callbacks run in registration order on startup and in reverse
/// registration order on shutdown.
///
/// # Example
///
/// ```rust,ignore
/// use tessera::lifecycle::{AppCallback, Engine};
/// use tessera::error::BoxError;
/// use async_trait::async_trait;
///
/// struct CacheWarmer;
///
/// #[async_trait]
/// impl AppCallback for CacheWarmer {
///     async fn on_startup(&self, engine: &Engine) -> Result<(), BoxError> {
///         let logger = engine.logger().ok_or("logger module missing")?;
///         engine.shared().set(&APP_LOGGER, logger.new_logger("app"));
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait AppCallback: Send + Sync + 'static {
    /// Called once all modules have started, with the shared context populated.
    ///
    /// An error aborts startup and moves the engine to `Failed`.
    async fn on_startup(&self, engine: &Engine) -> Result<(), BoxError>;

    /// Called once servers have drained, before modules are stopped.
    ///
    /// Errors are collected; remaining callbacks still run.
    async fn on_shutdown(&self, _engine: &Engine) -> Result<(), BoxError> {
        Ok(())
    }

    /// Name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
