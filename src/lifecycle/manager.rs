//! Callback Manager
//!
//! Runs the engine callbacks in the order the lifecycle requires.

use super::{AppCallback, Engine, EngineError, Result};
use std::sync::Arc;

/// Ordered list of engine callbacks
#[derive(Default)]
pub(crate) struct CallbackManager {
    callbacks: Vec<Arc<dyn AppCallback>>,
}

impl CallbackManager {
    pub(crate) fn register(&mut self, callback: Arc<dyn AppCallback>) {
        tracing::debug!(callback = callback.name(), "Registering engine callback");
        self.callbacks.push(callback);
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Execute every `on_startup` in registration order, stopping at the first failure.
    pub(crate) async fn call_startup(&self, engine: &Engine) -> Result<()> {
        tracing::info!("Calling OnStartup callbacks...");

        for callback in &self.callbacks {
            tracing::debug!("Starting up: {}", callback.name());
            callback.on_startup(engine).await.map_err(|e| {
                tracing::error!("OnStartup failed for {}: {}", callback.name(), e);
                EngineError::callback_failed(callback.name(), "startup", e)
            })?;
        }

        tracing::info!(
            "OnStartup complete ({} callbacks executed)",
            self.callbacks.len()
        );
        Ok(())
    }

    /// Execute every `on_shutdown` in **reverse** registration order.
    ///
    /// Failures are logged and returned; they never stop the remaining callbacks.
    pub(crate) async fn call_shutdown(&self, engine: &Engine) -> Vec<EngineError> {
        tracing::info!("Calling OnShutdown callbacks...");

        let mut failures = Vec::new();
        for callback in self.callbacks.iter().rev() {
            tracing::debug!("Shutting down: {}", callback.name());
            if let Err(e) = callback.on_shutdown(engine).await {
                // Log error but continue with other callbacks
                tracing::error!("OnShutdown failed for {}: {}", callback.name(), e);
                failures.push(EngineError::callback_failed(callback.name(), "shutdown", e));
            }
        }

        tracing::info!(
            "OnShutdown complete ({} callbacks executed)",
            self.callbacks.len()
        );
        failures
    }
}
