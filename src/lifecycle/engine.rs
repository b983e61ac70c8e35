//! Engine bootstrap
//!
//! Provides the fluent [`EngineBuilder`] and the [`Engine`] state machine.

use super::manager::CallbackManager;
use super::{AppCallback, EngineError, EngineState, Result, shutdown_signal};
use crate::config::ConfigModule;
use crate::context::{ContextKey, SharedContext};
use crate::logger::LoggerModule;
use crate::module::{Module, ModuleRegistry};
use crate::routing::Router;
use crate::server::{Server, ServerConfig};
use crate::utility::UtilityModule;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Names of the modules every engine registers unless told otherwise.
pub mod builtin {
    pub const CONFIG: &str = "config";
    pub const LOGGER: &str = "logger";
    pub const UTILITY: &str = "utility";
}

/// Extra time a draining server gets beyond its graceful window, so requests
/// interrupted at the window's end can still answer.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

struct RunningServer {
    name: String,
    shutdown_timeout: Duration,
    handle: JoinHandle<std::io::Result<()>>,
}

/// The top-level owner of modules, shared context, callbacks and servers
///
/// Lifecycle transitions are serialized: concurrent `startup`/`shutdown`
/// calls queue up behind each other and observe the state the previous
/// call left behind.
pub struct Engine {
    name: String,
    shared: Arc<SharedContext>,
    modules: ModuleRegistry,
    callbacks: CallbackManager,
    servers: DashMap<String, Arc<Server>>,
    running: Mutex<Vec<RunningServer>>,
    state: watch::Sender<EngineState>,
    transition: Mutex<()>,
    startup_timeout: Option<Duration>,
}

impl Engine {
    /// Create a new engine builder
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// The engine-lifetime shared context store
    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    /// Shorthand for `shared().set(key, value)`.
    pub fn set_value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>, value: T) {
        self.shared.set(key, value);
    }

    /// Shorthand for `shared().get(key)`.
    pub fn value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        self.shared.get(key)
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Look up a registered module by name and concrete type.
    pub fn module<M: Module>(&self, name: &str) -> Option<Arc<M>> {
        self.modules.get(name)
    }

    pub fn config(&self) -> Option<Arc<ConfigModule>> {
        self.module(builtin::CONFIG)
    }

    pub fn logger(&self) -> Option<Arc<LoggerModule>> {
        self.module(builtin::LOGGER)
    }

    pub fn utility(&self) -> Option<Arc<UtilityModule>> {
        self.module(builtin::UTILITY)
    }

    fn set_state(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        tracing::debug!(engine = %self.name, from = %previous, to = %state, "Engine state changed");
    }

    fn expect_state(&self, expected: EngineState) -> Result<()> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(EngineError::InvalidState { expected, actual })
        }
    }

    /// Start every module, then run every `OnStartup` callback.
    ///
    /// # Errors
    ///
    /// On any failure the engine moves to `Failed` and every module that was
    /// started is stopped again.
    pub async fn startup(&self) -> Result<()> {
        self.start_within(self.startup_timeout).await
    }

    /// [`startup`](Self::startup) with a bound on module startup plus
    /// `OnStartup` callbacks, overriding the builder's timeout.
    pub async fn startup_with_timeout(&self, timeout: Duration) -> Result<()> {
        self.start_within(Some(timeout)).await
    }

    async fn start_within(&self, startup_timeout: Option<Duration>) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.expect_state(EngineState::Created)?;
        self.set_state(EngineState::Starting);

        tracing::info!(engine = %self.name, "Starting engine...");

        let startup = async {
            self.modules.start_all(&self.shared).await?;
            self.callbacks.call_startup(self).await
        };
        let result = match startup_timeout {
            Some(timeout) => tokio::time::timeout(timeout, startup)
                .await
                .unwrap_or_else(|_| {
                    Err(EngineError::timeout(
                        "startup",
                        format!("Timeout after {:?}", timeout),
                    ))
                }),
            None => startup.await,
        };

        if let Err(e) = result {
            tracing::error!(engine = %self.name, "Engine startup failed: {}", e);
            // Best effort: modules already rolled back by the registry are skipped.
            if let Err(stop_error) = self.modules.stop_all(&self.shared).await {
                tracing::error!(engine = %self.name, "Cleanup after failed startup: {}", stop_error);
            }
            self.set_state(EngineState::Failed);
            return Err(e);
        }

        self.set_state(EngineState::Running);
        tracing::info!(
            engine = %self.name,
            modules = self.modules.len(),
            callbacks = self.callbacks.len(),
            "Engine running"
        );
        Ok(())
    }

    /// Register a server bound to `router`.
    ///
    /// The router is frozen here; its groups and routes never change afterwards.
    pub fn new_server(&self, config: ServerConfig, router: Router) -> Result<Arc<Server>> {
        let slot = match self.servers.entry(config.name().to_string()) {
            Entry::Occupied(entry) => return Err(EngineError::DuplicateServer(entry.key().clone())),
            Entry::Vacant(slot) => slot,
        };
        let server = Arc::new(Server::new(
            config,
            router,
            Arc::clone(&self.shared),
            self.state.subscribe(),
        )?);
        tracing::info!(server = server.name(), port = server.config().port(), "Registered server");
        slot.insert(Arc::clone(&server));
        Ok(server)
    }

    pub fn server(&self, name: &str) -> Option<Arc<Server>> {
        self.servers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Dispatch one request through a server's pipeline without a listener.
    ///
    /// Only a `Running` engine serves requests.
    pub async fn serve(&self, server: &str, request: Request<Body>) -> Result<Response> {
        let server = self
            .server(server)
            .ok_or_else(|| EngineError::UnknownServer(server.to_string()))?;
        self.expect_state(EngineState::Running)?;
        Ok(server.handle(request).await)
    }

    /// Bind a server's port and start accepting connections.
    ///
    /// Returns the bound address, which differs from the configured port
    /// when that port is `0`.
    pub async fn start_server(&self, name: &str) -> Result<SocketAddr> {
        self.expect_state(EngineState::Running)?;
        let server = self
            .server(name)
            .ok_or_else(|| EngineError::UnknownServer(name.to_string()))?;

        let mut running = self.running.lock().await;
        if running.iter().any(|entry| entry.name == name) {
            return Err(EngineError::ServerAlreadyRunning(name.to_string()));
        }

        let listener = server.bind().await?;
        let addr = listener.local_addr().map_err(|source| EngineError::Server {
            server: name.to_string(),
            source,
        })?;
        let handle = server.spawn(listener);

        running.push(RunningServer {
            name: name.to_string(),
            shutdown_timeout: server.config().shutdown_timeout(),
            handle,
        });
        tracing::info!(server = name, %addr, "Server listening");
        Ok(addr)
    }

    /// Start every registered server.
    pub async fn start_servers(&self) -> Result<Vec<(String, SocketAddr)>> {
        let mut bound = Vec::new();
        for name in self.server_names() {
            let addr = self.start_server(&name).await?;
            bound.push((name, addr));
        }
        Ok(bound)
    }

    /// Drain servers, run `OnShutdown` callbacks in reverse, stop modules.
    ///
    /// Every step runs even when an earlier one failed; all failures are
    /// returned together and the engine always ends up `Stopped`.
    pub async fn shutdown(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        self.expect_state(EngineState::Running)?;
        self.set_state(EngineState::ShuttingDown);

        tracing::info!(engine = %self.name, "Shutting down engine...");

        let mut failures = self.drain_servers().await;
        failures.extend(self.callbacks.call_shutdown(self).await);
        if let Err(e) = self.modules.stop_all(&self.shared).await {
            failures.push(e);
        }

        self.set_state(EngineState::Stopped);
        if failures.is_empty() {
            tracing::info!(engine = %self.name, "Engine shutdown complete");
            Ok(())
        } else {
            tracing::warn!(
                engine = %self.name,
                failures = failures.len(),
                "Engine shutdown completed with errors"
            );
            Err(EngineError::ShutdownFailed(failures))
        }
    }

    async fn drain_servers(&self) -> Vec<EngineError> {
        let running = std::mem::take(&mut *self.running.lock().await);
        let mut failures = Vec::new();

        for RunningServer {
            name,
            shutdown_timeout,
            mut handle,
        } in running
        {
            tracing::debug!(server = %name, "Draining server");
            match tokio::time::timeout(shutdown_timeout + DRAIN_GRACE, &mut handle).await {
                Ok(Ok(Ok(()))) => tracing::info!(server = %name, "Server stopped"),
                Ok(Ok(Err(source))) => failures.push(EngineError::Server {
                    server: name,
                    source,
                }),
                Ok(Err(join_error)) => failures.push(EngineError::Server {
                    server: name,
                    source: std::io::Error::other(join_error),
                }),
                Err(_) => {
                    handle.abort();
                    tracing::warn!(server = %name, "Server did not drain in {:?}", shutdown_timeout);
                    failures.push(EngineError::timeout(
                        format!("draining server '{}'", name),
                        format!("Timeout after {:?}", shutdown_timeout),
                    ));
                }
            }
        }
        failures
    }

    /// Start up, serve every registered server until Ctrl+C/SIGTERM, shut down.
    pub async fn run(&self) -> Result<()> {
        self.startup().await?;
        if let Err(e) = self.start_servers().await {
            tracing::error!(engine = %self.name, "Failed to start servers: {}", e);
            if let Err(shutdown_error) = self.shutdown().await {
                tracing::error!(engine = %self.name, "{}", shutdown_error);
            }
            return Err(e);
        }
        shutdown_signal().await;
        self.shutdown().await
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    name: String,
    modules: ModuleRegistry,
    callbacks: CallbackManager,
    shared: SharedContext,
    builtins: bool,
    config_file: Option<PathBuf>,
    env_prefix: Option<String>,
    startup_timeout: Option<Duration>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self {
            name: "tessera".to_string(),
            modules: ModuleRegistry::new(),
            callbacks: CallbackManager::default(),
            shared: SharedContext::new(),
            builtins: true,
            config_file: None,
            env_prefix: None,
            startup_timeout: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// JSON file the builtin config module loads at startup
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Environment variable prefix for config overrides, e.g. `APP` for `APP_SERVER__PORT`
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Do not register the builtin `config`, `logger` and `utility` modules
    pub fn without_builtin_modules(mut self) -> Self {
        self.builtins = false;
        self
    }

    /// Set a timeout for module startup plus `OnStartup` callbacks
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Register a module started after `depends_on`
    pub fn module<M: Module>(
        mut self,
        name: impl Into<String>,
        module: M,
        depends_on: &[&str],
    ) -> Self {
        self.modules.register(name, module, depends_on);
        self
    }

    /// Register a module the caller keeps a handle to
    pub fn module_arc<M: Module>(
        mut self,
        name: impl Into<String>,
        module: Arc<M>,
        depends_on: &[&str],
    ) -> Self {
        self.modules.register_arc(name, module, depends_on);
        self
    }

    /// Register an engine callback
    pub fn callback<C: AppCallback>(mut self, callback: C) -> Self {
        self.callbacks.register(Arc::new(callback));
        self
    }

    /// Seed the shared context before anything starts
    pub fn value<T: Send + Sync + 'static>(self, key: &ContextKey<T>, value: T) -> Self {
        self.shared.set(key, value);
        self
    }

    /// Build the engine in the `Created` state
    pub fn build(self) -> Engine {
        let mut modules = ModuleRegistry::new();
        if self.builtins {
            let mut config = ConfigModule::new();
            if let Some(path) = self.config_file {
                config = config.with_file(path);
            }
            if let Some(prefix) = self.env_prefix {
                config = config.with_env_prefix(prefix);
            }
            let config = Arc::new(config);

            modules
                .register_arc(builtin::CONFIG, Arc::clone(&config), &[])
                .register(builtin::LOGGER, LoggerModule::with_config(config), &[builtin::CONFIG])
                .register(builtin::UTILITY, UtilityModule::new(), &[]);
        }
        modules.extend(self.modules);

        let (state, _) = watch::channel(EngineState::Created);
        Engine {
            name: self.name,
            shared: Arc::new(self.shared),
            modules,
            callbacks: self.callbacks,
            servers: DashMap::new(),
            running: Mutex::new(Vec::new()),
            state,
            transition: Mutex::new(()),
            startup_timeout: self.startup_timeout,
        }
    }
}
