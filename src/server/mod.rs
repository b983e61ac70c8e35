//! Servers: a router bound to a listen port
//!
//! Each server owns one frozen route table and shares the engine's context
//! store. Servers stop accepting connections as soon as the engine starts
//! shutting down.

use crate::context::SharedContext;
use crate::dispatch::Pipeline;
use crate::lifecycle::{EngineError, EngineState};
use crate::routing::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Listen and timeout settings of one server
///
/// Deserializable from a config section; timeouts are given in seconds and
/// `body_limit` in bytes (2 MiB when omitted):
///
/// ```json
/// { "name": "api", "port": 8080, "read_timeout": 30, "shutdown_timeout": 3, "body_limit": 65536 }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    name: String,
    #[serde(default = "unspecified_host")]
    host: IpAddr,
    port: u16,
    #[serde(with = "seconds")]
    read_timeout: Duration,
    #[serde(with = "seconds")]
    shutdown_timeout: Duration,
    #[serde(default = "default_body_limit")]
    body_limit: usize,
}

/// Same default as axum's `DefaultBodyLimit`
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

fn unspecified_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_body_limit() -> usize {
    DEFAULT_BODY_LIMIT
}

mod seconds {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl ServerConfig {
    /// Listens on `0.0.0.0:port`. Port `0` picks a free port at start.
    pub fn new(name: impl Into<String>, port: u16, read_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            host: unspecified_host(),
            port,
            read_timeout,
            shutdown_timeout,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// How long a request body may take to arrive.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// How long in-flight requests get once the engine is shutting down.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Largest request body read before answering `413`.
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }
}

pub struct Server {
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    state: watch::Receiver<EngineState>,
}

impl Server {
    pub(crate) fn new(
        config: ServerConfig,
        router: Router,
        shared: Arc<SharedContext>,
        state: watch::Receiver<EngineState>,
    ) -> Result<Self, EngineError> {
        let pipeline = Pipeline::new(router, shared, state.clone(), &config).map_err(|source| {
            EngineError::InvalidRoute {
                server: config.name.clone(),
                source,
            }
        })?;
        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            state,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run one request through the pipeline.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        self.pipeline.dispatch(request).await
    }

    /// An axum service routing every request into the pipeline.
    ///
    /// Each request is dispatched on its own task, so a client that hangs up
    /// early cannot cut hooks, error handling or access logging short.
    /// Useful for driving the server with `tower::ServiceExt::oneshot` or for
    /// nesting it inside a larger axum application.
    pub fn service(&self) -> axum::Router {
        let pipeline = Arc::clone(&self.pipeline);
        axum::Router::new().fallback(move |request: Request<Body>| {
            let pipeline = Arc::clone(&pipeline);
            async move {
                match tokio::spawn(async move { pipeline.dispatch(request).await }).await {
                    Ok(response) => response,
                    Err(err) => {
                        tracing::error!("Dispatch task failed: {}", err);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        })
    }

    pub(crate) async fn bind(&self) -> Result<TcpListener, EngineError> {
        TcpListener::bind(self.config.addr())
            .await
            .map_err(|source| EngineError::Server {
                server: self.config.name.clone(),
                source,
            })
    }

    /// Serve `listener` until the engine starts shutting down, then drain.
    pub(crate) fn spawn(&self, listener: TcpListener) -> JoinHandle<io::Result<()>> {
        let app = self.service().into_make_service_with_connect_info::<SocketAddr>();
        let mut state = self.state.clone();
        let name = self.config.name.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let observed = state.wait_for(|state| state.is_shutting_down()).await.is_ok();
                    tracing::debug!(server = %name, observed, "Graceful shutdown started");
                })
                .await
        })
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish_non_exhaustive()
    }
}
