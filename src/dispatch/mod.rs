//! The per-request dispatch pipeline
//!
//! ```text
//! panic recovery
//!   └─ access log (once, with the final status)
//!        └─ error handling
//!             ├─ body read (read timeout, body limit)
//!             ├─ CORS preflight, slash removal, negotiation
//!             ├─ route match ── 404 / 405 / 400, no hooks
//!             └─ hooks startup (outer → inner), handler,
//!                hooks shutdown (inner → outer)
//! ```
//!
//! Nothing is sent until the pipeline finishes; the response is buffered in
//! the [`RequestContext`] so later stages can replace it.

mod error;

pub use error::{DispatchError, HookStage};

use crate::access::AccessRecord;
use crate::context::{RequestContext, SharedContext};
use crate::lifecycle::EngineState;
use crate::logging;
use crate::routing::{CompiledRoute, InvalidRoute, RouteMatch, RouteTable, Router, Strategies};
use crate::server::ServerConfig;
use axum::body::Body;
use axum::http::header::{ACCEPT, ACCEPT_LANGUAGE, ALLOW, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use futures::FutureExt;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::Instrument;

pub(crate) struct Pipeline {
    routes: RouteTable,
    strategies: Strategies,
    shared: Arc<SharedContext>,
    state: watch::Receiver<EngineState>,
    read_timeout: Duration,
    shutdown_timeout: Duration,
    body_limit: usize,
}

impl Pipeline {
    pub fn new(
        router: Router,
        shared: Arc<SharedContext>,
        state: watch::Receiver<EngineState>,
        config: &ServerConfig,
    ) -> Result<Self, InvalidRoute> {
        let (routes, strategies) = router.compile()?;
        tracing::debug!(server = config.name(), routes = ?routes, "Route table compiled");
        Ok(Self {
            routes,
            strategies,
            shared,
            state,
            read_timeout: config.read_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
            body_limit: config.body_limit(),
        })
    }

    /// Serve one request. Always produces a response.
    pub async fn dispatch(&self, request: Request<Body>) -> Response {
        let started = Instant::now();
        let (parts, body) = request.into_parts();
        let mut ctx = RequestContext::from_parts(Arc::clone(&self.shared), parts);
        let span = logging::request_span(ctx.request_id(), ctx.method().as_str(), ctx.path());

        self.process(&mut ctx, body, started).instrument(span).await;
        ctx.take_response()
    }

    async fn process(&self, ctx: &mut RequestContext, body: Body, started: Instant) {
        if let Err(panic) = AssertUnwindSafe(self.run(ctx, body)).catch_unwind().await {
            self.recover_panic(ctx, &panic_message(panic.as_ref()));
        }

        if let Some(cors) = &self.strategies.cors {
            cors.apply(ctx).await;
        }

        self.log_access(ctx, started.elapsed());
    }

    async fn run(&self, ctx: &mut RequestContext, body: Body) {
        let read = Limited::new(body, self.body_limit).collect();
        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(Ok(collected)) => ctx.set_body(collected.to_bytes()),
            Ok(Err(err)) if err.is::<LengthLimitError>() => {
                return self.handle_error(ctx, DispatchError::PayloadTooLarge(self.body_limit));
            }
            Ok(Err(err)) => return self.handle_error(ctx, DispatchError::Transport(err)),
            Err(_) => return self.handle_error(ctx, DispatchError::ReadTimeout(self.read_timeout)),
        }

        if self.preflight(ctx).await || self.remove_slash(ctx) {
            return;
        }
        self.negotiate(ctx);

        let (route, params) = match self.routes.find(ctx.method(), ctx.path()) {
            RouteMatch::Found(route, params) => (route, params),
            RouteMatch::MethodNotAllowed(methods) => {
                let allow = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    ctx.response_mut().insert_header(ALLOW, value);
                }
                return reject(ctx, StatusCode::METHOD_NOT_ALLOWED);
            }
            RouteMatch::MalformedParam(name) => {
                tracing::debug!(request_id = %ctx.request_id(), param = %name, "Path parameter is not valid UTF-8");
                return reject(ctx, StatusCode::BAD_REQUEST);
            }
            RouteMatch::NotFound => return reject(ctx, StatusCode::NOT_FOUND),
        };
        ctx.set_params(params);

        match self.execute(ctx, route).await {
            Ok(()) => {}
            Err(DispatchError::Panic(message)) => self.recover_panic(ctx, &message),
            Err(error) => self.handle_error(ctx, error),
        }
    }

    /// Run the hook chain and handler, then unwind the hooks that were entered.
    async fn execute(&self, ctx: &mut RequestContext, route: &CompiledRoute) -> Result<(), DispatchError> {
        let mut entered = 0;

        let result = {
            let work = AssertUnwindSafe(enter(ctx, route, &mut entered)).catch_unwind();
            tokio::select! {
                result = work => result.unwrap_or_else(|panic| {
                    Err(DispatchError::Panic(panic_message(panic.as_ref())))
                }),
                _ = self.drained() => Err(DispatchError::Timeout(self.shutdown_timeout)),
            }
        };

        for hook in route.hooks[..entered].iter().rev() {
            match AssertUnwindSafe(hook.on_request_shutdown(ctx)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(
                    request_id = %ctx.request_id(),
                    hook = hook.name(),
                    "{}",
                    DispatchError::Hook {
                        hook: hook.name().to_string(),
                        stage: HookStage::Shutdown,
                        source: err,
                    }
                ),
                Err(panic) => self.log_panic(ctx, &panic_message(panic.as_ref())),
            }
        }

        result
    }

    /// Resolves once the engine has been shutting down for longer than the
    /// graceful window. Never resolves while the engine keeps running.
    async fn drained(&self) {
        let mut state = self.state.clone();
        let observed = state.wait_for(|state| state.is_shutting_down()).await.is_ok();
        if !observed {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.shutdown_timeout).await;
    }

    /// Answer a CORS preflight. Returns `true` when the request is finished.
    async fn preflight(&self, ctx: &mut RequestContext) -> bool {
        match &self.strategies.cors {
            Some(cors) => cors.preflight(ctx).await,
            None => false,
        }
    }

    /// Redirect `/path/` to `/path`. Returns `true` when a redirect was written.
    fn remove_slash(&self, ctx: &mut RequestContext) -> bool {
        let Some(status) = self.strategies.slash_remover else {
            return false;
        };
        let path = ctx.path();
        if path.len() <= 1 || !path.ends_with('/') {
            return false;
        }

        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        let location = match ctx.uri().query() {
            Some(query) => format!("{}?{}", trimmed, query),
            None => trimmed.to_string(),
        };
        let Ok(location) = HeaderValue::from_str(&location) else {
            return false;
        };

        let status = if *ctx.method() == Method::GET || *ctx.method() == Method::HEAD {
            status
        } else {
            StatusCode::TEMPORARY_REDIRECT
        };
        let response = ctx.response_mut();
        response.set_status(status);
        response.insert_header(LOCATION, location);
        true
    }

    fn negotiate(&self, ctx: &mut RequestContext) {
        if let Some(negotiator) = &self.strategies.type_negotiator {
            let content_type = negotiator.negotiate(ctx.header(ACCEPT));
            ctx.set_content_type(content_type);
        }
        if let Some(negotiator) = &self.strategies.language_negotiator {
            let language = negotiator.negotiate(ctx.header(ACCEPT_LANGUAGE)).to_string();
            ctx.set_language(language);
        }
    }

    fn handle_error(&self, ctx: &mut RequestContext, error: DispatchError) {
        ctx.response_mut().reset();

        match self.strategies.error_handler.handle(ctx, &error) {
            Ok(()) if ctx.response().is_written() => {}
            Ok(()) => ctx.set_status(error.status()),
            Err(err) => {
                tracing::error!(
                    request_id = %ctx.request_id(),
                    "Error handler failed ({}) while handling: {}",
                    err,
                    error
                );
                let response = ctx.response_mut();
                response.reset();
                response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    fn recover_panic(&self, ctx: &mut RequestContext, message: &str) {
        self.log_panic(ctx, message);
        let response = ctx.response_mut();
        response.reset();
        response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn log_panic(&self, ctx: &RequestContext, message: &str) {
        let logger = &self.strategies.panic_logger;
        if std::panic::catch_unwind(AssertUnwindSafe(|| logger.log_panic(ctx, message))).is_err() {
            tracing::error!(request_id = %ctx.request_id(), "Panic logger panicked on: {}", message);
        }
    }

    fn log_access(&self, ctx: &RequestContext, elapsed: Duration) {
        let Some(logger) = &self.strategies.access_logger else {
            return;
        };
        let record = AccessRecord {
            request_id: ctx.request_id(),
            method: ctx.method().clone(),
            path: ctx.path().to_string(),
            protocol: ctx.version(),
            status: ctx.response().status(),
            bytes_written: ctx.response().bytes_written(),
            elapsed,
            remote: ctx.remote_addr(),
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| logger.log(ctx, &record))).is_err() {
            tracing::error!(request_id = %ctx.request_id(), "Access logger panicked");
        }
    }
}

async fn enter(ctx: &mut RequestContext, route: &CompiledRoute, entered: &mut usize) -> Result<(), DispatchError> {
    for hook in route.hooks.iter() {
        *entered += 1;
        hook.on_request_startup(ctx)
            .await
            .map_err(|source| DispatchError::Hook {
                hook: hook.name().to_string(),
                stage: HookStage::Startup,
                source,
            })?;
    }
    route.handler.call(ctx).await.map_err(DispatchError::Handler)
}

/// A terminal response written without hooks or the error handler.
fn reject(ctx: &mut RequestContext, status: StatusCode) {
    let response = ctx.response_mut();
    response.set_status(status);
    response.insert_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response.write(status.canonical_reason().unwrap_or_default().as_bytes());
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cors::CorsPolicy;
    use crate::error::{BoxError, HttpError};
    use crate::routing::{RequestHook, RouteGroup};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_startup: bool,
    }

    impl Recorder {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                fail_startup: false,
            }
        }

        fn failing(mut self) -> Self {
            self.fail_startup = true;
            self
        }
    }

    #[async_trait]
    impl RequestHook for Recorder {
        async fn on_request_startup(&self, _ctx: &mut RequestContext) -> Result<(), BoxError> {
            self.journal.lock().unwrap().push(format!("{}.startup", self.name));
            if self.fail_startup {
                return Err(format!("{} refused", self.name).into());
            }
            Ok(())
        }

        async fn on_request_shutdown(&self, _ctx: &mut RequestContext) -> Result<(), BoxError> {
            self.journal.lock().unwrap().push(format!("{}.shutdown", self.name));
            Ok(())
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn config() -> ServerConfig {
        ServerConfig::new("test", 0, Duration::from_secs(5), Duration::from_millis(50))
    }

    fn pipeline(router: Router) -> (Pipeline, watch::Sender<EngineState>) {
        pipeline_with(router, config())
    }

    fn pipeline_with(router: Router, config: ServerConfig) -> (Pipeline, watch::Sender<EngineState>) {
        let (tx, rx) = watch::channel(EngineState::Running);
        let pipeline = Pipeline::new(router, Arc::new(SharedContext::new()), rx, &config).unwrap();
        (pipeline, tx)
    }

    fn echo_id(group: RouteGroup) -> RouteGroup {
        group.route(Method::GET, "test/<id>", |ctx| {
            Box::pin(async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                ctx.write(id);
                Ok(())
            })
        })
    }

    async fn explode() -> Result<(), BoxError> {
        panic!("handler exploded")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_hooks_wrap_handler_in_order() {
        let journal: Journal = Default::default();
        let handler_journal = Arc::clone(&journal);
        let router = Router::new().hook(Recorder::new("A", &journal)).group(
            RouteGroup::new("/")
                .hook(Recorder::new("B", &journal))
                .group(RouteGroup::new("inner").hook(Recorder::new("C", &journal)).route(
                    Method::GET,
                    "x",
                    move |ctx| {
                        let journal = Arc::clone(&handler_journal);
                        Box::pin(async move {
                            journal.lock().unwrap().push("handler".to_string());
                            ctx.write("ok");
                            Ok(())
                        })
                    },
                )),
        );
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/inner/x")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
        assert_eq!(
            *journal.lock().unwrap(),
            vec![
                "A.startup",
                "B.startup",
                "C.startup",
                "handler",
                "C.shutdown",
                "B.shutdown",
                "A.shutdown"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_startup_skips_handler_and_inner_hooks() {
        let journal: Journal = Default::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = Arc::clone(&calls);
        let router = Router::new()
            .hook(Recorder::new("A", &journal))
            .hook(Recorder::new("B", &journal).failing())
            .hook(Recorder::new("C", &journal))
            .route(Method::GET, "/x", move |_ctx| {
                let calls = Arc::clone(&handler_calls);
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/x")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["A.startup", "B.startup", "B.shutdown", "A.shutdown"]
        );
    }

    #[tokio::test]
    async fn test_handler_error_still_unwinds_nested_hooks() {
        let journal: Journal = Default::default();
        let router = Router::new().hook(Recorder::new("A", &journal)).group(
            RouteGroup::new("/").hook(Recorder::new("B", &journal)).group(
                RouteGroup::new("inner")
                    .hook(Recorder::new("C", &journal))
                    .route(Method::GET, "x", |_ctx| {
                        Box::pin(async { Err(BoxError::from(HttpError::bad_request("rejected by C's handler"))) })
                    }),
            ),
        );
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/inner/x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["A.startup", "B.startup", "C.startup", "C.shutdown", "B.shutdown", "A.shutdown"]
        );
    }

    #[tokio::test]
    async fn test_failed_group_hook_skips_handler() {
        let journal: Journal = Default::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler_calls = Arc::clone(&calls);
        let router = Router::new().hook(Recorder::new("A", &journal)).group(
            RouteGroup::new("/admin").hook(Recorder::new("B", &journal).failing()).group(
                RouteGroup::new("/").hook(Recorder::new("C", &journal)).route(Method::GET, "panel", move |_ctx| {
                    let calls = Arc::clone(&handler_calls);
                    Box::pin(async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            ),
        );
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/admin/panel")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["A.startup", "B.startup", "B.shutdown", "A.shutdown"]
        );
    }

    #[tokio::test]
    async fn test_path_params_are_decoded() {
        let journal: Journal = Default::default();
        let router = Router::new().hook(Recorder::new("A", &journal)).group(echo_id(RouteGroup::new("/")));
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/test/a%20b")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "a b");
        journal.lock().unwrap().clear();

        let response = pipeline.dispatch(get("/test/%FF")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let seen: Arc<Mutex<Vec<String>>> = Default::default();
        let sink = Arc::clone(&seen);
        let router = Router::new()
            .error_handler(move |_ctx: &mut RequestContext, error: &DispatchError| -> Result<(), BoxError> {
                sink.lock().unwrap().push(error.to_string());
                Ok(())
            })
            .route(Method::POST, "/upload", |ctx| {
                Box::pin(async move {
                    let size = ctx.body().len().to_string();
                    ctx.write(size);
                    Ok(())
                })
            });
        let (pipeline, _state) = pipeline_with(router, config().with_body_limit(8));
        let post = |body: &'static str| {
            Request::builder()
                .method(Method::POST)
                .uri("/upload")
                .body(Body::from(body))
                .unwrap()
        };

        let response = pipeline.dispatch(post("1234")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "4");

        let response = pipeline.dispatch(post("0123456789abcdef")).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(*seen.lock().unwrap(), vec!["Request body exceeds 8 bytes"]);
    }

    #[tokio::test]
    async fn test_not_found_runs_no_hooks() {
        let journal: Journal = Default::default();
        let router = Router::new().hook(Recorder::new("A", &journal));
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let router = Router::new().route(Method::POST, "/items", |_ctx| Box::pin(async { Ok(()) }));
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/items")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "POST");
    }

    #[tokio::test]
    async fn test_http_error_status_reaches_client() {
        let router = Router::new().route(Method::GET, "/secret", |_ctx| {
            Box::pin(async { Err(BoxError::from(HttpError::forbidden("no access"))) })
        });
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/secret")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["message"], "no access");
    }

    #[tokio::test]
    async fn test_error_handler_failure_falls_back_to_500() {
        let router = Router::new()
            .error_handler(|ctx: &mut RequestContext, _error: &DispatchError| -> Result<(), BoxError> {
                ctx.write("half written");
                Err("handler broke".into())
            })
            .route(Method::GET, "/x", |_ctx| {
                Box::pin(async { Err(BoxError::from(HttpError::bad_request("bad"))) })
            });
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/x")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_silent_error_handler_uses_error_status() {
        let router = Router::new()
            .error_handler(|_ctx: &mut RequestContext, _error: &DispatchError| -> Result<(), BoxError> { Ok(()) })
            .route(Method::GET, "/x", |_ctx| Box::pin(async { Err(BoxError::from("boom")) }));
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/x")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_panic_is_logged_once_and_hooks_unwind() {
        let journal: Journal = Default::default();
        let panics = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let (panic_count, error_count) = (Arc::clone(&panics), Arc::clone(&errors));
        let router = Router::new()
            .hook(Recorder::new("A", &journal))
            .panic_logger(move |_ctx: &RequestContext, message: &str| {
                assert_eq!(message, "handler exploded");
                panic_count.fetch_add(1, Ordering::SeqCst);
            })
            .error_handler(move |_ctx: &mut RequestContext, _error: &DispatchError| -> Result<(), BoxError> {
                error_count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .cors(CorsPolicy::allow_all())
            .route(Method::GET, "/boom", |_ctx| Box::pin(explode()));
        let (pipeline, _state) = pipeline(router);

        let request = Request::builder()
            .uri("/boom")
            .header("origin", "https://client.example")
            .body(Body::empty())
            .unwrap();
        let response = pipeline.dispatch(request).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(panics.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(*journal.lock().unwrap(), vec!["A.startup", "A.shutdown"]);
    }

    #[tokio::test]
    async fn test_access_log_once_per_request() {
        let records: Arc<Mutex<Vec<(StatusCode, usize)>>> = Default::default();
        let sink = Arc::clone(&records);
        let router = Router::new()
            .access_logger(move |_ctx: &RequestContext, record: &AccessRecord| {
                sink.lock().unwrap().push((record.status, record.bytes_written));
            })
            .route(Method::GET, "/ok", |ctx| {
                Box::pin(async move {
                    ctx.write("hello");
                    Ok(())
                })
            })
            .route(Method::GET, "/fail", |_ctx| Box::pin(async { Err(BoxError::from("nope")) }))
            .route(Method::GET, "/panic", |_ctx| Box::pin(explode()))
            .group(
                RouteGroup::new("/guarded")
                    .hook(Recorder::new("G", &Journal::default()).failing())
                    .route(Method::GET, "/", |_ctx| Box::pin(async { Ok(()) })),
            );
        let (pipeline, _state) = pipeline(router);

        for uri in ["/ok", "/fail", "/panic", "/guarded", "/missing"] {
            pipeline.dispatch(get(uri)).await;
        }

        let records = records.lock().unwrap();
        let statuses: Vec<u16> = records.iter().map(|(status, _)| status.as_u16()).collect();
        assert_eq!(statuses, vec![200, 500, 500, 500, 404]);
        assert_eq!(records[0].1, 5);
    }

    #[tokio::test]
    async fn test_slash_remover_and_negotiation() {
        use crate::negotiate::{HTML, JSON, LanguageNegotiator, TypeNegotiator, XML};

        let router = Router::new()
            .slash_remover(StatusCode::MOVED_PERMANENTLY)
            .type_negotiator(TypeNegotiator::new([JSON, XML, HTML]))
            .language_negotiator(LanguageNegotiator::new(["zh-CN", "en-US"]))
            .route(Method::GET, "/page", |ctx| {
                Box::pin(async move {
                    let language = ctx.language().unwrap_or_default().to_string();
                    ctx.write(language);
                    Ok(())
                })
            });
        let (pipeline, _state) = pipeline(router);

        let response = pipeline.dispatch(get("/page/?a=1")).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[LOCATION], "/page?a=1");

        let post = Request::builder().method(Method::POST).uri("/page/").body(Body::empty()).unwrap();
        assert_eq!(pipeline.dispatch(post).await.status(), StatusCode::TEMPORARY_REDIRECT);

        let request = Request::builder()
            .uri("/page")
            .header(ACCEPT, "text/html")
            .header(ACCEPT_LANGUAGE, "en")
            .body(Body::empty())
            .unwrap();
        let response = pipeline.dispatch(request).await;
        assert_eq!(response.headers()[CONTENT_TYPE], HTML);
        assert_eq!(body_text(response).await, "en-US");
    }

    #[tokio::test]
    async fn test_request_interrupted_after_drain_window() {
        let router = Router::new().route(Method::GET, "/slow", |_ctx| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        });
        let (pipeline, state) = pipeline(router);

        let request = pipeline.dispatch(get("/slow"));
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            state.send_replace(EngineState::ShuttingDown);
        };
        let (response, ()) = tokio::join!(request, trigger);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
