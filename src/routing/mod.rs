//! Routes, route groups and the router a server is built from
//!
//! A [`Router`] holds server-level hooks, routes and nested [`RouteGroup`]s
//! together with the pluggable request strategies (error handling, access
//! logging, panic logging, negotiation, slash removal, CORS). When a server is
//! constructed the router is flattened into an immutable [`RouteTable`] where
//! every route carries its full hook chain, outermost first.

mod hook;
mod pattern;

pub use hook::RequestHook;
pub use pattern::PathPattern;

use crate::access::AccessLogger;
use crate::context::RequestContext;
use crate::cors::{CorsPolicy, CorsService};
use crate::error::BoxError;
use crate::exception::{ErrorHandler, HttpErrorHandler, PanicLogger, TracingPanicLogger};
use crate::negotiate::{LanguageNegotiator, TypeNegotiator};
use axum::http::{Method, StatusCode};
use futures::future::BoxFuture;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// What handlers and hooks return
pub type HandlerResult = Result<(), BoxError>;

/// A request handler
///
/// Closures are accepted directly by [`Router::route`] and [`RouteGroup::route`];
/// implement this trait for handlers that carry their own state.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HandlerResult> {
        (self.0)(ctx)
    }
}

struct Route {
    method: Method,
    path: String,
    handler: Arc<dyn Handler>,
}

/// A path prefix with its own hooks, routes and nested groups
///
/// # Example
/// ```
/// use tessera::routing::RouteGroup;
/// use axum::http::Method;
///
/// let api = RouteGroup::new("/api").group(
///     RouteGroup::new("v1").route(Method::GET, "users/<id>", |ctx| {
///         Box::pin(async move {
///             let id = ctx.param("id").unwrap_or_default().to_string();
///             ctx.write(id);
///             Ok(())
///         })
///     }),
/// );
/// # let _ = api;
/// ```
pub struct RouteGroup {
    prefix: String,
    hooks: Vec<Arc<dyn RequestHook>>,
    routes: Vec<Route>,
    groups: Vec<RouteGroup>,
}

impl RouteGroup {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            hooks: Vec::new(),
            routes: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn hook(mut self, hook: impl RequestHook) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn hook_arc(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn route<F>(self, method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.route_handler(method, path, FnHandler(handler))
    }

    pub fn route_handler(mut self, method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        self.routes.push(Route {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn group(mut self, group: RouteGroup) -> Self {
        self.groups.push(group);
        self
    }

    fn flatten(self, parent_prefix: &str, parent_hooks: &[Arc<dyn RequestHook>], out: &mut Vec<CompiledRoute>) {
        let prefix = pattern::join(parent_prefix, &self.prefix);
        let mut hooks = parent_hooks.to_vec();
        hooks.extend(self.hooks);
        let chain: Arc<[Arc<dyn RequestHook>]> = hooks.clone().into();

        for route in self.routes {
            out.push(CompiledRoute {
                method: route.method,
                pattern: PathPattern::parse(&pattern::join(&prefix, &route.path)),
                handler: route.handler,
                hooks: Arc::clone(&chain),
            });
        }

        for group in self.groups {
            group.flatten(&prefix, &hooks, out);
        }
    }
}

/// Pluggable per-request strategies carried by a [`Router`]
#[derive(Clone)]
pub(crate) struct Strategies {
    pub access_logger: Option<Arc<dyn AccessLogger>>,
    pub error_handler: Arc<dyn ErrorHandler>,
    pub panic_logger: Arc<dyn PanicLogger>,
    pub type_negotiator: Option<TypeNegotiator>,
    pub language_negotiator: Option<LanguageNegotiator>,
    pub slash_remover: Option<StatusCode>,
    pub cors: Option<CorsService>,
}

impl Default for Strategies {
    fn default() -> Self {
        Self {
            access_logger: None,
            error_handler: Arc::new(HttpErrorHandler),
            panic_logger: Arc::new(TracingPanicLogger),
            type_negotiator: None,
            language_negotiator: None,
            slash_remover: None,
            cors: None,
        }
    }
}

/// The root of a server's routes
///
/// The router's own hooks wrap every route; its routes live directly under `/`.
///
/// # Example
/// ```
/// use tessera::routing::{Router, RouteGroup};
/// use tessera::negotiate::{TypeNegotiator, JSON};
/// use axum::http::Method;
///
/// let router = Router::new()
///     .type_negotiator(TypeNegotiator::new([JSON]))
///     .group(RouteGroup::new("/").route(Method::GET, "test/<id>", |ctx| {
///         Box::pin(async move {
///             let id = ctx.param("id").unwrap_or_default().to_string();
///             ctx.write(id);
///             Ok(())
///         })
///     }));
/// # let _ = router;
/// ```
pub struct Router {
    root: RouteGroup,
    strategies: Strategies,
}

impl Router {
    pub fn new() -> Self {
        Self {
            root: RouteGroup::new("/"),
            strategies: Strategies::default(),
        }
    }

    pub fn hook(mut self, hook: impl RequestHook) -> Self {
        self.root = self.root.hook(hook);
        self
    }

    pub fn hook_arc(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.root = self.root.hook_arc(hook);
        self
    }

    pub fn route<F>(mut self, method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.root = self.root.route(method, path, handler);
        self
    }

    pub fn route_handler(mut self, method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        self.root = self.root.route_handler(method, path, handler);
        self
    }

    pub fn group(mut self, group: RouteGroup) -> Self {
        self.root = self.root.group(group);
        self
    }

    /// Log every request once it has a final status. Off by default.
    pub fn access_logger(mut self, logger: impl AccessLogger) -> Self {
        self.strategies.access_logger = Some(Arc::new(logger));
        self
    }

    /// Replace the default JSON error handler.
    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.strategies.error_handler = Arc::new(handler);
        self
    }

    pub fn panic_logger(mut self, logger: impl PanicLogger) -> Self {
        self.strategies.panic_logger = Arc::new(logger);
        self
    }

    pub fn type_negotiator(mut self, negotiator: TypeNegotiator) -> Self {
        self.strategies.type_negotiator = Some(negotiator);
        self
    }

    pub fn language_negotiator(mut self, negotiator: LanguageNegotiator) -> Self {
        self.strategies.language_negotiator = Some(negotiator);
        self
    }

    /// Redirect paths with a trailing slash to their canonical form.
    ///
    /// `GET` and `HEAD` use `status`; other methods always use `307` so the
    /// body is replayed.
    pub fn slash_remover(mut self, status: StatusCode) -> Self {
        self.strategies.slash_remover = Some(status);
        self
    }

    pub fn cors(mut self, policy: CorsPolicy) -> Self {
        self.strategies.cors = Some(policy.into_service());
        self
    }

    pub(crate) fn compile(self) -> Result<(RouteTable, Strategies), InvalidRoute> {
        let mut routes = Vec::new();
        self.root.flatten("", &[], &mut routes);
        Ok((RouteTable::build(routes)?, self.strategies))
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct CompiledRoute {
    pub method: Method,
    pub pattern: PathPattern,
    pub handler: Arc<dyn Handler>,
    /// Router hooks first, then group hooks root to leaf
    pub hooks: Arc<[Arc<dyn RequestHook>]>,
}

pub(crate) enum RouteMatch<'a> {
    Found(&'a CompiledRoute, Vec<(String, String)>),
    /// The path matched but this parameter is not valid percent-encoded UTF-8
    MalformedParam(String),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// A route the matcher refused, usually because an earlier route already
/// claims the same path
#[derive(Debug, Error)]
#[error("Route {method} {pattern} cannot be registered: {source}")]
pub struct InvalidRoute {
    pub method: Method,
    pub pattern: String,
    #[source]
    pub source: matchit::InsertError,
}

/// The flattened, immutable routes of a server
///
/// One `matchit` tree per method; each leaf holds an index into `routes`.
pub(crate) struct RouteTable {
    routes: Vec<CompiledRoute>,
    methods: Vec<(Method, matchit::Router<usize>)>,
}

impl RouteTable {
    fn build(routes: Vec<CompiledRoute>) -> Result<Self, InvalidRoute> {
        let mut methods: Vec<(Method, matchit::Router<usize>)> = Vec::new();

        for (index, route) in routes.iter().enumerate() {
            let position = match methods.iter().position(|(method, _)| *method == route.method) {
                Some(position) => position,
                None => {
                    methods.push((route.method.clone(), matchit::Router::new()));
                    methods.len() - 1
                }
            };
            methods[position]
                .1
                .insert(route.pattern.route_path(), index)
                .map_err(|source| InvalidRoute {
                    method: route.method.clone(),
                    pattern: route.pattern.to_string(),
                    source,
                })?;
        }

        Ok(Self { routes, methods })
    }

    /// Match `path` (still percent-encoded) for `method`. Captured
    /// parameters are decoded.
    pub fn find(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let mut allowed = Vec::new();

        for (candidate, tree) in &self.methods {
            let Ok(matched) = tree.at(path) else {
                continue;
            };
            if candidate != method {
                allowed.push(candidate.clone());
                continue;
            }

            let route = &self.routes[*matched.value];
            let mut params = Vec::with_capacity(matched.params.len());
            for (name, value) in matched.params.iter() {
                match percent_decode_str(value).decode_utf8() {
                    Ok(decoded) => params.push((name.to_string(), decoded.into_owned())),
                    Err(_) => return RouteMatch::MalformedParam(name.to_string()),
                }
            }
            return RouteMatch::Found(route, params);
        }

        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            RouteMatch::MethodNotAllowed(allowed)
        }
    }

    pub fn patterns(&self) -> impl Iterator<Item = (&Method, &PathPattern)> {
        self.routes.iter().map(|route| (&route.method, &route.pattern))
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.patterns().map(|(method, pattern)| format!("{} {}", method, pattern)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl RequestHook for Named {
        async fn on_request_startup(&self, _ctx: &mut RequestContext) -> HandlerResult {
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    fn noop(router: RouteGroup, method: Method, path: &str) -> RouteGroup {
        router.route(method, path.to_string(), |_ctx| Box::pin(async { Ok(()) }))
    }

    fn table(group: RouteGroup) -> RouteTable {
        Router::new().group(group).compile().unwrap().0
    }

    #[test]
    fn test_flatten_joins_prefixes_and_hooks() {
        let router = Router::new().hook(Named("A")).group(
            noop(RouteGroup::new("/api").hook(Named("B")), Method::GET, "ping").group(noop(
                RouteGroup::new("v1").hook(Named("C")),
                Method::GET,
                "users/<id>",
            )),
        );
        let (table, _) = router.compile().unwrap();

        let RouteMatch::Found(route, params) = table.find(&Method::GET, "/api/v1/users/7") else {
            panic!("route not found: {:?}", table);
        };
        assert_eq!(route.pattern.as_str(), "/api/v1/users/<id>");
        assert_eq!(params, vec![("id".to_string(), "7".to_string())]);
        let names: Vec<&str> = route.hooks.iter().map(|hook| hook.name()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        let RouteMatch::Found(route, _) = table.find(&Method::GET, "/api/ping") else {
            panic!("route not found");
        };
        assert_eq!(route.hooks.len(), 2);
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let group = noop(noop(RouteGroup::new("/"), Method::GET, "item"), Method::PUT, "item");
        let (table, _) = Router::new().group(group).compile().unwrap();

        match table.find(&Method::DELETE, "/item") {
            RouteMatch::MethodNotAllowed(methods) => assert_eq!(methods, vec![Method::GET, Method::PUT]),
            _ => panic!("expected method not allowed"),
        }
        assert!(matches!(table.find(&Method::GET, "/missing"), RouteMatch::NotFound));
    }

    #[test]
    fn test_router_level_routes() {
        let (table, _) = Router::new()
            .route(Method::GET, "/", |ctx| {
                Box::pin(async move {
                    ctx.write("root");
                    Ok(())
                })
            })
            .compile()
            .unwrap();
        assert!(matches!(table.find(&Method::GET, "/"), RouteMatch::Found(_, _)));
    }

    #[test]
    fn test_params_are_percent_decoded() {
        let table = table(noop(RouteGroup::new("/"), Method::GET, "test/<id>"));
        let RouteMatch::Found(_, params) = table.find(&Method::GET, "/test/a%20b") else {
            panic!("route not found");
        };
        assert_eq!(params, vec![("id".to_string(), "a b".to_string())]);

        match table.find(&Method::GET, "/test/%FF") {
            RouteMatch::MalformedParam(name) => assert_eq!(name, "id"),
            _ => panic!("expected a malformed parameter"),
        }
    }

    #[test]
    fn test_literal_wins_over_param() {
        let group = noop(noop(RouteGroup::new("/users"), Method::GET, "<id>"), Method::GET, "new");
        let table = table(group);

        let RouteMatch::Found(route, params) = table.find(&Method::GET, "/users/new") else {
            panic!("route not found");
        };
        assert_eq!(route.pattern.as_str(), "/users/new");
        assert!(params.is_empty());
        assert!(matches!(table.find(&Method::GET, "/users/7"), RouteMatch::Found(_, _)));
        assert!(matches!(table.find(&Method::GET, "/users/7/extra"), RouteMatch::NotFound));
    }

    #[test]
    fn test_duplicate_route_is_rejected() {
        let group = noop(noop(RouteGroup::new("/"), Method::GET, "item"), Method::GET, "/item/");
        let Err(err) = Router::new().group(group).compile() else {
            panic!("duplicate route accepted");
        };
        assert_eq!(err.method, Method::GET);
        assert_eq!(err.pattern, "/item");
    }
}
