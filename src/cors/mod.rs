//! Cross-origin resource sharing
//!
//! [`CorsPolicy`] collects the allowed origins, methods and headers and is
//! turned into a `tower_http` CORS service when the router is built. The
//! pipeline asks that service which headers a request gets; it never wraps
//! the pipeline itself, so preflights still pass through access logging.

use crate::context::{RequestContext, ResponseBuffer};
use axum::body::Body;
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::{Ready, ready};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowOrigin, Cors, CorsLayer, ExposeHeaders};

/// Which cross-origin requests are allowed
///
/// Responses to requests without an `Origin` header are left untouched.
/// A `*` origin or header combined with credentials mirrors the request
/// instead, since browsers reject a literal wildcard there.
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    any_origin: bool,
    origins: Vec<HeaderValue>,
    methods: Vec<Method>,
    any_header: bool,
    headers: Vec<HeaderName>,
    any_exposed: bool,
    exposed: Vec<HeaderName>,
    allow_credentials: bool,
    max_age: Option<Duration>,
}

impl CorsPolicy {
    /// A policy that allows nothing until configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Any origin, the common methods and any request header.
    pub fn allow_all() -> Self {
        Self::new()
            .allow_origin("*")
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::HEAD,
                Method::OPTIONS,
            ])
            .allow_header("*")
            .max_age(Duration::from_secs(86400))
    }

    pub fn allow_origin(mut self, origin: impl AsRef<str>) -> Self {
        let origin = origin.as_ref();
        if origin == "*" {
            self.any_origin = true;
        } else {
            match HeaderValue::from_str(origin) {
                Ok(value) => self.origins.push(value),
                Err(_) => tracing::warn!(origin, "Ignoring invalid CORS origin"),
            }
        }
        self
    }

    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods.extend(methods);
        self
    }

    pub fn allow_header(mut self, header: impl AsRef<str>) -> Self {
        match parse_header(header.as_ref()) {
            Some(Some(name)) => self.headers.push(name),
            Some(None) => self.any_header = true,
            None => {}
        }
        self
    }

    pub fn expose_header(mut self, header: impl AsRef<str>) -> Self {
        match parse_header(header.as_ref()) {
            Some(Some(name)) => self.exposed.push(name),
            Some(None) => self.any_exposed = true,
            None => {}
        }
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn is_preflight(method: &Method, headers: &HeaderMap) -> bool {
        method == Method::OPTIONS && headers.contains_key(ORIGIN) && headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    }

    fn layer(&self) -> CorsLayer {
        let origin = match (self.any_origin, self.allow_credentials) {
            (true, false) => AllowOrigin::any(),
            (true, true) => AllowOrigin::mirror_request(),
            (false, _) => AllowOrigin::list(self.origins.clone()),
        };
        let headers = match (self.any_header, self.allow_credentials) {
            (true, false) => AllowHeaders::any(),
            (true, true) => AllowHeaders::mirror_request(),
            (false, _) => AllowHeaders::list(self.headers.clone()),
        };
        let exposed = if self.any_exposed && !self.allow_credentials {
            ExposeHeaders::any()
        } else {
            ExposeHeaders::list(self.exposed.clone())
        };

        let layer = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(self.methods.clone())
            .allow_headers(headers)
            .expose_headers(exposed)
            .allow_credentials(self.allow_credentials);
        match self.max_age {
            Some(max_age) => layer.max_age(max_age),
            None => layer,
        }
    }

    pub(crate) fn into_service(self) -> CorsService {
        CorsService {
            inner: self.layer().layer(Blank),
        }
    }
}

/// `Some(None)` for the `*` wildcard, `None` for an invalid name.
fn parse_header(header: &str) -> Option<Option<HeaderName>> {
    if header == "*" {
        return Some(None);
    }
    match HeaderName::from_bytes(header.as_bytes()) {
        Ok(name) => Some(Some(name)),
        Err(_) => {
            tracing::warn!(header, "Ignoring invalid CORS header name");
            None
        }
    }
}

/// The innermost service of the CORS stack; only its headers matter.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Blank;

impl Service<Request<Body>> for Blank {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Ready<Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: Request<Body>) -> Self::Future {
        ready(Ok(Response::new(Body::empty())))
    }
}

/// A [`CorsPolicy`] compiled into a `tower_http` service
#[derive(Clone)]
pub(crate) struct CorsService {
    inner: Cors<Blank>,
}

impl CorsService {
    /// The response `tower_http` gives for this request's method, URI and headers.
    async fn evaluate(&self, ctx: &RequestContext) -> Response<Body> {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = ctx.method().clone();
        *request.uri_mut() = ctx.uri().clone();
        *request.headers_mut() = ctx.headers().clone();

        match self.inner.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }

    /// Answer a preflight request. Returns `true` when the request is finished;
    /// a refused origin gets `403`.
    pub(crate) async fn preflight(&self, ctx: &mut RequestContext) -> bool {
        if !CorsPolicy::is_preflight(ctx.method(), ctx.headers()) {
            return false;
        }

        let answer = self.evaluate(ctx).await;
        let response = ctx.response_mut();
        if answer.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
            response.set_status(answer.status());
            merge(answer.headers(), response);
        } else {
            response.set_status(StatusCode::FORBIDDEN);
        }
        true
    }

    /// Add CORS headers to the final response of a cross-origin request.
    pub(crate) async fn apply(&self, ctx: &mut RequestContext) {
        if !ctx.headers().contains_key(ORIGIN) || CorsPolicy::is_preflight(ctx.method(), ctx.headers()) {
            return;
        }
        let answer = self.evaluate(ctx).await;
        merge(answer.headers(), ctx.response_mut());
    }
}

fn merge(headers: &HeaderMap, response: &mut ResponseBuffer) {
    for (name, value) in headers {
        if name == VARY {
            response.append_header(name.clone(), value.clone());
        } else {
            response.insert_header(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedContext;
    use axum::http::Uri;
    use axum::http::header::{ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_MAX_AGE};
    use std::sync::Arc;

    fn context(method: Method, origin: &'static str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static(origin));
        RequestContext::new(Arc::new(SharedContext::new()), method, Uri::from_static("/items")).with_headers(headers)
    }

    #[tokio::test]
    async fn test_allow_all_sets_wildcard() {
        let mut ctx = context(Method::GET, "https://a.example");
        CorsPolicy::allow_all().into_service().apply(&mut ctx).await;
        assert_eq!(ctx.response().headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn test_unlisted_origin_untouched() {
        let service = CorsPolicy::new().allow_origin("https://a.example").into_service();

        let mut ctx = context(Method::GET, "https://b.example");
        service.apply(&mut ctx).await;
        assert!(!ctx.response().headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN));

        let mut ctx = context(Method::GET, "https://a.example");
        service.apply(&mut ctx).await;
        assert_eq!(ctx.response().headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.example");
        assert!(ctx.response().headers().contains_key(VARY));
    }

    #[tokio::test]
    async fn test_request_without_origin_untouched() {
        let mut ctx = RequestContext::new(Arc::new(SharedContext::new()), Method::GET, Uri::from_static("/"));
        CorsPolicy::allow_all().into_service().apply(&mut ctx).await;
        assert!(ctx.response().headers().is_empty());
    }

    #[tokio::test]
    async fn test_preflight() {
        let preflight = |origin: &'static str| {
            let mut ctx = context(Method::OPTIONS, origin);
            let mut headers = ctx.headers().clone();
            headers.insert(ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("PUT"));
            ctx = ctx.with_headers(headers);
            ctx
        };
        assert!(!CorsPolicy::is_preflight(&Method::OPTIONS, context(Method::OPTIONS, "https://a.example").headers()));

        let mut ctx = preflight("https://a.example");
        assert!(CorsPolicy::is_preflight(ctx.method(), ctx.headers()));
        assert!(!CorsPolicy::is_preflight(&Method::GET, ctx.headers()));

        assert!(CorsPolicy::allow_all().into_service().preflight(&mut ctx).await);
        assert_eq!(ctx.response().status(), StatusCode::OK);
        assert_eq!(ctx.response().headers()[ACCESS_CONTROL_MAX_AGE], "86400");

        let mut refused = preflight("https://b.example");
        let service = CorsPolicy::new().allow_origin("https://a.example").into_service();
        assert!(service.preflight(&mut refused).await);
        assert_eq!(refused.response().status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_credentials_mirror_wildcard_origin() {
        let mut ctx = context(Method::GET, "https://a.example");
        CorsPolicy::allow_all()
            .allow_credentials(true)
            .into_service()
            .apply(&mut ctx)
            .await;
        assert_eq!(ctx.response().headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.example");
        assert_eq!(ctx.response().headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }
}
