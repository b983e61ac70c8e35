//! Request-scoped context
//!
//! A [`RequestContext`] is created per inbound request as a derivation of the
//! [`SharedContext`]. Reads fall through to the shared store; writes stay local
//! to the request and are dropped with it.

use super::{ContextKey, SharedContext, Slot, Value};
use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_TYPE, HeaderName};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, Version};
use axum::response::Response;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Per-request state flowing through hooks and the handler.
pub struct RequestContext {
    shared: Arc<SharedContext>,
    locals: HashMap<Slot, Value>,
    request_id: Uuid,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    body: Bytes,
    params: Vec<(String, String)>,
    content_type: Option<&'static str>,
    language: Option<String>,
    response: ResponseBuffer,
}

impl RequestContext {
    /// Create a context for a bodiless request.
    pub fn new(shared: Arc<SharedContext>, method: Method, uri: Uri) -> Self {
        Self {
            shared,
            locals: HashMap::new(),
            request_id: Uuid::new_v4(),
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            remote_addr: None,
            body: Bytes::new(),
            params: Vec::new(),
            content_type: None,
            language: None,
            response: ResponseBuffer::default(),
        }
    }

    pub(crate) fn from_parts(shared: Arc<SharedContext>, parts: Parts) -> Self {
        let remote_addr = parts
            .extensions
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let mut ctx = Self::new(shared, parts.method, parts.uri);
        ctx.version = parts.version;
        ctx.headers = parts.headers;
        ctx.remote_addr = remote_addr;
        ctx
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Read a value, preferring one set on this request over the shared store.
    pub fn value<T: Send + Sync + 'static>(&self, key: &ContextKey<T>) -> Option<Arc<T>> {
        let slot = key.slot();
        let value = match self.locals.get(&slot) {
            Some(local) => Arc::clone(local),
            None => self.shared.get_slot(&slot)?,
        };
        value.downcast::<T>().ok()
    }

    /// Set a value visible to the rest of this request only.
    pub fn set_value<T: Send + Sync + 'static>(&mut self, key: &ContextKey<T>, value: T) {
        self.locals.insert(key.slot(), Arc::new(value));
    }

    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as text, if present and valid UTF-8.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref())?.to_str().ok()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// A path parameter captured by the matched route pattern.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// The response media type chosen by the type negotiator.
    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    pub(crate) fn set_content_type(&mut self, content_type: &'static str) {
        self.content_type = Some(content_type);
    }

    /// The language chosen by the language negotiator.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub(crate) fn set_language(&mut self, language: String) {
        self.language = Some(language);
    }

    pub fn response(&self) -> &ResponseBuffer {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseBuffer {
        &mut self.response
    }

    /// Append bytes to the response body.
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.response.write(bytes.as_ref());
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    /// Turn the buffered response into an axum response, applying the
    /// negotiated content type when the handler set none.
    pub(crate) fn take_response(&mut self) -> Response {
        let mut response = std::mem::take(&mut self.response);
        if !response.headers.contains_key(CONTENT_TYPE) {
            if let Some(content_type) = self.content_type {
                response
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        response.into_response()
    }
}

/// The response written by hooks, the handler and the error strategies.
///
/// Nothing reaches the client until the pipeline finishes, so an error
/// handler can still replace whatever was written.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseBuffer {
    /// The status to send; `200 OK` when none was set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Add a value without replacing existing ones, as for `Vary`.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn bytes_written(&self) -> usize {
        self.body.len()
    }

    /// Whether a status or any body bytes have been written.
    pub fn is_written(&self) -> bool {
        self.status.is_some() || !self.body.is_empty()
    }

    /// Discard everything written so far.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}
