use axum::http::StatusCode;
use thiserror::Error;

/// A type-erased error returned by user code at trait seams
/// (modules, callbacks, hooks and handlers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error carrying the HTTP status the default error handler should write.
///
/// Handlers and hooks return it (boxed) when they want a specific status
/// instead of the generic `500`.
///
/// # Example
/// ```
/// use tessera::error::HttpError;
///
/// let err = HttpError::not_found("user 42 does not exist");
/// assert_eq!(err.status().as_u16(), 404);
/// ```
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
