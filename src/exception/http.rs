use crate::context::RequestContext;
use crate::dispatch::DispatchError;
use crate::error::BoxError;
use crate::exception::ErrorHandler;
use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderValue;
use serde_json::json;

/// The default error handler
///
/// Logs the failure and writes
/// `{"statusCode": .., "message": .., "timestamp": ..}` with the error's status.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpErrorHandler;

impl ErrorHandler for HttpErrorHandler {
    fn handle(&self, ctx: &mut RequestContext, error: &DispatchError) -> Result<(), BoxError> {
        let status = error.status();
        if status.is_server_error() {
            tracing::error!(request_id = %ctx.request_id(), path = ctx.path(), "Request failed: {}", error);
        } else {
            tracing::debug!(request_id = %ctx.request_id(), path = ctx.path(), "Request rejected: {}", error);
        }

        let body = serde_json::to_vec(&json!({
            "statusCode": status.as_u16(),
            "message": error.public_message(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))?;

        let response = ctx.response_mut();
        response.reset();
        response.set_status(status);
        response.insert_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response.write(&body);
        Ok(())
    }
}
