//! Error and panic strategies
//!
//! Every failure during dispatch reaches exactly one of these: errors go to
//! the [`ErrorHandler`], panics to the [`PanicLogger`].

use crate::context::RequestContext;
use crate::dispatch::DispatchError;
use crate::error::BoxError;

pub mod http;

pub use http::HttpErrorHandler;

/// Turns a failed request into a response
///
/// The handler may log and write to the response buffer. If it returns an
/// error the pipeline discards whatever it wrote and sends `500`. If it
/// returns `Ok` without writing anything the pipeline sends the error's
/// status with an empty body.
///
/// Implemented for any `Fn(&mut RequestContext, &DispatchError) -> Result<(), BoxError>`.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut RequestContext, error: &DispatchError) -> Result<(), BoxError>;
}

impl<F> ErrorHandler for F
where
    F: Fn(&mut RequestContext, &DispatchError) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut RequestContext, error: &DispatchError) -> Result<(), BoxError> {
        self(ctx, error)
    }
}

/// Observes a recovered panic before the `500` fallback is sent
///
/// Must not panic itself; if it does, the second panic is swallowed.
pub trait PanicLogger: Send + Sync + 'static {
    fn log_panic(&self, ctx: &RequestContext, message: &str);
}

impl<F> PanicLogger for F
where
    F: Fn(&RequestContext, &str) + Send + Sync + 'static,
{
    fn log_panic(&self, ctx: &RequestContext, message: &str) {
        self(ctx, message)
    }
}

/// Default panic logger: one `error` event per recovered panic
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPanicLogger;

impl PanicLogger for TracingPanicLogger {
    fn log_panic(&self, ctx: &RequestContext, message: &str) {
        tracing::error!(
            request_id = %ctx.request_id(),
            method = %ctx.method(),
            path = ctx.path(),
            "Recovered from panic: {}",
            message
        );
    }
}
