//! Per-request failures handed to the error handler

use crate::error::{BoxError, HttpError};
use axum::http::StatusCode;
use std::time::Duration;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;

/// Which half of a hook pair failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum HookStage {
    Startup,
    Shutdown,
}

/// Why a request could not be served normally
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A request hook failed; the handler did not run
    #[error("Hook '{hook}' failed on {stage}: {source}")]
    Hook {
        hook: String,
        stage: HookStage,
        #[source]
        source: BoxError,
    },

    #[error("Handler failed: {0}")]
    Handler(#[source] BoxError),

    /// The engine shut down and the request outlived the graceful window
    #[error("Request interrupted after {0:?} of graceful shutdown")]
    Timeout(Duration),

    /// The request body did not arrive within the read timeout
    #[error("Request body not received within {0:?}")]
    ReadTimeout(Duration),

    /// The request body is larger than the server's body limit
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Failed to read request: {0}")]
    Transport(#[source] BoxError),

    #[error("Panic: {0}")]
    Panic(String),
}

impl DispatchError {
    /// The status the default error handler writes for this failure.
    ///
    /// An [`HttpError`] returned by a hook or handler keeps its own status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Hook { source, .. } | Self::Handler(source) => source
                .downcast_ref::<HttpError>()
                .map(HttpError::status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ReadTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Transport(_) => StatusCode::BAD_REQUEST,
            Self::Panic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A message safe to show to clients.
    ///
    /// Only [`HttpError`] messages are passed through; other failures are
    /// summarized by their status.
    pub fn public_message(&self) -> String {
        let http = match self {
            Self::Hook { source, .. } | Self::Handler(source) => source.downcast_ref::<HttpError>(),
            _ => None,
        };
        match http {
            Some(err) => err.message().to_string(),
            None => self
                .status()
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string(),
        }
    }
}
