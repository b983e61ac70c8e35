//! Process-wide logging setup
//!
//! The engine and its pipeline log through `tracing`. Binaries call [`init`]
//! once to install a global subscriber; named loggers built by the
//! [`LoggerModule`](crate::logger::LoggerModule) are configured separately.
//!
//! ```rust,no_run
//! use tessera::logging;
//! use tessera::logger::Format;
//!
//! logging::init(Some("debug"), Format::Json).expect("another subscriber is installed");
//! ```

use crate::error::BoxError;
use crate::logger::Format;
use std::sync::OnceLock;
use tracing::{Span, info_span};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub mod level {
    pub const TRACE: &str = "trace";
    pub const DEBUG: &str = "debug";
    pub const INFO: &str = "info";
    pub const WARN: &str = "warn";
    pub const ERROR: &str = "error";
}

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_level`; with neither, `info` is used. Calling it
/// again after a successful call does nothing; it fails only when some other
/// global subscriber is already installed.
pub fn init(default_level: Option<&str>, format: Format) -> Result<(), BoxError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.unwrap_or(level::INFO)));
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    let installed = match format {
        Format::Json => tracing_subscriber::fmt()
            .json()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        Format::Text => tracing_subscriber::fmt()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
    };

    installed.map(|()| {
        let _ = INITIALIZED.set(());
    })
}

/// The span every request is dispatched in
pub fn request_span(request_id: Uuid, method: &str, path: &str) -> Span {
    info_span!("request", %request_id, method, path)
}
