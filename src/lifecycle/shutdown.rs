//! Shutdown signal
//!
//! Resolves when the process receives Ctrl+C or SIGTERM.

use tokio::signal;

/// Create a future that completes when a shutdown signal is received
///
/// If a signal handler cannot be installed the failure is logged and that
/// signal source is ignored.
///
/// # Example
///
/// ```rust,ignore
/// use tessera::lifecycle::shutdown_signal;
///
/// engine.startup().await?;
/// engine.start_servers().await?;
/// shutdown_signal().await;
/// engine.shutdown().await?;
/// ```
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
