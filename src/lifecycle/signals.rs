//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGINT, and SIGTERM on unix)
//! - Translate the first signal into a shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A handler that fails to install is logged and simply never fires

use crate::lifecycle::Shutdown;

/// Wait until the process is asked to stop.
pub async fn wait_for_interrupt() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Interrupt received"),
        _ = terminate => tracing::info!("Terminate signal received"),
    }
}

/// Trigger `shutdown` on the first interrupt.
pub async fn shutdown_on_interrupt(shutdown: Shutdown) {
    wait_for_interrupt().await;
    shutdown.trigger();
}
