//! TCP port forwarder.
//!
//! ```text
//!     client ──▶ listener ──▶ scheduler ──▶ dialer ──▶ target
//!        ◀──────── upstream / downstream pumps ────────▶
//! ```
//!
//! Usage: `port-forwarder --server 9090 --target 127.0.0.1:22`

use std::process::ExitCode;

use clap::Parser;

use port_forwarder::config::Cli;
use port_forwarder::lifecycle::{signals, Shutdown};
use port_forwarder::observability::logging;
use port_forwarder::Server;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    logging::init(&config.observability);
    tracing::info!(
        "tunnel: {} --> {}",
        config.listen_display(),
        config.target_display()
    );

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let handle = match server.spawn(shutdown.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };
    tokio::spawn(signals::shutdown_on_interrupt(shutdown));

    let result = handle.wait().await;
    tracing::info!("Server closed");

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server stopped with an error");
            ExitCode::FAILURE
        }
    }
}
