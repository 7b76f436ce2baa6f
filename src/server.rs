//! The forwarding server: one listener, one scheduler, one shutdown signal.
//!
//! # Responsibilities
//! - Bind the listener before anything else runs
//! - Build the configured scheduler and drive it on a dedicated thread
//! - Report the scheduler's exit to async callers
//!
//! # Design Decisions
//! - Every scheduler blocks the thread it runs on, so the server never
//!   runs one on a tokio worker
//! - Binding is separate from running so callers learn the bound port first

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::config::ForwardConfig;
use crate::lifecycle::Shutdown;
use crate::net::listener::{self, ListenerError};
use crate::net::ConnectionTracker;
use crate::scheduler::{self, RelayContext};

/// Error type for running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Bind(#[from] ListenerError),

    #[error("Scheduler failed: {0}")]
    Scheduler(#[from] io::Error),

    #[error("Server thread panicked")]
    Panicked,
}

/// A bound, not yet running, forwarding server.
#[derive(Debug)]
pub struct Server {
    context: RelayContext,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the configured listener.
    pub fn bind(config: ForwardConfig) -> Result<Self, ListenerError> {
        let (listener, local_addr) = listener::bind(&config.listener)?;

        tracing::info!(
            scheduler = %config.relay.scheduler,
            buffer_size = config.relay.buffer_size,
            "Server started on {}:{}",
            config.listener.host,
            local_addr.port()
        );

        Ok(Self {
            context: RelayContext::new(Arc::new(config), ConnectionTracker::new()),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live-session counter shared with the scheduler.
    pub fn tracker(&self) -> ConnectionTracker {
        self.context.tracker.clone()
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.context.config
    }

    /// Run the configured scheduler on the current thread until `shutdown`.
    pub fn run(self, shutdown: &Shutdown) -> Result<(), ServerError> {
        let kind = self.context.config.relay.scheduler;
        let scheduler = scheduler::build(kind, self.context);
        scheduler.run(self.listener, shutdown)?;
        Ok(())
    }

    /// Run on a dedicated thread and return a handle to await its exit.
    pub fn spawn(self, shutdown: Shutdown) -> Result<ServerHandle, ServerError> {
        let (tx, rx) = oneshot::channel();
        let local_addr = self.local_addr;

        thread::Builder::new()
            .name(format!("forwarder-{}", self.context.config.relay.scheduler))
            .spawn(move || {
                let result = self.run(&shutdown);
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Scheduler stopped with an error");
                }
                let _ = tx.send(result);
            })?;

        Ok(ServerHandle { local_addr, done: rx })
    }
}

/// Handle to a server running on its own thread.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    done: oneshot::Receiver<Result<(), ServerError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server thread to finish.
    ///
    /// A dropped sender means the thread unwound before reporting.
    pub async fn wait(self) -> Result<(), ServerError> {
        match self.done.await {
            Ok(result) => result,
            Err(_) => Err(ServerError::Panicked),
        }
    }
}
