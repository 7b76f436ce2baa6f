//! Concurrency strategies that drive accept and relay work.
//!
//! # Data Flow
//! ```text
//! Server::run
//!     → build(kind, ctx) picks exactly one scheduler
//!     → scheduler.run(listener, shutdown) loops until shutdown
//!         accept → dial → Session → two pumps → teardown
//! ```
//!
//! # Strategies
//! - `readiness`: one thread, mio poll, typed handler table per token
//! - `cooperative`: one thread, tokio current-thread runtime, two tasks per session
//! - `threaded`: blocking I/O, one OS thread per relay direction
//!
//! All three log the same lines and relay bytes with the same semantics.

pub mod cooperative;
pub mod readiness;
pub mod threaded;

use std::io;
use std::net::TcpListener;
use std::sync::Arc;

use crate::config::{ForwardConfig, SchedulerKind};
use crate::lifecycle::Shutdown;
use crate::net::ConnectionTracker;

pub use cooperative::CooperativeScheduler;
pub use readiness::ReadinessScheduler;
pub use threaded::ThreadedScheduler;

/// What every scheduler needs from the server that owns it.
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub config: Arc<ForwardConfig>,
    pub tracker: ConnectionTracker,
}

impl RelayContext {
    pub fn new(config: Arc<ForwardConfig>, tracker: ConnectionTracker) -> Self {
        Self { config, tracker }
    }

    pub fn buffer_size(&self) -> usize {
        self.config.relay.buffer_size
    }

    pub fn spoof_upgrade(&self) -> bool {
        self.config.relay.spoof_upgrade
    }
}

/// A strategy for accepting connections and pumping their bytes.
pub trait Scheduler: Send {
    /// Serve `listener` until `shutdown` is triggered.
    ///
    /// Blocks the calling thread. Sessions still open when this returns are
    /// dropped with the scheduler or left to finish on their own threads.
    fn run(self: Box<Self>, listener: TcpListener, shutdown: &Shutdown) -> io::Result<()>;
}

/// Build the scheduler selected by configuration.
pub fn build(kind: SchedulerKind, ctx: RelayContext) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Readiness => Box::new(ReadinessScheduler::new(ctx)),
        SchedulerKind::Cooperative => Box::new(CooperativeScheduler::new(ctx)),
        SchedulerKind::Threaded => Box::new(ThreadedScheduler::new(ctx)),
    }
}
