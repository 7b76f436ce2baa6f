//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs → server.rs):
//!     Parse flags → Validate config → Init logging → Bind listener → Run scheduler
//!
//! Shutdown (shutdown.rs):
//!     Signal received → trigger() → wake hooks / watch subscribers → accept loop exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: a bind error is fatal, nothing is retried
//! - Shutdown stops accepting; open sessions are dropped with the scheduler

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
