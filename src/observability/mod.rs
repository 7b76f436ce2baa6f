//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listener, dialer, sessions, schedulers
//!     → tracing events with structured fields
//!       (connection_id, peer_addr, bytes, error)
//!     → logging.rs (fmt subscriber + EnvFilter)
//!     → stdout
//! ```
//!
//! # Design Decisions
//! - Log lines at connection open/close/error are the only telemetry
//! - Connection ID flows through every per-session event

pub mod logging;
