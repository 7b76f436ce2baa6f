//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listener.rs (bind with SO_REUSEADDR)
//!     → scheduler accepts an inbound connection
//!     → dialer.rs (outbound connect to the fixed target, with timeout)
//!     → upgrade.rs (optional fake 101 reply on the inbound side)
//!     → relay::Session owns both endpoint.rs sockets
//!
//! connection.rs issues each session an ID and counts live sessions.
//! ```
//!
//! # Design Decisions
//! - A failed dial drops the inbound socket and keeps accepting
//! - Sockets stay concrete per scheduler; `Endpoint` covers what sessions share

pub mod connection;
pub mod dialer;
pub mod endpoint;
pub mod listener;
pub mod upgrade;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use endpoint::Endpoint;
