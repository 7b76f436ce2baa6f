//! TCP port forwarder library.
//!
//! Accepts connections on one address, dials a fixed target for each, and
//! relays bytes both ways until either side closes. The relay can be driven
//! by one of three schedulers, picked at startup.

pub mod config;
pub mod net;
pub mod relay;
pub mod scheduler;
pub mod server;

pub mod lifecycle;
pub mod observability;

pub use config::schema::ForwardConfig;
pub use lifecycle::Shutdown;
pub use server::{Server, ServerError, ServerHandle};
