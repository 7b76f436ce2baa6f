//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! built-in defaults
//!     → loader.rs (optional TOML file, parse & deserialize)
//!     → cli.rs (flag overrides, HOST:PORT splitting)
//!     → validation.rs (semantic checks)
//!     → ForwardConfig (validated, immutable)
//!     → shared via Arc with the server and its scheduler
//! ```
//!
//! # Design Decisions
//! - Config is immutable once built; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use cli::Cli;
pub use loader::ConfigError;
pub use schema::ForwardConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::RelayConfig;
pub use schema::SchedulerKind;
pub use schema::TargetConfig;
