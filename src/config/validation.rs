//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer size, timeouts, ports)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ForwardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::ForwardConfig;

/// Largest accepted transfer unit.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyHost { field: &'static str },

    #[error("target.port must not be 0")]
    ZeroTargetPort,

    #[error("relay.buffer_size must be between 1 and {max}, got {0}", max = MAX_BUFFER_SIZE)]
    BufferSize(usize),

    #[error("target.connect_timeout_secs must be greater than 0")]
    ZeroConnectTimeout,

    #[error("listener.backlog must be greater than 0")]
    ZeroBacklog,

    #[error("unknown log level {0:?}")]
    LogLevel(String),
}

/// Check a merged configuration, collecting every problem found.
pub fn validate_config(config: &ForwardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost { field: "listener.host" });
    }
    if config.listener.backlog == 0 {
        errors.push(ValidationError::ZeroBacklog);
    }
    if config.target.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost { field: "target.host" });
    }
    if config.target.port == 0 {
        errors.push(ValidationError::ZeroTargetPort);
    }
    if config.target.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }
    if config.relay.buffer_size == 0 || config.relay.buffer_size > MAX_BUFFER_SIZE {
        errors.push(ValidationError::BufferSize(config.relay.buffer_size));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate_config(&ForwardConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ForwardConfig::default();
        config.target.host = " ".into();
        config.target.port = 0;
        config.relay.buffer_size = 0;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::EmptyHost { field: "target.host" }));
        assert!(errors.contains(&ValidationError::ZeroTargetPort));
        assert!(errors.contains(&ValidationError::BufferSize(0)));
        assert!(errors.contains(&ValidationError::LogLevel("loud".into())));
    }

    #[test]
    fn listen_port_zero_is_allowed() {
        let mut config = ForwardConfig::default();
        config.listener.port = 0;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn oversized_buffer_rejected() {
        let mut config = ForwardConfig::default();
        config.relay.buffer_size = MAX_BUFFER_SIZE + 1;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::BufferSize(MAX_BUFFER_SIZE + 1)])
        );
    }
}
