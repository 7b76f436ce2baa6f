//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Default transfer unit shared by every pump.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Root configuration for the port forwarder.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ForwardConfig {
    /// Where inbound connections are accepted.
    pub listener: ListenerConfig,

    /// The fixed destination every session dials.
    pub target: TargetConfig,

    /// Relay behaviour (buffer size, upgrade spoofing, scheduler).
    pub relay: RelayConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ForwardConfig {
    /// `host:port` of the listening socket, as configured.
    pub fn listen_display(&self) -> String {
        format!("{}:{}", self.listener.host, self.listener.port)
    }

    /// `host:port` of the destination, as configured.
    pub fn target_display(&self) -> String {
        format!("{}:{}", self.target.host, self.target.port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Port to bind. Port 0 asks the OS for a free one.
    pub port: u16,

    /// Pending-connection queue length passed to listen(2).
    pub backlog: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
            backlog: 128,
        }
    }
}

/// Destination configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    /// Destination host or IP.
    pub host: String,

    /// Destination port.
    pub port: u16,

    /// Outbound connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22,
            connect_timeout_secs: 10,
        }
    }
}

/// Relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum bytes moved by a single read.
    pub buffer_size: usize,

    /// Send a fake HTTP 101 response on every accepted connection.
    pub spoof_upgrade: bool,

    /// Concurrency strategy driving the pumps.
    pub scheduler: SchedulerKind,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            spoof_upgrade: false,
            scheduler: SchedulerKind::default(),
        }
    }
}

/// The three interchangeable ways of driving accept and relay work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// One thread polling every socket for readiness and dispatching handlers.
    #[default]
    Readiness,
    /// Single-threaded async tasks, two per session.
    Cooperative,
    /// One blocking OS thread per relay direction.
    Threaded,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::Readiness => "readiness",
            SchedulerKind::Cooperative => "cooperative",
            SchedulerKind::Threaded => "threaded",
        }
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ForwardConfig::default();
        assert_eq!(config.listen_display(), "0.0.0.0:9090");
        assert_eq!(config.target_display(), "127.0.0.1:22");
        assert_eq!(config.relay.buffer_size, 4096);
        assert!(!config.relay.spoof_upgrade);
        assert_eq!(config.relay.scheduler, SchedulerKind::Readiness);
    }

    #[test]
    fn scheduler_kind_deserializes_lowercase() {
        let relay: RelayConfig = toml::from_str("scheduler = \"threaded\"").unwrap();
        assert_eq!(relay.scheduler, SchedulerKind::Threaded);
        assert_eq!(relay.buffer_size, DEFAULT_BUFFER_SIZE);
    }
}
