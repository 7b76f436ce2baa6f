//! Command-line flags and their merge onto the file/default configuration.

use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::config::loader::{read_config, ConfigError};
use crate::config::schema::{ForwardConfig, SchedulerKind};
use crate::config::validation::validate_config;

#[derive(Debug, Parser)]
#[command(name = "port-forwarder")]
#[command(version, about = "A simple TCP port forwarder", long_about = None)]
#[command(override_usage = "port-forwarder --server 9090 --target 127.0.0.1:22")]
pub struct Cli {
    /// Address to listen on, e.g. 9090, :9090 or 0.0.0.0:9090
    #[arg(long, value_name = "HOST:PORT|PORT")]
    pub server: Option<String>,

    /// Destination, e.g. 127.0.0.1:22 or 10.0.0.5:3306
    #[arg(long, value_name = "HOST:PORT", required_unless_present = "config")]
    pub target: Option<String>,

    /// Answer every new connection with a fake "HTTP/1.1 101 Switching Protocols"
    #[arg(long = "fake-ws-reply")]
    pub fake_ws_reply: bool,

    /// Concurrency strategy driving the relay
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerKind>,

    /// Bytes moved per read
    #[arg(long, value_name = "BYTES")]
    pub buffer_size: Option<usize>,

    /// Outbound connect timeout
    #[arg(long = "connect-timeout", value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// TOML file with defaults; flags override it
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

/// Why an address flag could not be split.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("missing ']' after IPv6 host")]
    UnclosedBracket,

    #[error("IPv6 host must be bracketed, e.g. [{0}]:PORT")]
    UnbracketedIpv6(String),
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid --{flag} value {value:?}: {source}")]
    Address {
        flag: &'static str,
        value: String,
        #[source]
        source: AddressError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Split `HOST:PORT`, `:PORT`, `HOST:`, `[V6]:PORT`, `[V6]` or a bare `PORT`.
///
/// Missing parts fall back to the supplied defaults. IPv6 hosts need
/// brackets; a bare literal such as `::1` is rejected instead of being
/// split at one of its own colons.
pub fn parse_host_port(
    value: &str,
    default_host: &str,
    default_port: u16,
) -> Result<(String, u16), AddressError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AddressError::Empty);
    }

    let (host, port) = match value.strip_prefix('[') {
        Some(rest) => {
            let (host, after) = rest.split_once(']').ok_or(AddressError::UnclosedBracket)?;
            match after.strip_prefix(':') {
                Some(port) => (host, port),
                None if after.is_empty() => (host, ""),
                None => return Err(AddressError::InvalidPort(after.to_string())),
            }
        }
        None => match value.split_once(':') {
            Some((_, port)) if port.contains(':') => {
                return Err(AddressError::UnbracketedIpv6(value.to_string()));
            }
            Some((host, port)) => (host, port),
            None => ("", value),
        },
    };

    let host = if host.is_empty() { default_host } else { host };
    let port = if port.is_empty() {
        default_port
    } else {
        port.parse::<u16>()
            .map_err(|_| AddressError::InvalidPort(port.to_string()))?
    };

    Ok((host.to_string(), port))
}

impl Cli {
    /// Merge defaults, the optional config file and the flags, then validate.
    pub fn into_config(self) -> Result<ForwardConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ForwardConfig::default(),
        };

        if let Some(server) = &self.server {
            let (host, port) = parse_host_port(server, &config.listener.host, config.listener.port)
                .map_err(|source| CliError::Address {
                    flag: "server",
                    value: server.clone(),
                    source,
                })?;
            config.listener.host = host;
            config.listener.port = port;
        }

        if let Some(target) = &self.target {
            let (host, port) = parse_host_port(target, &config.target.host, config.target.port)
                .map_err(|source| CliError::Address {
                    flag: "target",
                    value: target.clone(),
                    source,
                })?;
            config.target.host = host;
            config.target.port = port;
        }

        if self.fake_ws_reply {
            config.relay.spoof_upgrade = true;
        }
        if let Some(kind) = self.scheduler {
            config.relay.scheduler = kind;
        }
        if let Some(size) = self.buffer_size {
            config.relay.buffer_size = size;
        }
        if let Some(secs) = self.connect_timeout {
            config.target.connect_timeout_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ForwardConfig, CliError> {
        let mut argv = vec!["port-forwarder"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().into_config()
    }

    #[test]
    fn bare_port_keeps_default_host() {
        assert_eq!(
            parse_host_port("8080", "0.0.0.0", 9090),
            Ok(("0.0.0.0".to_string(), 8080))
        );
    }

    #[test]
    fn empty_parts_fall_back() {
        assert_eq!(
            parse_host_port(":7000", "0.0.0.0", 9090),
            Ok(("0.0.0.0".to_string(), 7000))
        );
        assert_eq!(
            parse_host_port("10.0.0.5:", "127.0.0.1", 22),
            Ok(("10.0.0.5".to_string(), 22))
        );
    }

    #[test]
    fn ipv6_brackets_are_stripped() {
        assert_eq!(
            parse_host_port("[::1]:2222", "127.0.0.1", 22),
            Ok(("::1".to_string(), 2222))
        );
        assert_eq!(
            parse_host_port("[::1]", "127.0.0.1", 22),
            Ok(("::1".to_string(), 22))
        );
        assert_eq!(
            parse_host_port("[fe80::1]:", "127.0.0.1", 22),
            Ok(("fe80::1".to_string(), 22))
        );
    }

    #[test]
    fn bare_ipv6_rejected() {
        assert_eq!(
            parse_host_port("::1", "127.0.0.1", 22),
            Err(AddressError::UnbracketedIpv6("::1".into()))
        );
        assert_eq!(
            parse_host_port("fe80::1:22", "127.0.0.1", 22),
            Err(AddressError::UnbracketedIpv6("fe80::1:22".into()))
        );
        assert_eq!(
            parse_host_port("[::1", "127.0.0.1", 22),
            Err(AddressError::UnclosedBracket)
        );
        assert_eq!(
            parse_host_port("[::1]x", "127.0.0.1", 22),
            Err(AddressError::InvalidPort("x".into()))
        );
    }

    #[test]
    fn bad_port_rejected() {
        assert_eq!(
            parse_host_port("host:ssh", "127.0.0.1", 22),
            Err(AddressError::InvalidPort("ssh".into()))
        );
        assert_eq!(
            parse_host_port("99999", "127.0.0.1", 22),
            Err(AddressError::InvalidPort("99999".into()))
        );
        assert_eq!(parse_host_port("  ", "127.0.0.1", 22), Err(AddressError::Empty));
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--server",
            "7070",
            "--target",
            "10.0.0.5:3306",
            "--fake-ws-reply",
            "--scheduler",
            "threaded",
            "--buffer-size",
            "8192",
        ])
        .unwrap();

        assert_eq!(config.listen_display(), "0.0.0.0:7070");
        assert_eq!(config.target_display(), "10.0.0.5:3306");
        assert!(config.relay.spoof_upgrade);
        assert_eq!(config.relay.scheduler, SchedulerKind::Threaded);
        assert_eq!(config.relay.buffer_size, 8192);
    }

    #[test]
    fn target_is_required_without_config_file() {
        assert!(Cli::try_parse_from(["port-forwarder", "--server", "9090"]).is_err());
    }

    #[test]
    fn invalid_target_reports_flag() {
        let err = parse(&["--target", "localhost:abc"]).unwrap_err();
        assert!(err.to_string().contains("--target"));
    }

    #[test]
    fn merged_config_is_validated() {
        let err = parse(&["--target", "127.0.0.1:22", "--buffer-size", "0"]).unwrap_err();
        assert!(matches!(err, CliError::Config(ConfigError::Validation(_))));
    }
}
