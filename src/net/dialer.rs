//! Outbound connections to the fixed destination.
//!
//! # Responsibilities
//! - Resolve the target and try each address in turn
//! - Enforce the configured connect timeout
//! - Report failures without taking the accept loop down
//!
//! # Design Decisions
//! - A blocking and an async flavour; schedulers pick the one matching their model
//! - TCP_NODELAY is best effort: a relay should not add Nagle latency

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::config::TargetConfig;

/// Errors that can occur while dialing the destination.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("failed to resolve {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for {target}")]
    NoAddress { target: String },

    #[error("connection to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

fn target_label(target: &TargetConfig) -> String {
    format!("{}:{}", target.host, target.port)
}

fn connect_timeout(target: &TargetConfig) -> Duration {
    Duration::from_secs(target.connect_timeout_secs)
}

/// Resolve the target to every address worth trying, in order.
pub fn resolve(target: &TargetConfig) -> Result<Vec<SocketAddr>, DialError> {
    let addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|source| DialError::Resolve {
            target: target_label(target),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(DialError::NoAddress {
            target: target_label(target),
        });
    }
    Ok(addrs)
}

/// Open a blocking connection to the target.
pub fn connect_blocking(target: &TargetConfig) -> Result<TcpStream, DialError> {
    let timeout = connect_timeout(target);
    let mut last_err = None;

    for addr in resolve(target)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(address = %addr, error = %e, "Dial attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) if e.kind() == io::ErrorKind::TimedOut => DialError::Timeout {
            target: target_label(target),
            timeout,
        },
        Some(source) => DialError::Connect {
            target: target_label(target),
            source,
        },
        None => DialError::NoAddress {
            target: target_label(target),
        },
    })
}

/// Open a connection to the target on the current tokio runtime.
pub async fn connect(target: &TargetConfig) -> Result<tokio::net::TcpStream, DialError> {
    let timeout = connect_timeout(target);
    let attempt = tokio::net::TcpStream::connect((target.host.as_str(), target.port));

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true).ok();
            Ok(stream)
        }
        Ok(Err(source)) => Err(DialError::Connect {
            target: target_label(target),
            source,
        }),
        Err(_) => Err(DialError::Timeout {
            target: target_label(target),
            timeout,
        }),
    }
}

/// Log a failed dial the way every scheduler reports it.
pub fn report_failure(peer: SocketAddr, err: &DialError) {
    tracing::error!(peer_addr = %peer, error = %err, "Destination connection refused.");
}
