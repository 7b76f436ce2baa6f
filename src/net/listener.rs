//! TCP listener setup.
//!
//! # Responsibilities
//! - Resolve and bind the configured address
//! - Enable address reuse so restarts don't wait out TIME_WAIT
//! - Hand a plain std listener to whichever scheduler runs
//!
//! # Design Decisions
//! - No bind retries: any failure here is fatal
//! - socket2 is used because std cannot set SO_REUSEADDR before bind

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured host did not resolve to any address.
    #[error("Failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to create, bind or listen on the socket.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Resolve the listener host to the first matching socket address.
pub fn resolve(config: &ListenerConfig) -> Result<SocketAddr, ListenerError> {
    let address = format!("{}:{}", config.host, config.port);
    let mut addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            address: address.clone(),
            source,
        })?;

    addrs.next().ok_or_else(|| ListenerError::Resolve {
        address,
        source: io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
    })
}

/// Bind a listening socket with SO_REUSEADDR enabled.
///
/// Returns the listener with the address it actually bound (the real port
/// when 0 was configured). The listener is in blocking mode; schedulers
/// switch it to non-blocking themselves when they need to.
pub fn bind(config: &ListenerConfig) -> Result<(TcpListener, SocketAddr), ListenerError> {
    let address = resolve(config)?;
    let bind_err = |source| ListenerError::Bind { address, source };

    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&address.into()).map_err(bind_err)?;
    let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(bind_err)?;

    let listener: TcpListener = socket.into();
    let local_addr = listener.local_addr().map_err(bind_err)?;

    tracing::debug!(
        address = %local_addr,
        backlog = config.backlog,
        "Listener bound"
    );

    Ok((listener, local_addr))
}

/// An address a local client can connect to in order to reach `bound`.
///
/// Wildcard binds are reachable through loopback.
pub fn loopback_for(bound: SocketAddr) -> SocketAddr {
    match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), bound.port())
        }
        _ => bound,
    }
}
