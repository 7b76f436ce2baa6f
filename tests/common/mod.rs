//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use port_forwarder::config::SchedulerKind;
use port_forwarder::net::ConnectionTracker;
use port_forwarder::{ForwardConfig, Server, ServerHandle, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const SCHEDULERS: [SchedulerKind; 3] = [
    SchedulerKind::Readiness,
    SchedulerKind::Cooperative,
    SchedulerKind::Threaded,
];

/// Upper bound for any single network wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// A forwarder running on its own thread, listening on an ephemeral port.
pub struct TestForwarder {
    pub addr: SocketAddr,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
    handle: ServerHandle,
}

impl TestForwarder {
    pub async fn connect(&self) -> TcpStream {
        tokio::time::timeout(WAIT, TcpStream::connect(self.addr))
            .await
            .expect("connect timed out")
            .expect("connect failed")
    }

    /// Wait until every session released its sockets.
    pub async fn wait_for_idle(&self) {
        tokio::time::timeout(WAIT, self.tracker.wait_for_idle())
            .await
            .expect("sessions still open");
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(WAIT, self.handle.wait())
            .await
            .expect("server did not stop")
            .expect("server failed");
    }
}

/// Start a forwarder in front of `target`.
pub fn start_forwarder(kind: SchedulerKind, target: SocketAddr, spoof_upgrade: bool) -> TestForwarder {
    let mut config = ForwardConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.target.host = target.ip().to_string();
    config.target.port = target.port();
    config.target.connect_timeout_secs = 2;
    config.relay.scheduler = kind;
    config.relay.spoof_upgrade = spoof_upgrade;

    let server = Server::bind(config).unwrap();
    let addr = server.local_addr();
    let tracker = server.tracker();
    let shutdown = Shutdown::new();
    let handle = server.spawn(shutdown.clone()).unwrap();

    TestForwarder {
        addr,
        tracker,
        shutdown,
        handle,
    }
}

/// Start a target that echoes every byte back on an ephemeral port.
pub async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    serve_echo(listener);
    addr
}

/// Start an echo target on a specific address.
pub async fn start_echo_target_at(addr: SocketAddr) {
    let listener = TcpListener::bind(addr).await.unwrap();
    serve_echo(listener);
}

fn serve_echo(listener: TcpListener) {
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
}

/// Start a target that answers `PING` with `PONG` and then holds the connection.
pub async fn start_ping_pong_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                if socket.read_exact(&mut buf).await.is_ok() && &buf == b"PING" {
                    let _ = socket.write_all(b"PONG").await;
                }
                let mut rest = Vec::new();
                let _ = socket.read_to_end(&mut rest).await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub async fn read_exactly(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

/// True once the peer closed, by FIN or reset.
pub async fn is_closed_by_peer(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match tokio::time::timeout(WAIT, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            Ok(Ok(_)) => continue,
            Err(_) => return false,
        }
    }
}

/// Start a target that sends `greeting` to each connection and hangs up.
pub async fn start_closing_target(greeting: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(greeting).await;
            let _ = socket.shutdown().await;
        }
    });

    addr
}
