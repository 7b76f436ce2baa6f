//! Thread-per-direction scheduler.
//!
//! # Responsibilities
//! - Accept with a blocking call on the server thread
//! - Give each session its own thread, which dials, upgrades and runs the
//!   downstream pump while a scoped sibling thread runs the upstream pump
//! - Keep a registry of session threads for visibility only
//!
//! # Design Decisions
//! - Both pumps borrow the session (`thread::scope`), so teardown waits for
//!   both to finish instead of each thread mutating shared bookkeeping
//! - A blocking accept is woken on shutdown by a loopback connection

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::lifecycle::Shutdown;
use crate::net::{dialer, listener, upgrade};
use crate::relay::pump::relay_blocking;
use crate::relay::{Direction, Session, Termination};
use crate::scheduler::{RelayContext, Scheduler};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ThreadedScheduler {
    ctx: RelayContext,
    threads: ThreadRegistry,
}

impl ThreadedScheduler {
    pub fn new(ctx: RelayContext) -> Self {
        Self {
            ctx,
            threads: ThreadRegistry::default(),
        }
    }

    fn spawn_session(&mut self, inbound: TcpStream, peer: SocketAddr) {
        let ctx = self.ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("session-{peer}"))
            .spawn(move || run_session(ctx, inbound, peer));

        match spawned {
            Ok(handle) => self.threads.insert(peer, handle),
            Err(e) => {
                tracing::error!(peer_addr = %peer, error = %e, "Failed to spawn session thread");
            }
        }
    }
}

impl Scheduler for ThreadedScheduler {
    fn run(mut self: Box<Self>, listener: TcpListener, shutdown: &Shutdown) -> io::Result<()> {
        listener.set_nonblocking(false)?;

        let wake_addr = listener::loopback_for(listener.local_addr()?);
        shutdown.on_trigger(move || {
            if let Err(e) = wake_accept(wake_addr) {
                tracing::warn!(error = %e, "Failed to wake accept loop");
            }
        });

        loop {
            let accepted = listener.accept();
            if shutdown.is_triggered() {
                break;
            }

            match accepted {
                Ok((inbound, peer)) => {
                    self.threads.reap();
                    self.spawn_session(inbound, peer);
                    tracing::debug!(live_sessions = self.threads.len(), "Session thread started");
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                }
            }
        }

        self.threads.reap();
        tracing::debug!(
            detached = self.threads.len(),
            "Accept loop stopped, leaving live session threads detached"
        );
        Ok(())
    }
}

/// Unblock a blocking `accept` on `addr` from a short-lived thread.
///
/// Returns without waiting for the connect, so it is safe to call from
/// inside `Shutdown::trigger` on an async worker.
fn wake_accept(addr: SocketAddr) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("accept-wake".into())
        .spawn(move || {
            // Only the handshake matters; the stream is dropped right away.
            let _ = TcpStream::connect_timeout(&addr, WAKE_TIMEOUT);
        })
}

/// Join handles of session threads, keyed by peer.
///
/// Purely advisory: nothing relies on it for correctness.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    handles: Vec<(SocketAddr, JoinHandle<()>)>,
}

impl ThreadRegistry {
    pub fn insert(&mut self, peer: SocketAddr, handle: JoinHandle<()>) {
        self.handles.push((peer, handle));
    }

    /// Drop entries whose thread has returned.
    pub fn reap(&mut self) {
        self.handles.retain(|(_, handle)| !handle.is_finished());
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

fn run_session(ctx: RelayContext, inbound: TcpStream, peer: SocketAddr) {
    inbound.set_nodelay(true).ok();

    let outbound = match dialer::connect_blocking(&ctx.config.target) {
        Ok(stream) => stream,
        Err(e) => {
            dialer::report_failure(peer, &e);
            let _ = inbound.shutdown(std::net::Shutdown::Both);
            return;
        }
    };

    let session = Session::new(ctx.tracker.track(), inbound, outbound);
    session.log_established();

    if ctx.spoof_upgrade() && session.claim_upgrade() {
        match upgrade::reply_blocking(session.inbound()) {
            Ok(()) => tracing::info!(connection_id = %session.id(), "Upgrade response sent"),
            Err(e) => {
                session.terminate(Termination::Failed {
                    direction: Direction::Downstream,
                    error: upgrade_io_error(e),
                });
                session.mark_closed();
                return;
            }
        }
    }

    if !session.activate() {
        session.mark_closed();
        return;
    }

    let buffer_size = ctx.buffer_size();
    let session = &session;
    thread::scope(|scope| {
        let upstream = thread::Builder::new()
            .name(format!("{}-up", session.id()))
            .spawn_scoped(scope, move || pump(session, Direction::Upstream, buffer_size));

        match upstream {
            Ok(_) => pump(session, Direction::Downstream, buffer_size),
            Err(error) => {
                session.terminate(Termination::Failed {
                    direction: Direction::Upstream,
                    error,
                });
            }
        }
    });

    session.mark_closed();
}

fn pump(session: &Session<TcpStream>, direction: Direction, buffer_size: usize) {
    let source = session.endpoint(direction.source());
    let dest = session.endpoint(direction.dest());

    let outcome = relay_blocking(source, dest, buffer_size);
    session.add_transferred(direction, outcome.bytes());
    session.terminate(outcome.into_termination(direction));
}

fn upgrade_io_error(err: upgrade::UpgradeError) -> io::Error {
    match err {
        upgrade::UpgradeError::Io(e) => e,
        upgrade::UpgradeError::PeerClosed => io::ErrorKind::UnexpectedEof.into(),
    }
}
