//! Single-threaded cooperative scheduler.
//!
//! # Responsibilities
//! - Run a tokio current-thread runtime with a `LocalSet` on the server thread
//! - Accept in one task; give every session a task that dials, upgrades and
//!   spawns its two pump tasks
//! - Stop accepting when shutdown is triggered
//!
//! # Design Decisions
//! - Tasks only suspend while waiting for a socket to become readable or
//!   writable (see `relay::pump`), so a buffer is never split between turns
//! - Sessions are `Rc`-shared between their pump tasks; nothing crosses threads
//! - Dropping the `LocalSet` on shutdown drops every remaining session

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{self, LocalSet};

use crate::lifecycle::Shutdown;
use crate::net::dialer;
use crate::net::endpoint::Endpoint;
use crate::net::upgrade::{self, UpgradeError};
use crate::relay::pump::relay_async;
use crate::relay::{Direction, Session, Termination};
use crate::scheduler::{RelayContext, Scheduler};

pub struct CooperativeScheduler {
    ctx: RelayContext,
}

impl CooperativeScheduler {
    pub fn new(ctx: RelayContext) -> Self {
        Self { ctx }
    }
}

impl Scheduler for CooperativeScheduler {
    fn run(self: Box<Self>, listener: std::net::TcpListener, shutdown: &Shutdown) -> io::Result<()> {
        listener.set_nonblocking(true)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let local = LocalSet::new();

        local.block_on(&runtime, accept_loop(self.ctx, listener, shutdown.subscribe()))
    }
}

async fn accept_loop(
    ctx: RelayContext,
    listener: std::net::TcpListener,
    mut stop: watch::Receiver<bool>,
) -> io::Result<()> {
    let listener = TcpListener::from_std(listener)?;

    loop {
        tokio::select! {
            biased;
            _ = stop.wait_for(|stopped| *stopped) => break,
            accepted = listener.accept() => match accepted {
                Ok((inbound, peer)) => {
                    task::spawn_local(run_session(ctx.clone(), inbound, peer));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                }
            },
        }
    }

    Ok(())
}

async fn run_session(ctx: RelayContext, inbound: TcpStream, peer: SocketAddr) {
    inbound.set_nodelay(true).ok();

    let outbound = match dialer::connect(&ctx.config.target).await {
        Ok(stream) => stream,
        Err(e) => {
            dialer::report_failure(peer, &e);
            let _ = inbound.close();
            return;
        }
    };

    let session = Rc::new(Session::new(ctx.tracker.track(), inbound, outbound));
    session.log_established();

    if ctx.spoof_upgrade() && session.claim_upgrade() {
        match upgrade::read_then_reply(session.inbound(), ctx.buffer_size()).await {
            Ok(consumed) => {
                tracing::info!(connection_id = %session.id(), handshake_bytes = consumed, "Upgrade response sent");
            }
            Err(e) => {
                session.terminate(upgrade_termination(e));
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
    let upstream = task::spawn_local(pump(session.clone(), Direction::Upstream, buffer_size));
    let downstream = task::spawn_local(pump(session.clone(), Direction::Downstream, buffer_size));
    let (up, down) = tokio::join!(upstream, downstream);

    for result in [up, down] {
        if let Err(e) = result {
            tracing::error!(connection_id = %session.id(), error = %e, "Pump task failed");
        }
    }
    session.mark_closed();
}

async fn pump(session: Rc<Session<TcpStream>>, direction: Direction, buffer_size: usize) {
    let source = session.endpoint(direction.source());
    let dest = session.endpoint(direction.dest());

    let outcome = relay_async(source, dest, buffer_size).await;
    session.add_transferred(direction, outcome.bytes());
    session.terminate(outcome.into_termination(direction));
}

fn upgrade_termination(err: UpgradeError) -> Termination {
    match err {
        UpgradeError::PeerClosed => Termination::Eof {
            direction: Direction::Upstream,
        },
        UpgradeError::Io(error) => Termination::Failed {
            direction: Direction::Upstream,
            error,
        },
    }
}
