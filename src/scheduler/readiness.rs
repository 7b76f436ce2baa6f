//! Readiness-multiplexing scheduler.
//!
//! # Responsibilities
//! - Poll the listener and every session socket from a single thread
//! - Resolve each event through a typed handler table and dispatch it
//! - Move at most one buffer per readable event, then yield to the poll loop
//!
//! # Design Decisions
//! - mio is edge-triggered: a source that was not read to `WouldBlock` is
//!   re-queued and polled again with a zero timeout, so busy sessions take turns
//! - Bytes the destination cannot take yet are parked per direction; that
//!   source is not read again until a writable event drains them
//! - Tokens are never reused, so a stale event can only miss the table
//! - Outbound dials are non-blocking: a connecting socket waits for WRITABLE
//!   under its own handler, and the loop enforces the connect deadline
//! - The target is resolved once, when the loop starts

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};

use crate::lifecycle::Shutdown;
use crate::net::endpoint::Endpoint;
use crate::net::dialer::{self, DialError};
use crate::net::upgrade;
use crate::relay::{Direction, Session, Side, Termination};
use crate::scheduler::{RelayContext, Scheduler};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_SESSION_TOKEN: usize = 2;
const EVENTS_CAPACITY: usize = 1024;

pub struct ReadinessScheduler {
    ctx: RelayContext,
}

impl ReadinessScheduler {
    pub fn new(ctx: RelayContext) -> Self {
        Self { ctx }
    }
}

impl Scheduler for ReadinessScheduler {
    fn run(self: Box<Self>, listener: std::net::TcpListener, shutdown: &Shutdown) -> io::Result<()> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        // The poll loop keeps its own handle: dropping the last one
        // deregisters the waker, possibly before the wake is seen.
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let hook_waker = Arc::clone(&waker);
        shutdown.on_trigger(move || {
            if let Err(e) = hook_waker.wake() {
                tracing::warn!(error = %e, "Failed to wake poll loop");
            }
        });

        let result = Multiplexer::new(self.ctx, poll, listener).run(shutdown);
        drop(waker);
        result
    }
}

/// What a registered token dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    Accept,
    Wake,
    Dialing { session: u64 },
    Relay { session: u64, side: Side },
}

/// A readiness notification resolved through the handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    AcceptReady,
    DialReady { session: u64 },
    ReadReady { session: u64, side: Side },
    WriteReady { session: u64, side: Side },
}

/// Result of pushing parked bytes to a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    Drained,
    Pending,
    Closed,
}

/// An accepted client waiting for its outbound connect to finish.
struct PendingDial {
    inbound: TcpStream,
    peer: SocketAddr,
    outbound: TcpStream,
    addr: SocketAddr,
    token: Token,
    /// Index of the next target address to try if this one fails.
    next_addr: usize,
    deadline: Instant,
}

struct Slot {
    session: Session<TcpStream>,
    tokens: [Token; 2],
    /// Bytes read but not yet written, per direction.
    backlog: [Vec<u8>; 2],
}

impl Slot {
    fn token(&self, side: Side) -> Token {
        match side {
            Side::Inbound => self.tokens[0],
            Side::Outbound => self.tokens[1],
        }
    }
}

struct Multiplexer {
    ctx: RelayContext,
    poll: Poll,
    listener: TcpListener,
    handlers: HashMap<Token, Handler>,
    targets: Vec<SocketAddr>,
    dials: HashMap<u64, PendingDial>,
    sessions: HashMap<u64, Slot>,
    next_session: u64,
    next_token: usize,
    requeued: VecDeque<Readiness>,
    buffer: Vec<u8>,
}

impl Multiplexer {
    fn new(ctx: RelayContext, poll: Poll, listener: TcpListener) -> Self {
        let buffer = vec![0u8; ctx.buffer_size()];
        let mut handlers = HashMap::new();
        handlers.insert(LISTENER, Handler::Accept);
        handlers.insert(WAKER, Handler::Wake);

        let targets = match dialer::resolve(&ctx.config.target) {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, "Target did not resolve, connections will be refused");
                Vec::new()
            }
        };

        Self {
            ctx,
            poll,
            listener,
            handlers,
            targets,
            dials: HashMap::new(),
            sessions: HashMap::new(),
            next_session: 0,
            next_token: FIRST_SESSION_TOKEN,
            requeued: VecDeque::new(),
            buffer,
        }
    }

    fn run(mut self, shutdown: &Shutdown) -> io::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        while !shutdown.is_triggered() {
            let timeout = self.poll_timeout();
            if let Err(e) = self.turn(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }
        }

        tracing::debug!(
            open_sessions = self.sessions.len(),
            pending_dials = self.dials.len(),
            "Poll loop stopped, dropping open sessions"
        );
        Ok(())
    }

    /// Zero while work is re-queued, otherwise until the nearest connect deadline.
    fn poll_timeout(&self) -> Option<Duration> {
        if !self.requeued.is_empty() {
            return Some(Duration::ZERO);
        }
        self.dials
            .values()
            .map(|dial| dial.deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// One poll, then every resulting dispatch and any expired dial.
    fn turn(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(events, timeout)?;

        let mut ready: Vec<Readiness> = self.requeued.drain(..).collect();
        for event in events.iter() {
            self.resolve(event, &mut ready);
        }
        for readiness in ready {
            self.dispatch(readiness);
        }

        self.expire_dials();
        Ok(())
    }

    fn resolve(&self, event: &Event, ready: &mut Vec<Readiness>) {
        match self.handlers.get(&event.token()) {
            Some(Handler::Accept) => ready.push(Readiness::AcceptReady),
            // The loop condition re-checks shutdown.
            Some(Handler::Wake) => {}
            Some(&Handler::Dialing { session }) => ready.push(Readiness::DialReady { session }),
            Some(&Handler::Relay { session, side }) => {
                if event.is_writable() {
                    ready.push(Readiness::WriteReady { session, side });
                }
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    ready.push(Readiness::ReadReady { session, side });
                }
            }
            None => tracing::trace!(token = event.token().0, "Event for released token"),
        }
    }

    fn dispatch(&mut self, readiness: Readiness) {
        match readiness {
            Readiness::AcceptReady => self.accept_pending(),
            Readiness::DialReady { session } => self.on_dial_ready(session),
            Readiness::ReadReady { session, side } => self.on_readable(session, side),
            Readiness::WriteReady { session, side } => self.on_writable(session, side),
        }
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((inbound, peer)) => self.establish(inbound, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn establish(&mut self, inbound: TcpStream, peer: SocketAddr) {
        inbound.set_nodelay(true).ok();

        let key = self.next_session;
        self.next_session += 1;
        self.begin_dial(key, inbound, peer, 0, None);
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.config.target.connect_timeout_secs)
    }

    /// Start a non-blocking connect to the next target address.
    ///
    /// When every address has been tried, the failure is reported and the
    /// inbound connection is closed.
    fn begin_dial(
        &mut self,
        key: u64,
        inbound: TcpStream,
        peer: SocketAddr,
        mut next_addr: usize,
        mut last_error: Option<io::Error>,
    ) {
        while let Some(&addr) = self.targets.get(next_addr) {
            next_addr += 1;

            let mut outbound = match TcpStream::connect(addr) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!(address = %addr, error = %e, "Dial attempt failed");
                    last_error = Some(e);
                    continue;
                }
            };
            let token = self.allocate_token();
            if let Err(e) = self.poll.registry().register(&mut outbound, token, Interest::WRITABLE) {
                last_error = Some(e);
                continue;
            }

            self.handlers.insert(token, Handler::Dialing { session: key });
            self.dials.insert(
                key,
                PendingDial {
                    inbound,
                    peer,
                    outbound,
                    addr,
                    token,
                    next_addr,
                    deadline: Instant::now() + self.connect_timeout(),
                },
            );
            return;
        }

        let err = self.dial_error(last_error);
        dialer::report_failure(peer, &err);
        let _ = inbound.close();
    }

    fn dial_error(&self, last_error: Option<io::Error>) -> DialError {
        let target = self.ctx.config.target_display();
        match last_error {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => DialError::Timeout {
                target,
                timeout: self.connect_timeout(),
            },
            Some(source) => DialError::Connect { target, source },
            None => DialError::NoAddress { target },
        }
    }

    /// Take a pending dial out of the poller.
    fn release_dial(&mut self, key: u64) -> Option<PendingDial> {
        let mut dial = self.dials.remove(&key)?;
        self.handlers.remove(&dial.token);
        if let Err(e) = self.poll.registry().deregister(&mut dial.outbound) {
            tracing::trace!(address = %dial.addr, error = %e, "Deregister failed");
        }
        Some(dial)
    }

    fn on_dial_ready(&mut self, key: u64) {
        let Some(dial) = self.dials.get(&key) else {
            return;
        };

        let result = match dial.outbound.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => match dial.outbound.peer_addr() {
                Ok(_) => Ok(()),
                // Still connecting.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => return,
                Err(e) => Err(e),
            },
        };

        let Some(dial) = self.release_dial(key) else {
            return;
        };
        match result {
            Ok(()) => self.open_session(key, dial.inbound, dial.outbound),
            Err(e) => {
                tracing::debug!(address = %dial.addr, error = %e, "Dial attempt failed");
                self.begin_dial(key, dial.inbound, dial.peer, dial.next_addr, Some(e));
            }
        }
    }

    fn expire_dials(&mut self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .dials
            .iter()
            .filter(|(_, dial)| dial.deadline <= now)
            .map(|(key, _)| *key)
            .collect();

        for key in expired {
            if let Some(dial) = self.release_dial(key) {
                tracing::debug!(address = %dial.addr, "Dial attempt timed out");
                self.begin_dial(
                    key,
                    dial.inbound,
                    dial.peer,
                    dial.next_addr,
                    Some(io::ErrorKind::TimedOut.into()),
                );
            }
        }
    }

    fn open_session(&mut self, key: u64, inbound: TcpStream, outbound: TcpStream) {
        outbound.set_nodelay(true).ok();

        let session = Session::new(self.ctx.tracker.track(), inbound, outbound);
        session.log_established();

        let tokens = [self.allocate_token(), self.allocate_token()];
        let mut slot = Slot {
            session,
            tokens,
            backlog: [Vec::new(), Vec::new()],
        };

        for side in [Side::Inbound, Side::Outbound] {
            let token = slot.token(side);
            let registered = self.poll.registry().register(
                slot.session.endpoint_mut(side),
                token,
                Interest::READABLE | Interest::WRITABLE,
            );
            if let Err(error) = registered {
                tracing::error!(connection_id = %slot.session.id(), error = %error, "Failed to register socket");
                for registered in [Side::Inbound, Side::Outbound] {
                    self.handlers.remove(&slot.token(registered));
                    let _ = self.poll.registry().deregister(slot.session.endpoint_mut(registered));
                }
                slot.session.terminate(Termination::Failed {
                    direction: side.reading(),
                    error,
                });
                slot.session.mark_closed();
                return;
            }
            self.handlers.insert(token, Handler::Relay { session: key, side });
        }

        let spoof = self.ctx.spoof_upgrade() && slot.session.claim_upgrade();
        if spoof {
            slot.backlog[Direction::Downstream.index()].extend_from_slice(upgrade::UPGRADE_RESPONSE);
        }
        self.sessions.insert(key, slot);

        if spoof {
            if self.flush(key, Direction::Downstream) == Flush::Closed {
                return;
            }
            tracing::info!(connection_id = %self.sessions[&key].session.id(), "Upgrade response sent");
        }

        if let Some(slot) = self.sessions.get(&key) {
            slot.session.activate();
        }
    }

    fn on_readable(&mut self, key: u64, side: Side) {
        let direction = side.reading();
        let Some(slot) = self.sessions.get_mut(&key) else {
            return;
        };
        if !slot.backlog[direction.index()].is_empty() {
            // Paused until the destination drains.
            return;
        }

        let mut source = slot.session.endpoint(side);
        match source.read(&mut self.buffer) {
            Ok(0) => self.teardown(key, Termination::Eof { direction }),
            Ok(n) => {
                slot.backlog[direction.index()].extend_from_slice(&self.buffer[..n]);
                if self.flush(key, direction) == Flush::Drained {
                    // Edge-triggered: more may be waiting behind this chunk.
                    self.requeued.push_back(Readiness::ReadReady { session: key, side });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.requeued.push_back(Readiness::ReadReady { session: key, side });
            }
            Err(error) => self.teardown(key, Termination::Failed { direction, error }),
        }
    }

    fn on_writable(&mut self, key: u64, side: Side) {
        let direction = side.writing();
        let pending = match self.sessions.get(&key) {
            Some(slot) => !slot.backlog[direction.index()].is_empty(),
            None => return,
        };
        if pending && self.flush(key, direction) == Flush::Drained {
            self.requeued.push_back(Readiness::ReadReady {
                session: key,
                side: direction.source(),
            });
        }
    }

    /// Write as much parked data for `direction` as the destination accepts.
    fn flush(&mut self, key: u64, direction: Direction) -> Flush {
        let Some(slot) = self.sessions.get_mut(&key) else {
            return Flush::Closed;
        };

        let mut dest = slot.session.endpoint(direction.dest());
        let backlog = &mut slot.backlog[direction.index()];
        let mut written = 0;
        let mut failure = None;

        while written < backlog.len() {
            match dest.write(&backlog[written..]) {
                Ok(0) => {
                    failure = Some(io::Error::from(io::ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        backlog.drain(..written);
        let drained = backlog.is_empty();
        slot.session.add_transferred(direction, written as u64);

        if let Some(error) = failure {
            self.teardown(key, Termination::Failed { direction, error });
            return Flush::Closed;
        }
        if drained {
            Flush::Drained
        } else {
            Flush::Pending
        }
    }

    fn teardown(&mut self, key: u64, termination: Termination) {
        let Some(mut slot) = self.sessions.remove(&key) else {
            return;
        };

        for side in [Side::Inbound, Side::Outbound] {
            self.handlers.remove(&slot.token(side));
            if let Err(e) = self.poll.registry().deregister(slot.session.endpoint_mut(side)) {
                tracing::debug!(connection_id = %slot.session.id(), error = %e, "Deregister failed");
            }
        }

        slot.session.terminate(termination);
        slot.session.mark_closed();
    }
}
