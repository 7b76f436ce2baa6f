//! Session state machine and exactly-once teardown.
//!
//! # States
//! ```text
//! Establishing → Active: dial (and optional upgrade) succeeded
//! Establishing → Closing: upgrade failed, pumps never start
//! Active → Closing: first EOF or error from either pump
//! Closing → Closed: both pumps finished, sockets released
//! ```
//!
//! Whoever moves the session into Closing shuts both endpoints down; every
//! later report is only logged. The sockets themselves are released when
//! the session is dropped, together with its tracker guard.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use crate::net::endpoint::{is_already_closed, Endpoint};
use crate::net::{ConnectionGuard, ConnectionId};
use crate::relay::{Direction, Side, Termination};

/// Lifecycle state of a session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Establishing = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for SessionState {
    fn from(val: u8) -> Self {
        match val {
            0 => SessionState::Establishing,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// One accepted inbound connection paired with its dialed outbound connection.
#[derive(Debug)]
pub struct Session<E: Endpoint> {
    guard: ConnectionGuard,
    inbound: E,
    outbound: E,
    state: AtomicU8,
    upgraded: AtomicBool,
    transferred: [AtomicU64; 2],
}

impl<E: Endpoint> Session<E> {
    pub fn new(guard: ConnectionGuard, inbound: E, outbound: E) -> Self {
        Self {
            guard,
            inbound,
            outbound,
            state: AtomicU8::new(SessionState::Establishing as u8),
            upgraded: AtomicBool::new(false),
            transferred: [AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn inbound(&self) -> &E {
        &self.inbound
    }

    pub fn outbound(&self) -> &E {
        &self.outbound
    }

    pub fn endpoint(&self, side: Side) -> &E {
        match side {
            Side::Inbound => &self.inbound,
            Side::Outbound => &self.outbound,
        }
    }

    /// Exclusive access, for registering the socket with a poller.
    pub fn endpoint_mut(&mut self, side: Side) -> &mut E {
        match side {
            Side::Inbound => &mut self.inbound,
            Side::Outbound => &mut self.outbound,
        }
    }

    /// Log the pairing. Unknown addresses print as `?`.
    pub fn log_established(&self) {
        let local = display_addr(self.inbound.local_addr());
        let peer = display_addr(self.outbound.peer_addr());
        tracing::info!(
            connection_id = %self.id(),
            "Connection established: {} -> ? -> {}",
            local,
            peer
        );
    }

    /// Claim the one upgrade reply this session may send.
    pub fn claim_upgrade(&self) -> bool {
        !self.upgraded.swap(true, Ordering::AcqRel)
    }

    /// Establishing → Active. Fails if the session was already torn down.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Establishing as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Count bytes delivered in one direction.
    pub fn add_transferred(&self, direction: Direction, bytes: u64) {
        self.transferred[direction.index()].fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn transferred(&self, direction: Direction) -> u64 {
        self.transferred[direction.index()].load(Ordering::Relaxed)
    }

    /// Report a terminal condition from one direction.
    ///
    /// The first report closes both endpoints and returns `true`. Later
    /// reports, typically the sibling waking up on its closed socket, are
    /// logged and return `false`.
    pub fn terminate(&self, termination: Termination) -> bool {
        let id = self.id();

        if !self.begin_closing() {
            match termination {
                Termination::Eof { direction } => {
                    tracing::debug!(connection_id = %id, %direction, "Sibling pump finished");
                }
                Termination::Failed { direction, error } => {
                    tracing::warn!(connection_id = %id, %direction, error = %error, "Socket already closed!");
                }
            }
            return false;
        }

        match &termination {
            Termination::Eof { direction } => {
                tracing::info!(connection_id = %id, %direction, "Connection closed.");
            }
            Termination::Failed { direction, error } if is_already_closed(error) => {
                tracing::warn!(connection_id = %id, %direction, error = %error, "Socket already closed!");
                tracing::info!(connection_id = %id, %direction, "Connection closed.");
            }
            Termination::Failed { direction, error } => {
                tracing::error!(
                    connection_id = %id,
                    %direction,
                    error = %error,
                    error_kind = ?error.kind(),
                    "Connection terminated!"
                );
            }
        }

        self.close_endpoint(Side::Inbound);
        self.close_endpoint(Side::Outbound);
        true
    }

    /// Closing → Closed, once no pump touches the endpoints any more.
    pub fn mark_closed(&self) {
        // Nobody reported a termination: close here so nothing leaks.
        if self.begin_closing() {
            self.close_endpoint(Side::Inbound);
            self.close_endpoint(Side::Outbound);
        }
        self.state.store(SessionState::Closed as u8, Ordering::Release);

        tracing::debug!(
            connection_id = %self.id(),
            bytes_upstream = self.transferred(Direction::Upstream),
            bytes_downstream = self.transferred(Direction::Downstream),
            "Session closed"
        );
    }

    fn begin_closing(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            match SessionState::from(current) {
                SessionState::Closing | SessionState::Closed => return false,
                SessionState::Establishing | SessionState::Active => {}
            }
            match self.state.compare_exchange_weak(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn close_endpoint(&self, side: Side) {
        if let Err(e) = self.endpoint(side).close() {
            if is_already_closed(&e) {
                tracing::warn!(connection_id = %self.id(), ?side, error = %e, "Socket already closed!");
            } else {
                tracing::error!(connection_id = %self.id(), ?side, error = %e, "Failed to close socket");
            }
        }
    }
}

fn display_addr(addr: std::io::Result<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|_| "?".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::ConnectionTracker;
    use std::io;
    use std::net::Shutdown;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct FakeEndpoint {
        closes: AtomicUsize,
        fail: Option<io::ErrorKind>,
    }

    impl Endpoint for FakeEndpoint {
        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:9090".parse().unwrap())
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Err(io::ErrorKind::NotConnected.into())
        }

        fn half_close(&self, how: Shutdown) -> io::Result<()> {
            assert_eq!(how, Shutdown::Both);
            self.closes.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                Some(kind) => Err(kind.into()),
                None => Ok(()),
            }
        }
    }

    fn session(tracker: &ConnectionTracker) -> Session<FakeEndpoint> {
        Session::new(tracker.track(), FakeEndpoint::default(), FakeEndpoint::default())
    }

    #[test]
    fn lifecycle_transitions() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker);
        assert_eq!(session.state(), SessionState::Establishing);

        assert!(session.activate());
        assert!(!session.activate());
        assert_eq!(session.state(), SessionState::Active);

        assert!(session.terminate(Termination::Eof {
            direction: Direction::Upstream
        }));
        assert_eq!(session.state(), SessionState::Closing);

        session.mark_closed();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn endpoints_closed_exactly_once() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker);
        session.activate();

        assert!(session.terminate(Termination::Failed {
            direction: Direction::Downstream,
            error: io::ErrorKind::ConnectionReset.into(),
        }));
        assert!(!session.terminate(Termination::Eof {
            direction: Direction::Upstream
        }));
        session.mark_closed();

        assert_eq!(session.inbound().closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.outbound().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn already_closed_on_shutdown_is_swallowed() {
        let tracker = ConnectionTracker::new();
        let inbound = FakeEndpoint {
            closes: AtomicUsize::new(0),
            fail: Some(io::ErrorKind::NotConnected),
        };
        let session = Session::new(tracker.track(), inbound, FakeEndpoint::default());
        session.activate();

        assert!(session.terminate(Termination::Eof {
            direction: Direction::Downstream
        }));
        assert_eq!(session.outbound().closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn upgrade_only_claimed_once() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker);
        assert!(session.claim_upgrade());
        assert!(!session.claim_upgrade());
    }

    #[test]
    fn teardown_before_activation_blocks_activation() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker);

        assert!(session.terminate(Termination::Eof {
            direction: Direction::Upstream
        }));
        assert!(!session.activate());
    }

    #[test]
    fn mark_closed_without_termination_still_closes() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker);
        session.mark_closed();

        assert_eq!(session.inbound().closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn dropping_session_releases_tracker_slot() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker);
        assert_eq!(tracker.active_count(), 1);
        drop(session);
        assert_eq!(tracker.active_count(), 0);
    }
}
