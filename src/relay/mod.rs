//! Relay subsystem: sessions and the pumps that serve them.
//!
//! # Data Flow
//! ```text
//!            Upstream pump
//! inbound ─────────────────▶ outbound
//!         ◀─────────────────
//!           Downstream pump
//!
//! pump.rs reports a PumpOutcome → Termination → session.rs
//! session.rs closes both endpoints on the first termination
//! ```
//!
//! # Design Decisions
//! - The first EOF or error in either direction closes the whole session.
//!   Bytes still queued for the other direction are dropped, which is the
//!   forwarder's long-standing behaviour; there is no per-direction half-close.
//! - The sibling pump is unblocked by its socket being shut down under it

pub mod pump;
pub mod session;

use std::io;

pub use pump::PumpOutcome;
pub use session::{Session, SessionState};

/// Which socket of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The accepted client connection.
    Inbound,
    /// The connection dialed to the target.
    Outbound,
}

impl Side {
    pub fn peer(self) -> Side {
        match self {
            Side::Inbound => Side::Outbound,
            Side::Outbound => Side::Inbound,
        }
    }

    /// The direction that reads from this side.
    pub fn reading(self) -> Direction {
        match self {
            Side::Inbound => Direction::Upstream,
            Side::Outbound => Direction::Downstream,
        }
    }

    /// The direction that writes into this side.
    pub fn writing(self) -> Direction {
        self.peer().reading()
    }
}

/// One of the two byte flows of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// inbound → outbound
    Upstream,
    /// outbound → inbound
    Downstream,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Upstream, Direction::Downstream];

    pub fn source(self) -> Side {
        match self {
            Direction::Upstream => Side::Inbound,
            Direction::Downstream => Side::Outbound,
        }
    }

    pub fn dest(self) -> Side {
        self.source().peer()
    }

    pub fn index(self) -> usize {
        match self {
            Direction::Upstream => 0,
            Direction::Downstream => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upstream => "upstream",
            Direction::Downstream => "downstream",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session is being torn down.
#[derive(Debug)]
pub enum Termination {
    /// A source reached end of stream.
    Eof { direction: Direction },
    /// A read or write failed.
    Failed { direction: Direction, error: io::Error },
}
