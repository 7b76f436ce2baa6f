//! Fake protocol-upgrade reply.
//!
//! Some intermediaries only let a long-lived TCP stream through once it
//! looks like a completed HTTP upgrade. When enabled, the inbound side is
//! answered with a canned `101 Switching Protocols` before relaying starts.
//!
//! # Modes
//! - Fire-and-forget: write the reply immediately (readiness, threaded)
//! - Read-then-reply: wait for the client's first chunk, drop it, then reply (cooperative)

use std::io::{self, Write};

use thiserror::Error;

use crate::relay::pump::{read_when_ready, write_all_when_ready};

/// The exact bytes sent to the client.
///
/// The content length is a deliberately huge placeholder, not a body size.
pub const UPGRADE_RESPONSE: &[u8] =
    b"HTTP/1.1 101 Switching Protocols (Rust)\r\nContent-Length: 1048576000000\r\n\r\n";

#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The client hung up before sending its handshake.
    #[error("peer closed the connection before the upgrade")]
    PeerClosed,

    #[error("upgrade failed: {0}")]
    Io(#[from] io::Error),
}

/// Fire-and-forget on a blocking stream.
pub fn reply_blocking<W: Write>(mut stream: W) -> Result<(), UpgradeError> {
    stream.write_all(UPGRADE_RESPONSE)?;
    stream.flush()?;
    Ok(())
}

/// Read-then-reply on a tokio stream. Returns how many handshake bytes were consumed.
pub async fn read_then_reply(
    stream: &tokio::net::TcpStream,
    buffer_size: usize,
) -> Result<usize, UpgradeError> {
    let mut handshake = vec![0u8; buffer_size];
    let consumed = read_when_ready(stream, &mut handshake).await?;
    if consumed == 0 {
        return Err(UpgradeError::PeerClosed);
    }

    write_all_when_ready(stream, UPGRADE_RESPONSE).await?;
    Ok(consumed)
}
