//! Unidirectional copy loops.
//!
//! # Responsibilities
//! - Read up to `buffer_size` bytes from the source, write all of them to the destination
//! - Stop on EOF (zero-length read) or the first I/O error
//! - Report the outcome exactly once, to be turned into a session termination
//!
//! # Design Decisions
//! - Blocking flavour is generic over `Read`/`Write` (`&TcpStream` implements both)
//! - Async flavour is built on explicit readiness waits (`readable`/`writable`
//!   then `try_read`/`try_write`), so a pump suspends only while waiting on a socket
//! - Partial writes are retried until the chunk is fully sent; nothing is dropped

use std::io::{self, Read, Write};

use crate::relay::{Direction, Termination};

/// How a pump finished.
#[derive(Debug)]
pub enum PumpOutcome {
    /// Source reached end of stream after relaying `bytes`.
    Eof { bytes: u64 },
    /// A read or write failed after relaying `bytes`.
    Failed { bytes: u64, error: io::Error },
}

impl PumpOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            PumpOutcome::Eof { bytes } | PumpOutcome::Failed { bytes, .. } => *bytes,
        }
    }

    pub fn into_termination(self, direction: Direction) -> Termination {
        match self {
            PumpOutcome::Eof { .. } => Termination::Eof { direction },
            PumpOutcome::Failed { error, .. } => Termination::Failed { direction, error },
        }
    }
}

/// Copy `source` into `dest` with blocking I/O until EOF or error.
pub fn relay_blocking<R: Read, W: Write>(
    mut source: R,
    mut dest: W,
    buffer_size: usize,
) -> PumpOutcome {
    let mut buffer = vec![0u8; buffer_size];
    let mut bytes = 0u64;

    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => return PumpOutcome::Eof { bytes },
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return PumpOutcome::Failed { bytes, error },
        };

        if let Err(error) = dest.write_all(&buffer[..n]) {
            return PumpOutcome::Failed { bytes, error };
        }
        bytes += n as u64;
    }
}

/// Wait until `stream` is readable, then read once into `buf`.
///
/// Returns `Ok(0)` on end of stream.
pub async fn read_when_ready(stream: &tokio::net::TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        stream.readable().await?;
        match stream.try_read(buf) {
            Ok(n) => return Ok(n),
            // Spurious readiness: the reactor cleared it, wait again.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Write all of `data`, suspending whenever the send buffer is full.
pub async fn write_all_when_ready(stream: &tokio::net::TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        stream.writable().await?;
        match stream.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Copy `source` into `dest` cooperatively until EOF or error.
pub async fn relay_async(
    source: &tokio::net::TcpStream,
    dest: &tokio::net::TcpStream,
    buffer_size: usize,
) -> PumpOutcome {
    let mut buffer = vec![0u8; buffer_size];
    let mut bytes = 0u64;

    loop {
        let n = match read_when_ready(source, &mut buffer).await {
            Ok(0) => return PumpOutcome::Eof { bytes },
            Ok(n) => n,
            Err(error) => return PumpOutcome::Failed { bytes, error },
        };

        if let Err(error) = write_all_when_ready(dest, &buffer[..n]).await {
            return PumpOutcome::Failed { bytes, error };
        }
        bytes += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Reads in fixed-size chunks and records each chunk length.
    struct Chunked<'a> {
        data: &'a [u8],
        reads: Vec<usize>,
    }

    impl Read for Chunked<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            self.reads.push(n);
            Ok(n)
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copies_until_eof_in_buffer_sized_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut source = Chunked {
            data: &data,
            reads: Vec::new(),
        };
        let mut dest: Vec<u8> = Vec::new();

        let outcome = relay_blocking(&mut source, &mut dest, 4096);

        assert!(matches!(outcome, PumpOutcome::Eof { bytes: 10_000 }));
        assert_eq!(dest, data);
        assert_eq!(source.reads, vec![4096, 4096, 1808, 0]);
    }

    #[test]
    fn write_error_fails_pump() {
        let outcome = relay_blocking(Cursor::new(b"PING".to_vec()), BrokenPipe, 4096);
        match outcome {
            PumpOutcome::Failed { bytes, error } => {
                assert_eq!(bytes, 0);
                assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn empty_source_is_immediate_eof() {
        let mut dest: Vec<u8> = Vec::new();
        let outcome = relay_blocking(Cursor::new(Vec::<u8>::new()), &mut dest, 16);
        assert_eq!(outcome.bytes(), 0);
        assert!(matches!(
            outcome.into_termination(Direction::Upstream),
            Termination::Eof {
                direction: Direction::Upstream
            }
        ));
    }

    async fn socket_pair() -> (tokio::net::TcpStream, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = tokio::net::TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn async_relay_preserves_order() {
        let (mut writer, source) = socket_pair().await;
        let (dest, mut reader) = socket_pair().await;

        let pump = tokio::spawn(async move { relay_async(&source, &dest, 1024).await });

        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 253) as u8).collect();
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        let outcome = pump.await.unwrap();

        assert_eq!(received, payload);
        assert!(matches!(outcome, PumpOutcome::Eof { bytes } if bytes == payload.len() as u64));
    }
}
