//! The socket operations a session needs, over every socket flavour.
//!
//! Reading and writing differ per scheduler (blocking, readiness or async),
//! so they stay on the concrete types. What the session does uniformly is
//! name its peers and shut sockets down, which is what this trait covers.

use std::io;
use std::net::{Shutdown, SocketAddr};

/// An open, bidirectional byte stream owned by exactly one session.
pub trait Endpoint {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Shut down one or both directions of the stream.
    fn half_close(&self, how: Shutdown) -> io::Result<()>;

    /// Shut down both directions. A thread or task blocked reading this
    /// socket wakes up with EOF.
    fn close(&self) -> io::Result<()> {
        self.half_close(Shutdown::Both)
    }
}

/// Errors that mean "the other pump got there first".
pub fn is_already_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe
    )
}

impl Endpoint for std::net::TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpStream::peer_addr(self)
    }

    fn half_close(&self, how: Shutdown) -> io::Result<()> {
        std::net::TcpStream::shutdown(self, how)
    }
}

impl Endpoint for mio::net::TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::peer_addr(self)
    }

    fn half_close(&self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }
}

impl Endpoint for tokio::net::TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self)
    }

    fn half_close(&self, how: Shutdown) -> io::Result<()> {
        // tokio only exposes a write-side shutdown through AsyncWrite.
        socket2::SockRef::from(self).shutdown(how)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn classifies_already_closed() {
        assert!(is_already_closed(&io::Error::from(io::ErrorKind::NotConnected)));
        assert!(is_already_closed(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_already_closed(&io::Error::from(io::ErrorKind::ConnectionReset)));
    }

    #[test]
    fn close_unblocks_blocked_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let reading = server.try_clone().unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            (&reading).read(&mut buf)
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        Endpoint::close(&server).unwrap();

        assert_eq!(reader.join().unwrap().unwrap(), 0);
    }
}
