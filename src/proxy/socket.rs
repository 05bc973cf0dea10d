use crate::tls::Liveness;
use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// Read/idle timeout applied to both legs of a tunnel
pub const READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Per-socket options shared by the client and upstream legs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// How long a read may block before the peer is probed
    pub read_timeout: Duration,
    pub keepalive: bool,
    pub nodelay: bool,
    /// `Some(ZERO)` makes close send RST instead of FIN
    pub linger: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            read_timeout: READ_TIMEOUT,
            keepalive: false,
            nodelay: true,
            linger: Some(Duration::ZERO),
        }
    }
}

impl SocketOptions {
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        let sock = SockRef::from(stream);
        sock.set_keepalive(self.keepalive)?;
        sock.set_linger(self.linger)?;
        Ok(())
    }
}

/// Liveness probe: one byte of urgent data, invisible to a peer reading the
/// normal channel. A full send buffer still means the peer is there.
pub fn probe(stream: &TcpStream) -> io::Result<()> {
    match SockRef::from(stream).send_out_of_band(&[0]) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

/// [`Liveness`] backed by [`probe`] on a live socket
#[derive(Debug, Clone, Copy)]
pub struct SocketProbe<'a>(pub &'a TcpStream);

impl Liveness for SocketProbe<'_> {
    fn is_alive(&self) -> bool {
        probe(self.0).is_ok()
    }
}
