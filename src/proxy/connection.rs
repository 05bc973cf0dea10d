//! One client connection and, once its ClientHello names a host, the
//! upstream tunnel it is spliced onto.

use super::forwarder::{self, Direction};
use super::socket::{SocketOptions, SocketProbe};
use super::upstream::ProxyTarget;
use crate::error::{SniProxyError, SniProxyResult};
use crate::server::ServerContext;
use crate::tls::{HeadBuffer, parse_client_hello, read_record_header};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle items carried in every connection log line
pub mod item {
    pub const ARRIVE: &str = "arrive";
    pub const PARSE: &str = "parse";
    pub const LOCAL: &str = "local";
    pub const UPPER: &str = "upper";
    pub const CLOSE: &str = "close";
}

/// Connection lifecycle. Only moves forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Uninitialized,
    Initializing,
    Normal,
    Error,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Running,
    Idle,
}

/// `client -> host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub client: SocketAddr,
    pub host: String,
    pub port: u16,
}

impl Link {
    pub fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}:{}", self.client, self.host, self.port)
    }
}

/// Both legs of an established tunnel, split for the two pumps
struct Tunnel {
    client_read: OwnedReadHalf,
    client_write: OwnedWriteHalf,
    upstream_read: OwnedReadHalf,
    upstream_write: OwnedWriteHalf,
}

pub struct Connection {
    number: u64,
    id: String,
    peer: SocketAddr,
    ctx: ServerContext,
    target: Arc<ProxyTarget>,
    state: Mutex<State>,
    /// Set together with the upstream leg
    link: OnceLock<Link>,
    upload_idle: AtomicBool,
    download_idle: AtomicBool,
    closed: watch::Sender<bool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("link", &self.link.get())
            .finish()
    }
}

impl Connection {
    /// Create a connection for an accepted socket from `peer`.
    ///
    /// The connection joins the registry right away so in-flight handshakes
    /// count as live.
    pub fn new(ctx: ServerContext, target: Arc<ProxyTarget>, peer: SocketAddr) -> Arc<Self> {
        let number = ctx.registry.register(peer);
        ctx.metrics.record_accept();
        let (closed, _) = watch::channel(false);
        let conn = Arc::new(Self {
            number,
            id: format!("@{:08x}", number),
            peer,
            ctx,
            target,
            state: Mutex::new(State::Uninitialized),
            link: OnceLock::new(),
            upload_idle: AtomicBool::new(false),
            download_idle: AtomicBool::new(false),
            closed,
        });
        conn.log(item::ARRIVE, "accepted");
        conn
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> State {
        *self.lock_state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// Resolved route, `None` until the upstream leg is up
    pub fn link(&self) -> Option<&Link> {
        self.link.get()
    }

    /// Host name taken from the ClientHello
    pub fn server_name(&self) -> Option<&str> {
        self.link.get().map(|l| l.host.as_str())
    }

    pub fn forwarder_state(&self, direction: Direction) -> ForwarderState {
        if self.idle_flag(direction).load(Ordering::Acquire) {
            ForwarderState::Idle
        } else {
            ForwarderState::Running
        }
    }

    pub(crate) fn context(&self) -> &ServerContext {
        &self.ctx
    }

    pub(crate) fn socket_options(&self) -> &SocketOptions {
        &self.ctx.socket_options
    }

    /// Receiver that flips to `true` when the connection closes
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move forward to `to`. Refused from a terminal state or backwards.
    fn transition(&self, to: State) -> bool {
        let mut state = self.lock_state();
        if *state >= State::Error || to <= *state || to == State::Closed {
            return false;
        }
        *state = to;
        true
    }

    /// Run the initializer on a freshly accepted socket.
    ///
    /// On success this task becomes the upload pump and returns only when the
    /// connection is torn down; the download pump runs as a separate task.
    pub async fn run(self: Arc<Self>, client: TcpStream) {
        if !self.transition(State::Initializing) {
            return;
        }
        // Closing mid-handshake drops the client socket and any upstream dial
        let mut closed = self.close_signal();
        let initialized = tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => return,
            r = self.initialize(client) => r,
        };
        let tunnel = match initialized {
            Ok(tunnel) => tunnel,
            Err((item, e)) => {
                self.fail(item, None, &e);
                return;
            }
        };
        if !self.transition(State::Normal) {
            return;
        }
        self.log(item::UPPER, "established");

        let Tunnel {
            client_read,
            client_write,
            upstream_read,
            upstream_write,
        } = tunnel;
        tokio::spawn(forwarder::pump(
            Arc::clone(&self),
            Direction::Download,
            upstream_read,
            client_write,
        ));
        forwarder::pump(self, Direction::Upload, client_read, upstream_write).await;
    }

    async fn initialize(&self, client: TcpStream) -> Result<Tunnel, (&'static str, SniProxyError)> {
        let options = self.ctx.socket_options;
        options
            .apply(&client)
            .map_err(|e| (item::LOCAL, e.into()))?;
        let (mut client_read, client_write) = client.into_split();

        let mut head = HeadBuffer::new(
            &mut client_read,
            SocketProbe(client_write.as_ref()),
            self.ctx.head_capacity(),
            options.read_timeout,
        );
        let host = self
            .read_server_name(&mut head)
            .await
            .map_err(|e| (item::PARSE, e))?;
        let link = Link {
            client: self.peer,
            host,
            port: self.target.dst_port,
        };
        self.log_link(&link, item::PARSE, "server name found");

        let upstream = self
            .target
            .connect(&link.host, &options)
            .await
            .map_err(|e| (item::UPPER, e.into()))?;
        let (upstream_read, mut upstream_write) = upstream.into_split();
        let replayed = head
            .transfer_remaining_and_close(&mut upstream_write)
            .await
            .map_err(|e| (item::UPPER, e))?;
        drop(head);
        self.ctx.metrics.record_upload(replayed as u64);
        debug!(id = %self.id, replayed, "head replayed upstream");

        let _ = self.link.set(link);
        Ok(Tunnel {
            client_read,
            client_write,
            upstream_read,
            upstream_write,
        })
    }

    async fn read_server_name<R, L>(&self, head: &mut HeadBuffer<'_, R, L>) -> SniProxyResult<String>
    where
        R: tokio::io::AsyncRead + Unpin,
        L: crate::tls::Liveness,
    {
        let record_length = read_record_header(head, self.ctx.config.head_buffer_size).await?;
        parse_client_hello(head, record_length).await
    }

    /// Record a fatal failure on one leg and close.
    ///
    /// Only the first failing leg is reported. Once the connection is in
    /// `Error` or `Closed`, the other leg tearing down is what made this one
    /// fail.
    pub(crate) fn fail(&self, item: &'static str, direction: Option<Direction>, error: &SniProxyError) {
        {
            let mut state = self.lock_state();
            if *state >= State::Error {
                return;
            }
            *state = State::Error;
        }
        match error {
            SniProxyError::Protocol(_) | SniProxyError::Capacity(_) => {
                self.ctx.metrics.record_handshake_failure()
            }
            SniProxyError::Upstream(_) => self.ctx.metrics.record_upstream_error(),
            _ => {}
        }

        let arrow = direction.map(Direction::arrow).unwrap_or("");
        let link = self.describe_link();
        if error.is_expected() {
            info!(
                connections = self.ctx.registry.len(),
                id = %self.id,
                link = %link,
                item,
                dir = arrow,
                "{}",
                error
            );
        } else {
            warn!(
                connections = self.ctx.registry.len(),
                id = %self.id,
                link = %link,
                item,
                dir = arrow,
                "unexpected failure: {:?}",
                error
            );
        }
        self.close();
    }

    /// Close the connection. Only the first call does anything; it returns
    /// whether this call was the one that closed.
    ///
    /// Both pumps watch the close signal and drop their socket halves, which
    /// closes the client and upstream sockets.
    pub fn close(&self) -> bool {
        {
            let mut state = self.lock_state();
            if *state == State::Closed {
                return false;
            }
            *state = State::Closed;
        }
        self.ctx.registry.remove(self.number);
        self.ctx.metrics.record_close();
        self.closed.send_replace(true);
        self.log(item::CLOSE, "closed");
        true
    }

    /// Data arrived on `direction`; logs the Idle -> Running edge once.
    pub(crate) fn mark_running(&self, direction: Direction) {
        if self.idle_flag(direction).swap(false, Ordering::AcqRel) {
            self.ctx.metrics.record_resume();
            self.log_direction(direction, "continue");
        }
    }

    /// Read timed out with a live peer; logs the Running -> Idle edge once.
    pub(crate) fn mark_idle(&self, direction: Direction) {
        if !self.idle_flag(direction).swap(true, Ordering::AcqRel) {
            self.ctx.metrics.record_idle();
            self.log_direction(direction, "idle");
        }
    }

    fn idle_flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Upload => &self.upload_idle,
            Direction::Download => &self.download_idle,
        }
    }

    fn describe_link(&self) -> String {
        match self.link.get() {
            Some(link) => link.to_string(),
            None => format!("{} -> ?:{}", self.peer, self.target.dst_port),
        }
    }

    fn log(&self, item: &'static str, detail: &str) {
        info!(
            connections = self.ctx.registry.len(),
            id = %self.id,
            link = %self.describe_link(),
            item,
            "{}",
            detail
        );
    }

    fn log_link(&self, link: &Link, item: &'static str, detail: &str) {
        info!(
            connections = self.ctx.registry.len(),
            id = %self.id,
            link = %link,
            item,
            "{}",
            detail
        );
    }

    fn log_direction(&self, direction: Direction, detail: &str) {
        info!(
            connections = self.ctx.registry.len(),
            id = %self.id,
            link = %self.describe_link(),
            dir = direction.arrow(),
            "{}",
            detail
        );
    }
}
