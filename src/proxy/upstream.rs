use super::socket::SocketOptions;
use crate::config::{ProxyKind, ServerConfig};
use crate::error::UpstreamError;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

/// Bound on TCP connect plus proxy handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a tunnel to `host:port` through a forward proxy.
///
/// The returned stream is already past the proxy handshake and carries raw
/// bytes to the destination.
#[async_trait]
pub trait UpstreamDialer: Send + Sync {
    async fn dial(
        &self,
        proxy: SocketAddr,
        host: &str,
        port: u16,
        options: &SocketOptions,
    ) -> Result<TcpStream, UpstreamError>;
}

/// SOCKS5 CONNECT with the host name left for the proxy to resolve
pub struct SocksDialer;

/// HTTP/1.1 CONNECT tunnel
pub struct HttpDialer;

async fn connect_proxy(proxy: SocketAddr, options: &SocketOptions) -> Result<TcpStream, UpstreamError> {
    let stream = TcpStream::connect(proxy)
        .await
        .map_err(|source| UpstreamError::ConnectFailed {
            proxy: proxy.to_string(),
            source,
        })?;
    options
        .apply(&stream)
        .map_err(|source| UpstreamError::ConnectFailed {
            proxy: proxy.to_string(),
            source,
        })?;
    Ok(stream)
}

#[async_trait]
impl UpstreamDialer for SocksDialer {
    async fn dial(
        &self,
        proxy: SocketAddr,
        host: &str,
        port: u16,
        options: &SocketOptions,
    ) -> Result<TcpStream, UpstreamError> {
        let stream = connect_proxy(proxy, options).await?;
        let tunnel = Socks5Stream::connect_with_socket(stream, (host, port))
            .await
            .map_err(|e| UpstreamError::Handshake {
                proxy: proxy.to_string(),
                target: format!("{}:{}", host, port),
                reason: e.to_string(),
            })?;
        Ok(tunnel.into_inner())
    }
}

#[async_trait]
impl UpstreamDialer for HttpDialer {
    async fn dial(
        &self,
        proxy: SocketAddr,
        host: &str,
        port: u16,
        options: &SocketOptions,
    ) -> Result<TcpStream, UpstreamError> {
        let mut stream = connect_proxy(proxy, options).await?;
        async_http_proxy::http_connect_tokio(&mut stream, host, port)
            .await
            .map_err(|e| UpstreamError::Handshake {
                proxy: proxy.to_string(),
                target: format!("{}:{}", host, port),
                reason: e.to_string(),
            })?;
        Ok(stream)
    }
}

/// Immutable per-listener routing: how and where every tunnel of one
/// listener goes.
#[derive(Clone)]
pub struct ProxyTarget {
    pub kind: ProxyKind,
    pub proxy_addr: SocketAddr,
    pub bind_addr: SocketAddr,
    pub dst_port: u16,
    dialer: Arc<dyn UpstreamDialer>,
}

impl fmt::Debug for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTarget")
            .field("kind", &self.kind)
            .field("proxy_addr", &self.proxy_addr)
            .field("bind_addr", &self.bind_addr)
            .field("dst_port", &self.dst_port)
            .finish()
    }
}

impl ProxyTarget {
    pub fn new(kind: ProxyKind, proxy_addr: SocketAddr, bind_addr: SocketAddr, dst_port: u16) -> Self {
        let dialer: Arc<dyn UpstreamDialer> = match kind {
            ProxyKind::Socks => Arc::new(SocksDialer),
            ProxyKind::Http => Arc::new(HttpDialer),
        };
        Self {
            kind,
            proxy_addr,
            bind_addr,
            dst_port,
            dialer,
        }
    }

    /// Replace the dialer, keeping the addresses
    pub fn with_dialer(mut self, dialer: Arc<dyn UpstreamDialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Resolve the proxy and bind hosts of a server entry once.
    pub async fn resolve(server: &ServerConfig) -> Result<Self, UpstreamError> {
        let proxy_addr = lookup(&server.proxy_host, server.proxy_port).await?;
        let bind_addr = lookup(&server.bind_host, server.bind_port).await?;
        Ok(Self::new(server.proxy_type, proxy_addr, bind_addr, server.dst_port))
    }

    /// Open the upstream leg to `host:dst_port`, bounded by [`CONNECT_TIMEOUT`].
    pub async fn connect(&self, host: &str, options: &SocketOptions) -> Result<TcpStream, UpstreamError> {
        debug!(proxy = %self.proxy_addr, kind = %self.kind, "dialing {}:{}", host, self.dst_port);
        let dial = self.dialer.dial(self.proxy_addr, host, self.dst_port, options);
        tokio::time::timeout(CONNECT_TIMEOUT, dial)
            .await
            .map_err(|_| UpstreamError::Timeout {
                target: format!("{}:{}", host, self.dst_port),
                timeout: CONNECT_TIMEOUT,
            })?
    }
}

async fn lookup(host: &str, port: u16) -> Result<SocketAddr, UpstreamError> {
    tokio::net::lookup_host((host, port))
        .await
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| UpstreamError::Resolve {
            host: host.to_string(),
        })
}
