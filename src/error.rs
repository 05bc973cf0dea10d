//! Error types for the SNI proxy
use thiserror::Error;

/// Main error type for SNI proxy operations
#[derive(Error, Debug)]
pub enum SniProxyError {
    /// Malformed or unexpected TLS structure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Record or buffer limits exceeded
    #[error("Capacity error: {0}")]
    Capacity(#[from] CapacityError),

    /// Staging buffer used after its content was transferred
    #[error("Head buffer is closed")]
    BufferClosed,

    /// Liveness probe confirmed the peer is gone
    #[error("Peer is gone")]
    PeerGone,

    /// Forward proxy or destination unreachable
    #[error("Upstream connection error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Network I/O errors
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SniProxyError {
    /// Whether this failure belongs to the normal network lifecycle.
    ///
    /// Expected failures are logged tersely; everything else gets full detail.
    pub fn is_expected(&self) -> bool {
        match self {
            SniProxyError::Protocol(_)
            | SniProxyError::Capacity(_)
            | SniProxyError::PeerGone
            | SniProxyError::Upstream(_) => true,
            SniProxyError::Io(e) => is_expected_io(e),
            SniProxyError::BufferClosed => false,
        }
    }
}

/// Timeouts, resets and broken pipes are part of normal operation.
pub fn is_expected_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

/// TLS record / ClientHello decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First record is not a Handshake record
    #[error("Unknown protocol: record type {0:#04x} is not a handshake")]
    NotHandshakeRecord(u8),

    /// Handshake message is not a ClientHello
    #[error("Not a ClientHello handshake message: type {0:#04x}")]
    NotClientHello(u8),

    /// Record length does not match the ClientHello length
    #[error("ClientHello length mismatch: record {record_length}, client hello {client_hello_length}")]
    LengthMismatch {
        record_length: usize,
        client_hello_length: usize,
    },

    /// A fixed or length-prefixed field runs past the ClientHello end
    #[error("Field {field} runs past the end of the ClientHello")]
    FieldOutOfBounds { field: &'static str },

    /// Extensions block runs past the ClientHello end
    #[error("Extensions length {extensions_length} exceeds remaining {remaining} bytes")]
    ExtensionsOutOfBounds {
        extensions_length: usize,
        remaining: usize,
    },

    /// Single extension runs past the extensions block
    #[error("Extension {extension_type} of length {length} exceeds remaining {remaining} bytes")]
    ExtensionOutOfBounds {
        extension_type: u16,
        length: usize,
        remaining: usize,
    },

    /// ServerNameList length disagrees with its extension length
    #[error("ServerNameList length {list_length} does not fit extension length {extension_length}")]
    ServerNameListLengthMismatch {
        extension_length: usize,
        list_length: usize,
    },

    /// Single ServerName entry runs past the ServerNameList
    #[error("ServerName of length {length} exceeds remaining {remaining} bytes")]
    ServerNameOutOfBounds { length: usize, remaining: usize },

    /// Host name is not valid UTF-8
    #[error("Server name is not valid UTF-8")]
    InvalidServerName,

    /// ClientHello carries no host name entry
    #[error("Unknown server name: no SNI host name in ClientHello")]
    ServerNameNotFound,
}

/// Configured buffer limits exceeded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// A read would go past the staging buffer capacity
    #[error("Head buffer exhausted: need {required} bytes, capacity {capacity}")]
    BufferExhausted { required: usize, capacity: usize },

    /// Record length exceeds the configured head buffer size
    #[error("ClientHello too long: {length} > {limit}")]
    ClientHelloTooLong { length: usize, limit: usize },
}

/// Upstream connection errors
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// TCP connection to the forward proxy failed
    #[error("Failed to connect to proxy {proxy}: {source}")]
    ConnectFailed {
        proxy: String,
        #[source]
        source: std::io::Error,
    },

    /// Forward proxy refused or broke the tunnel handshake
    #[error("Proxy {proxy} handshake for {target} failed: {reason}")]
    Handshake {
        proxy: String,
        target: String,
        reason: String,
    },

    /// Connect plus handshake did not finish in time
    #[error("Upstream connect to {target} timed out after {timeout:?}")]
    Timeout {
        target: String,
        timeout: std::time::Duration,
    },

    /// Proxy host could not be resolved
    #[error("Failed to resolve proxy host {host}")]
    Resolve { host: String },
}

/// Result type alias for convenience
pub type SniProxyResult<T> = Result<T, SniProxyError>;
