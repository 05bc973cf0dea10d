pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod server;
pub mod tls;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::{AppConfig, LoggingConfig, ProxyKind, ServerConfig};
pub use error::{SniProxyError, SniProxyResult};
