//! Application context shared by every listener and connection
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::proxy::registry::ConnectionRegistry;
use crate::proxy::socket::SocketOptions;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Resources constructed once at startup and handed to each listener;
/// connections keep a clone for their whole lifetime.
#[derive(Clone, Debug)]
pub struct ServerContext {
    pub config: Arc<AppConfig>,
    pub registry: ConnectionRegistry,
    pub metrics: Arc<Metrics>,
    pub socket_options: SocketOptions,
}

impl ServerContext {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            registry: ConnectionRegistry::new(),
            metrics: Arc::new(Metrics::new()),
            socket_options: SocketOptions::default(),
        }
    }

    pub fn with_socket_options(mut self, socket_options: SocketOptions) -> Self {
        self.socket_options = socket_options;
        self
    }

    /// Staging buffer size: one full record plus its 5-byte header
    pub fn head_capacity(&self) -> usize {
        self.config.head_buffer_size + crate::tls::RECORD_HEADER_LEN
    }
}

/// Spawn a long-running server future, logging its failure
pub fn spawn_server<Fut>(name: String, server_future: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match server_future.await {
            Ok(()) => info!("{} stopped", name),
            Err(e) => error!("{} error: {:#}", name, e),
        }
    })
}
