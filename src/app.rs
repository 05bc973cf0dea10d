use crate::config::AppConfig;
use crate::proxy::SniListener;
use crate::server::{ServerContext, spawn_server};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct App {
    pub ctx: ServerContext,
    handles: Vec<JoinHandle<()>>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self::with_context(ServerContext::new(Arc::new(config)))
    }

    pub fn with_context(ctx: ServerContext) -> Self {
        Self {
            ctx,
            handles: Vec::new(),
        }
    }

    /// Bind every server entry, then start one accept loop per listener.
    ///
    /// Binding happens before any listener starts, so a bad entry fails
    /// startup as a whole. Returns the bound addresses in config order.
    pub async fn start(&mut self) -> Result<Vec<SocketAddr>> {
        info!("Starting SNI proxy...");
        info!(
            head_buffer_size = self.ctx.config.head_buffer_size,
            forwarder_buffer_size = self.ctx.config.forwarder_buffer_size,
            "buffer sizes"
        );

        let mut listeners = Vec::with_capacity(self.ctx.config.servers.len());
        for server in &self.ctx.config.servers {
            listeners.push(SniListener::bind(self.ctx.clone(), server).await?);
        }

        let mut addrs = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let addr = listener.local_addr()?;
            addrs.push(addr);
            self.handles
                .push(spawn_server(format!("listener {}", addr), listener.serve()));
        }

        info!("All {} listeners started", addrs.len());
        Ok(addrs)
    }

    /// Stop accepting. Established tunnels run until one of their legs fails.
    pub async fn shutdown(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        futures::future::join_all(self.handles.drain(..)).await;
        info!(
            connections = self.ctx.registry.len(),
            "listeners stopped"
        );
    }
}
