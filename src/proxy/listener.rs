use super::connection::Connection;
use super::upstream::ProxyTarget;
use crate::config::ServerConfig;
use crate::server::ServerContext;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Accepts client sockets for one server entry and hands each one to its
/// own connection task.
pub struct SniListener {
    ctx: ServerContext,
    target: Arc<ProxyTarget>,
    listener: TcpListener,
}

impl SniListener {
    /// Resolve the server entry and bind its listening socket
    pub async fn bind(ctx: ServerContext, server: &ServerConfig) -> Result<Self> {
        let target = ProxyTarget::resolve(server)
            .await
            .with_context(|| format!("Failed to resolve server entry {}", server.bind_address()))?;
        let listener = TcpListener::bind(target.bind_addr)
            .await
            .with_context(|| format!("Failed to bind listener to {}", target.bind_addr))?;

        info!(
            proxy_type = %server.proxy_type,
            proxy = %server.proxy_address(),
            bind = %server.bind_address(),
            dst_port = server.dst_port,
            "listener ready"
        );
        Ok(Self::from_parts(ctx, Arc::new(target), listener))
    }

    pub fn from_parts(ctx: ServerContext, target: Arc<ProxyTarget>, listener: TcpListener) -> Self {
        Self {
            ctx,
            target,
            listener,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one client and start its initializer on a new task
    pub async fn accept(&self) -> std::io::Result<Arc<Connection>> {
        let (stream, peer) = self.listener.accept().await?;
        let conn = Connection::new(self.ctx.clone(), Arc::clone(&self.target), peer);
        tokio::spawn(Arc::clone(&conn).run(stream));
        Ok(conn)
    }

    /// Accept forever. Accept errors are logged and never stop the listener.
    pub async fn serve(self) -> Result<()> {
        let bind_addr = self.local_addr()?;
        loop {
            if let Err(e) = self.accept().await {
                error!("accept error on {}: {}", bind_addr, e);
                // Add a small delay to prevent tight error loop
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            }
        }
    }
}
