//! TCP transport.
//!
//! HTTP/1.1 over TCP using Axum's built-in server, with graceful shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::Transport;
use crate::error::{McpError, Result};

/// TCP/HTTP transport using Axum's built-in server.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Address to listen on.
    listen_addr: SocketAddr,
}

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self { listen_addr }
    }

    /// Create with default localhost address.
    pub fn localhost(port: u16) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 8080)))
    }
}

impl Transport for TcpTransport {
    fn serve(
        &self,
        router: Router,
        shutdown: CancellationToken,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let addr = self.listen_addr;

        Box::pin(async move {
            let listener = TcpListener::bind(addr).await.map_err(|e| {
                McpError::Server(format!("Failed to bind TCP to {addr}: {e}"))
            })?;
            let local = listener.local_addr()?;
            tracing::info!(addr = %local, "Listening");

            if let Some(ready) = ready {
                let _ = ready.send(local);
            }

            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|e| McpError::Server(format!("TCP server error: {e}")))?;

            tracing::info!("Listener stopped");
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "TCP/HTTP"
    }

    fn listen_addr(&self) -> String {
        format!("http://{}", self.listen_addr)
    }
}
