//! Network transport for the MCP server.
//!
//! The server builds an Axum [`Router`]; a [`Transport`] owns the listener
//! and drives that router until shutdown.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        create_router(AppState)          │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │
//!                    ▼
//!          ┌─────────────────┐
//!          │  TcpTransport   │
//!          │   (HTTP/1.1)    │
//!          └─────────────────┘
//! ```

mod tcp;

pub use tcp::TcpTransport;

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use axum::Router;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Transport trait for pluggable network backends.
///
/// Implementations handle the low-level network protocol while
/// the server remains transport-agnostic.
pub trait Transport: Send + Sync {
    /// Serve the router until `shutdown` fires.
    ///
    /// Once the listener is bound its local address is sent on `ready`.
    fn serve(
        &self,
        router: Router,
        shutdown: CancellationToken,
        ready: Option<oneshot::Sender<SocketAddr>>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;

    /// Get the listen address as a string.
    fn listen_addr(&self) -> String;
}
