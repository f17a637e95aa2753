//! MCP HTTP server.
//!
//! Provides the session and dispatch core behind one `/mcp` endpoint:
//! - Session management (handshake, idle expiry, close)
//! - Message routing and tool calls
//! - Server-initiated notifications over SSE
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use analytics_mcp::server::{run, AppState, ServerConfig};
//! use analytics_mcp::tools::ToolRegistry;
//! use analytics_mcp::transport::TcpTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = ServerConfig::default().with_port(8080);
//! let transport = TcpTransport::new(config.addr);
//! let state = Arc::new(AppState::new(config, ToolRegistry::new()));
//!
//! let shutdown = CancellationToken::new();
//! run(state, &transport, shutdown.clone(), None).await?;
//! ```

mod config;
pub mod dispatcher;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::transport::Transport;

pub use config::{ServerConfig, MAX_CALL_TIMEOUT, MIN_CALL_TIMEOUT};
pub use dispatcher::{Dispatch, RequestMeta};
pub use handlers::{bearer_token, create_router, health_check};
pub use state::{AppState, SessionHandle, SessionManager};

/// Serve `state` on `transport` until `shutdown` fires.
///
/// Runs the idle sweeper alongside the listener. On shutdown every session is
/// closed, which also ends open session streams so the listener can drain.
pub async fn run(
    state: Arc<AppState>,
    transport: &dyn Transport,
    shutdown: CancellationToken,
    ready: Option<oneshot::Sender<SocketAddr>>,
) -> Result<()> {
    let sweeper = spawn_sweeper(Arc::clone(&state), shutdown.clone());
    let closer = tokio::spawn({
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            state.shutdown().await;
        }
    });

    tracing::info!(
        transport = transport.name(),
        addr = %transport.listen_addr(),
        tools = state.registry.len(),
        "Starting MCP server"
    );
    let served = transport
        .serve(create_router(Arc::clone(&state)), shutdown.clone(), ready)
        .await;

    // A listener failure also tears the sessions down
    shutdown.cancel();
    let _ = closer.await;
    let _ = sweeper.await;
    served
}

/// Periodically expire idle sessions until `shutdown` fires
pub fn spawn_sweeper(state: Arc<AppState>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    state.sweep_once(Instant::now()).await;
                },
            }
        }
        tracing::debug!("Idle sweeper stopped");
    })
}
