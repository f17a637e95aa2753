//! # Analytics MCP - Model Context Protocol server core
//!
//! Session and dispatch core of an analytics MCP server reachable over HTTP.
//! Clients open a session, negotiate capabilities, list the registered
//! analytics tools and call them; every request gets exactly one correlated
//! response unless its session closes first.
//!
//! ## Features
//!
//! - **Session lifecycle**: `initialize` handshake, idle expiry, explicit close
//! - **Concurrent tool calls**: one task per call, no head-of-line blocking
//! - **Timeouts and cancellation**: wall-clock deadline, cooperative cancel, forced abort
//! - **Progress**: `notifications/progress` over SSE, dropped when nobody listens
//! - **Strict correlation**: duplicate in-flight ids are rejected
//!
//! ## Architecture
//!
//! ```text
//!  HTTP POST /mcp ──> codec::decode ──> server::dispatcher ──> tools::ToolRegistry
//!                                            │                        │
//!                                   SessionManager state              ▼
//!                                            │                 engine::ExecutionEngine
//!                                            ▼                        │
//!  HTTP reply / SSE  <── codec::encode <── Dispatch / PendingCall <───┘
//! ```
//!
//! ### Session States
//!
//! ```text
//!   [Created] ── initialize ──> [Negotiating] ── agreed ──> [Ready]
//!       │                             │                        │
//!       └──── sequence error / close / idle ──────────────────┤
//!                                                              v
//!                                   [Closed] <── drained ── [Closing]
//! ```
//!
//! ### Wire Envelope
//!
//! | Field    | Kinds                    | Notes                              |
//! |----------|--------------------------|------------------------------------|
//! | `id`     | request, response        | string, 1..=256 chars              |
//! | `kind`   | all                      | `request`/`response`/`notification`|
//! | `method` | request, notification    |                                    |
//! | `params` | request, notification    | object, optional                   |
//! | `result` | response                 | object, exclusive with `error`     |
//! | `error`  | response                 | `{ kind, message, detail? }`       |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use analytics_mcp::{server, tools, transport::TcpTransport, AppState, ServerConfig};
//!
//! let mut registry = tools::ToolRegistry::new();
//! tools::builtin::register_builtin_tools(&mut registry)?;
//!
//! let config = ServerConfig::default().with_port(8080);
//! let transport = TcpTransport::new(config.addr);
//! let state = Arc::new(AppState::new(config, registry));
//! server::run(state, &transport, shutdown, None).await?;
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Envelope decoding and encoding
//! - [`protocol`]: Messages, capabilities and the session state machine
//! - [`tools`]: Tool descriptors, schemas, registry and built-in tools
//! - [`engine`]: Supervised tool execution
//! - [`server`]: Session manager, dispatcher and HTTP handlers (Axum-based)
//! - [`transport`]: Listener backends
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

// Re-exports for convenience
pub use codec::{decode, encode, DecodeError};
pub use config::Config;
pub use engine::{ExecutionEngine, PendingCall};
pub use error::{ErrorKind, McpError, Result};
pub use protocol::{CorrelationId, Message, Session, SessionId, SessionState};
pub use server::{AppState, ServerConfig};
pub use tools::{ToolContext, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
pub use transport::{TcpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
