//! MCP protocol vocabulary and session model.
//!
//! # Message Flow
//!
//! ```text
//! Client                                  Server
//!    |                                      |
//!    |------ initialize (request) -------->|  Created -> Negotiating -> Ready
//!    |<----- result (capabilities) --------|
//!    |------ notifications/initialized --->|
//!    |                                      |
//!    |------ tools/list ------------------>|
//!    |<----- result (tools) ---------------|
//!    |                                      |
//!    |------ tools/call (id=a) ----------->|  InFlightCall a
//!    |------ tools/call (id=b) ----------->|  InFlightCall b
//!    |<----- notifications/progress -------|
//!    |<----- result (id=b) ----------------|  completion order, not
//!    |<----- error Timeout (id=a) ---------|  arrival order
//!    |                                      |
//!    |------ session/close --------------->|  Ready -> Closing -> Closed
//! ```
//!
//! ## State Machine
//!
//! | State         | Description                        | Valid Transitions   |
//! |---------------|------------------------------------|---------------------|
//! | `Created`     | No handshake yet                   | → Negotiating, Closing |
//! | `Negotiating` | `initialize` received              | → Ready, Closing    |
//! | `Ready`       | Accepting tool traffic             | → Closing           |
//! | `Closing`     | Draining in-flight calls           | → Closed            |
//! | `Closed`      | Terminal                           |                     |
//!
//! Any non-handshake message before `Ready` is a `ProtocolSequenceError` and
//! closes the session.

mod capabilities;
mod message;
mod session;

pub use capabilities::{
    negotiate_version, Capabilities, FeatureFlags, Implementation, InitializeParams,
    InitializeResult, NegotiatedCaps,
};
pub use message::{CorrelationId, ErrorObject, Message, Notification, Outcome, Request, Response};
pub use session::{Session, SessionEvent, SessionId, SessionState, SessionStats};

/// Protocol version advertised when the client asks for an unknown one
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions this server speaks
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Server name reported in `serverInfo`
pub const SERVER_NAME: &str = "analytics-mcp";

/// HTTP header binding a request to its session
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Method names
pub mod methods {
    /// Handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Handshake completion notification
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check
    pub const PING: &str = "ping";
    /// Tool discovery
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation
    pub const TOOLS_CALL: &str = "tools/call";
    /// Cancel an in-flight request
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress of an in-flight request
    pub const PROGRESS: &str = "notifications/progress";
    /// Explicit session close
    pub const SESSION_CLOSE: &str = "session/close";
}
