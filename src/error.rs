//! Analytics MCP error types.
//!
//! Two layers of errors live here:
//!
//! - [`McpError`]: the crate-level error returned from fallible library
//!   operations (startup, configuration, session bookkeeping).
//! - [`ErrorKind`]: the protocol-level error kind carried inside an error
//!   `Response` on the wire. Every kind maps to the scope it terminates
//!   (message, call or session), see [`ErrorKind::terminates_session`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::protocol::{SessionEvent, SessionState};

/// Analytics MCP errors.
#[derive(Error, Debug)]
pub enum McpError {
    /// A tool with the same name is already registered.
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    /// Session id is not known to the session manager.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session state machine was driven with an event that is not valid in
    /// its current state. Indicates a bug in the caller.
    #[error("Invalid session transition: {event:?} in state {from:?}")]
    InvalidTransition {
        /// State the session was in.
        from: SessionState,
        /// Event that was rejected.
        event: SessionEvent,
    },

    /// A request with the same correlation id is still in flight.
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    /// Invalid tool input schema.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for analytics MCP operations
pub type Result<T> = std::result::Result<T, McpError>;

impl From<toml::de::Error> for McpError {
    fn from(err: toml::de::Error) -> Self {
        McpError::Config(err.to_string())
    }
}

/// Protocol error kinds carried in `Response.error.kind`.
///
/// Kinds not known to this server round-trip through [`ErrorKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Payload could not be parsed at all.
    MalformedSyntax,
    /// Payload parsed but has an invalid shape.
    SchemaViolation,
    /// Message out of order for the session state. Terminates the session.
    ProtocolSequenceError,
    /// `tools/call` named a tool that is not registered.
    UnknownTool,
    /// Correlation id reused while the first request is still in flight.
    DuplicateCorrelationId,
    /// Tool call exceeded its wall-clock deadline.
    Timeout,
    /// The tool handler itself failed.
    ToolExecutionError,
    /// Call cancelled at the client's request.
    Cancelled,
    /// Request method is not part of the protocol vocabulary.
    MethodNotFound,
    /// Session header refers to an unknown session.
    SessionNotFound,
    /// Session closed before the call produced a result.
    SessionClosed,
    /// Missing or malformed bearer credentials.
    Unauthorized,
    /// Any other kind received on the wire.
    Custom(String),
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::MalformedSyntax => "MalformedSyntax",
            Self::SchemaViolation => "SchemaViolation",
            Self::ProtocolSequenceError => "ProtocolSequenceError",
            Self::UnknownTool => "UnknownTool",
            Self::DuplicateCorrelationId => "DuplicateCorrelationId",
            Self::Timeout => "Timeout",
            Self::ToolExecutionError => "ToolExecutionError",
            Self::Cancelled => "Cancelled",
            Self::MethodNotFound => "MethodNotFound",
            Self::SessionNotFound => "SessionNotFound",
            Self::SessionClosed => "SessionClosed",
            Self::Unauthorized => "Unauthorized",
            Self::Custom(kind) => kind,
        }
    }

    /// Whether an error of this kind ends the session that produced it.
    pub fn terminates_session(&self) -> bool {
        matches!(self, Self::ProtocolSequenceError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "MalformedSyntax" => Self::MalformedSyntax,
            "SchemaViolation" => Self::SchemaViolation,
            "ProtocolSequenceError" => Self::ProtocolSequenceError,
            "UnknownTool" => Self::UnknownTool,
            "DuplicateCorrelationId" => Self::DuplicateCorrelationId,
            "Timeout" => Self::Timeout,
            "ToolExecutionError" => Self::ToolExecutionError,
            "Cancelled" => Self::Cancelled,
            "MethodNotFound" => Self::MethodNotFound,
            "SessionNotFound" => Self::SessionNotFound,
            "SessionClosed" => Self::SessionClosed,
            "Unauthorized" => Self::Unauthorized,
            other => Self::Custom(other.to_string()),
        })
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|never| match never {}))
    }
}
