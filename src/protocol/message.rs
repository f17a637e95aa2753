//! Protocol messages for MCP communication.
//!
//! A [`Message`] is one of three kinds: a `Request` carrying a caller-assigned
//! correlation id, a `Response` carrying the same id and exactly one of a
//! result or an error, or a fire-and-forget `Notification`. The wire form is
//! owned by [`crate::codec`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::methods;
use crate::error::ErrorKind;

/// Caller-assigned identifier linking a request to its response.
///
/// Ids are non-empty strings of at most [`CorrelationId::MAX_LEN`] characters
/// without control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Maximum id length in characters.
    pub const MAX_LEN: usize = 256;

    /// Validate and wrap an id.
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.is_empty() {
            return Err("correlation id must not be empty".to_string());
        }
        if id.chars().count() > Self::MAX_LEN {
            return Err(format!(
                "correlation id longer than {} characters",
                Self::MAX_LEN
            ));
        }
        if id.chars().any(char::is_control) {
            return Err("correlation id contains control characters".to_string());
        }
        Ok(Self(id))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Structured error carried by an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error kind
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional structured detail (tool-specific)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ErrorObject {
    /// Create an error without detail
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach structured detail.
    ///
    /// `detail` is an object on the wire; anything else is wrapped as
    /// `{"value": detail}`.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(match detail {
            Value::Object(_) => detail,
            other => json!({ "value": other }),
        });
        self
    }
}

/// Request expecting exactly one response
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id
    pub id: CorrelationId,
    /// Method name
    pub method: String,
    /// Parameters (JSON object)
    pub params: Option<Value>,
}

/// Terminal outcome of a request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Success payload (JSON object)
    Result(Value),
    /// Structured error
    Error(ErrorObject),
}

/// Response to a prior request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered. `None` only for error responses to
    /// payloads whose id could not be recovered.
    pub id: Option<CorrelationId>,
    /// Result or error, never both
    pub outcome: Outcome,
}

impl Response {
    /// Error carried by this response, if any
    pub fn error(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Error(err) => Some(err),
            Outcome::Result(_) => None,
        }
    }

    /// Result carried by this response, if any
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }
}

/// Fire-and-forget message
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name
    pub method: String,
    /// Parameters (JSON object)
    pub params: Option<Value>,
}

/// Protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request
    Request(Request),
    /// Response
    Response(Response),
    /// Notification
    Notification(Notification),
}

impl Message {
    /// Create a request
    pub fn request(id: CorrelationId, method: &str, params: Option<Value>) -> Self {
        Self::Request(Request {
            id,
            method: method.to_string(),
            params,
        })
    }

    /// Create a success response
    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self::Response(Response {
            id: Some(id),
            outcome: Outcome::Result(result),
        })
    }

    /// Create an error response
    pub fn error(id: Option<CorrelationId>, error: ErrorObject) -> Self {
        Self::Response(Response {
            id,
            outcome: Outcome::Error(error),
        })
    }

    /// Shorthand for an error response without detail
    pub fn error_kind(id: Option<CorrelationId>, kind: ErrorKind, message: &str) -> Self {
        Self::error(id, ErrorObject::new(kind, message))
    }

    /// Create a notification
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.to_string(),
            params,
        })
    }

    /// Create a `notifications/progress` message
    pub fn progress(
        progress_token: &Value,
        progress: u64,
        total: Option<u64>,
        message: Option<&str>,
    ) -> Self {
        let mut params = json!({
            "progressToken": progress_token,
            "progress": progress,
        });
        if let Some(total) = total {
            params["total"] = json!(total);
        }
        if let Some(message) = message {
            params["message"] = json!(message);
        }
        Self::notification(methods::PROGRESS, Some(params))
    }

    /// Create a `notifications/cancelled` message
    pub fn cancelled(request_id: &CorrelationId, reason: Option<&str>) -> Self {
        let mut params = json!({ "requestId": request_id });
        if let Some(reason) = reason {
            params["reason"] = json!(reason);
        }
        Self::notification(methods::CANCELLED, Some(params))
    }

    /// Correlation id (requests and correlated responses)
    pub fn id(&self) -> Option<&CorrelationId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => resp.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Method name (requests and notifications)
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(note) => Some(&note.method),
            Self::Response(_) => None,
        }
    }

    /// Wire name of the message kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Notification(_) => "notification",
        }
    }

    /// Whether this is part of the session handshake
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.method(),
            Some(methods::INITIALIZE | methods::INITIALIZED)
        )
    }

    /// Get the response, if this is one
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(resp) => Some(resp),
            _ => None,
        }
    }
}
