//! Message codec.
//!
//! Converts between JSON bytes and [`Message`] values. Decoding never panics
//! and never throws: every malformed payload comes back as a [`DecodeError`]
//! value, with the correlation id attached whenever it could be recovered so
//! the caller can still answer with a correlated error response. Encoding is
//! total.
//!
//! # Wire Format
//!
//! ```text
//! { "id"?:     string,
//!   "kind":    "request" | "response" | "notification",
//!   "method"?: string,
//!   "params"?: object,
//!   "result"?: object,
//!   "error"?:  { "kind": string, "message": string, "detail"?: object } }
//! ```
//!
//! | Kind           | `id`      | `method` | `params` | `result` / `error`  |
//! |----------------|-----------|----------|----------|---------------------|
//! | `request`      | required  | required | optional | absent              |
//! | `response`     | required¹ | absent   | absent   | exactly one         |
//! | `notification` | absent    | required | optional | absent              |
//!
//! ¹ An error response may omit `id` when answering a payload whose id was
//! unrecoverable.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::protocol::{
    CorrelationId, ErrorObject, Message, Notification, Outcome, Request, Response,
};

/// Why a payload failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Not parseable as JSON
    MalformedSyntax,
    /// Parseable, but not a valid envelope
    SchemaViolation,
}

impl From<DecodeErrorKind> for ErrorKind {
    fn from(kind: DecodeErrorKind) -> Self {
        match kind {
            DecodeErrorKind::MalformedSyntax => ErrorKind::MalformedSyntax,
            DecodeErrorKind::SchemaViolation => ErrorKind::SchemaViolation,
        }
    }
}

/// Decode failure, returned as a value
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct DecodeError {
    /// Failure class
    pub kind: DecodeErrorKind,
    /// What was wrong
    pub message: String,
    /// Correlation id, if it could be recovered
    pub id: Option<CorrelationId>,
}

impl DecodeError {
    fn syntax(message: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::MalformedSyntax,
            message: message.into(),
            id: None,
        }
    }

    fn schema(message: impl Into<String>, id: Option<&CorrelationId>) -> Self {
        Self {
            kind: DecodeErrorKind::SchemaViolation,
            message: message.into(),
            id: id.cloned(),
        }
    }

    /// Error response answering the undecodable payload
    pub fn into_response(self) -> Message {
        Message::error_kind(self.id, self.kind.into(), &self.message)
    }
}

/// Decode one envelope from bytes
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::syntax(e.to_string()))?;
    decode_value(value)
}

/// Decode one envelope from an already-parsed JSON value
pub fn decode_value(value: Value) -> Result<Message, DecodeError> {
    let Value::Object(mut envelope) = value else {
        return Err(DecodeError::schema("envelope must be a JSON object", None));
    };

    let id = take_id(&mut envelope)?;
    let id = id.as_ref();

    let kind = match envelope.remove("kind") {
        Some(Value::String(kind)) => kind,
        Some(_) => return Err(DecodeError::schema("kind must be a string", id)),
        None => return Err(DecodeError::schema("missing kind", id)),
    };

    let method = take_string(&mut envelope, "method", id)?;
    let params = take_object(&mut envelope, "params", id)?;
    let result = take_object(&mut envelope, "result", id)?;
    let error = take_error(&mut envelope, id)?;

    match kind.as_str() {
        "request" => {
            let id = id.ok_or_else(|| DecodeError::schema("request requires id", None))?;
            let method = require_method(method, Some(id))?;
            reject_outcome(result.as_ref(), error.as_ref(), "request", Some(id))?;
            Ok(Message::Request(Request {
                id: id.clone(),
                method,
                params,
            }))
        },
        "notification" => {
            if id.is_some() {
                return Err(DecodeError::schema("notification must not carry id", id));
            }
            let method = require_method(method, None)?;
            reject_outcome(result.as_ref(), error.as_ref(), "notification", None)?;
            Ok(Message::Notification(Notification { method, params }))
        },
        "response" => {
            if method.is_some() {
                return Err(DecodeError::schema("response must not carry method", id));
            }
            if params.is_some() {
                return Err(DecodeError::schema("response must not carry params", id));
            }
            let outcome = match (result, error) {
                (Some(result), None) => {
                    if id.is_none() {
                        return Err(DecodeError::schema("success response requires id", None));
                    }
                    Outcome::Result(result)
                },
                (None, Some(error)) => Outcome::Error(error),
                (Some(_), Some(_)) => {
                    return Err(DecodeError::schema(
                        "response carries both result and error",
                        id,
                    ))
                },
                (None, None) => {
                    return Err(DecodeError::schema(
                        "response carries neither result nor error",
                        id,
                    ))
                },
            };
            Ok(Message::Response(Response {
                id: id.cloned(),
                outcome,
            }))
        },
        other => Err(DecodeError::schema(
            format!("unknown message kind: {other}"),
            id,
        )),
    }
}

/// Encode a message as JSON bytes
pub fn encode(message: &Message) -> Vec<u8> {
    to_value(message).to_string().into_bytes()
}

/// Encode a message as a JSON value
pub fn to_value(message: &Message) -> Value {
    let mut envelope = Map::new();

    if let Some(id) = message.id() {
        envelope.insert("id".to_string(), Value::String(id.as_str().to_string()));
    }
    envelope.insert(
        "kind".to_string(),
        Value::String(message.kind_name().to_string()),
    );

    match message {
        Message::Request(Request { method, params, .. })
        | Message::Notification(Notification { method, params }) => {
            envelope.insert("method".to_string(), Value::String(method.clone()));
            if let Some(params) = params {
                envelope.insert("params".to_string(), params.clone());
            }
        },
        Message::Response(Response { outcome, .. }) => match outcome {
            Outcome::Result(result) => {
                envelope.insert("result".to_string(), result.clone());
            },
            Outcome::Error(error) => {
                envelope.insert("error".to_string(), error_to_value(error));
            },
        },
    }

    Value::Object(envelope)
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        to_value(self).serialize(serializer)
    }
}

fn error_to_value(error: &ErrorObject) -> Value {
    let mut object = Map::new();
    object.insert(
        "kind".to_string(),
        Value::String(error.kind.as_str().to_string()),
    );
    object.insert("message".to_string(), Value::String(error.message.clone()));
    if let Some(detail) = &error.detail {
        object.insert("detail".to_string(), detail.clone());
    }
    Value::Object(object)
}

fn take_id(envelope: &mut Map<String, Value>) -> Result<Option<CorrelationId>, DecodeError> {
    match envelope.remove("id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => CorrelationId::new(raw)
            .map(Some)
            .map_err(|e| DecodeError::schema(e, None)),
        Some(_) => Err(DecodeError::schema("id must be a string", None)),
    }
}

fn take_string(
    envelope: &mut Map<String, Value>,
    field: &str,
    id: Option<&CorrelationId>,
) -> Result<Option<String>, DecodeError> {
    match envelope.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DecodeError::schema(format!("{field} must be a string"), id)),
    }
}

fn take_object(
    envelope: &mut Map<String, Value>,
    field: &str,
    id: Option<&CorrelationId>,
) -> Result<Option<Value>, DecodeError> {
    match envelope.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Object(_)) => Ok(Some(value)),
        Some(_) => Err(DecodeError::schema(format!("{field} must be an object"), id)),
    }
}

fn take_error(
    envelope: &mut Map<String, Value>,
    id: Option<&CorrelationId>,
) -> Result<Option<ErrorObject>, DecodeError> {
    match envelope.remove("error") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let error: ErrorObject = serde_json::from_value(value)
                .map_err(|e| DecodeError::schema(format!("invalid error object: {e}"), id))?;
            if matches!(&error.detail, Some(detail) if !detail.is_object()) {
                return Err(DecodeError::schema("error detail must be an object", id));
            }
            Ok(Some(error))
        },
    }
}

fn require_method(
    method: Option<String>,
    id: Option<&CorrelationId>,
) -> Result<String, DecodeError> {
    match method {
        Some(method) if !method.trim().is_empty() => Ok(method),
        Some(_) => Err(DecodeError::schema("method must not be empty", id)),
        None => Err(DecodeError::schema("missing method", id)),
    }
}

fn reject_outcome(
    result: Option<&Value>,
    error: Option<&ErrorObject>,
    kind: &str,
    id: Option<&CorrelationId>,
) -> Result<(), DecodeError> {
    if result.is_some() || error.is_some() {
        return Err(DecodeError::schema(
            format!("{kind} must not carry result or error"),
            id,
        ));
    }
    Ok(())
}
