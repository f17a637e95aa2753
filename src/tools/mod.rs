//! Callable tools.
//!
//! A tool is a named, schema-described unit of server-side functionality.
//! Tools are registered once at startup into a [`ToolRegistry`], which is
//! then shared read-only by every session.
//!
//! # Writing a Tool
//!
//! ```rust,ignore
//! use analytics_mcp::tools::{InputSchema, ToolDescriptor, ToolRegistry};
//! use serde_json::json;
//!
//! let schema = InputSchema::new(json!({
//!     "type": "object",
//!     "properties": {"property_id": {"type": "string"}},
//!     "required": ["property_id"]
//! }))?;
//!
//! let tool = ToolDescriptor::from_fn(
//!     "get_property",
//!     "Fetch a property",
//!     schema,
//!     |args, ctx| async move {
//!         ctx.progress(1, Some(2), Some("querying"));
//!         Ok(json!({"property": args["property_id"]}))
//!     },
//! );
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(tool)?;
//! ```

pub mod builtin;
mod context;
mod registry;
mod schema;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

pub use context::{ProgressReporter, ToolContext};
pub use registry::ToolRegistry;
pub use schema::InputSchema;

/// Failure reported by a tool handler
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ToolError {
    /// Human-readable message
    pub message: String,
    /// Structured detail passed through to the client
    pub detail: Option<Value>,
}

impl ToolError {
    /// Create a tool error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attach structured detail
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("JSON error: {err}"))
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Tool implementation.
///
/// Handlers run on their own task. Long-running handlers should watch
/// [`ToolContext::cancellation`]; a handler that ignores it is aborted after
/// the grace period.
#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    /// Run the tool with validated arguments
    async fn call(&self, arguments: Value, ctx: ToolContext) -> Result<Value, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`]
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F, Fut>
where
    F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        (self.f)(arguments, ctx).await
    }
}

/// Registered tool: name, schema and handler
#[derive(Clone)]
pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: InputSchema,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// Create a descriptor from a handler
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        handler: impl ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
        }
    }

    /// Create a descriptor from an async closure
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        f: F,
    ) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(
            name,
            description,
            input_schema,
            FnHandler {
                f,
                _fut: PhantomData,
            },
        )
    }

    /// Tool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tool description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Input schema
    pub fn input_schema(&self) -> &InputSchema {
        &self.input_schema
    }

    /// Shared handler reference
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// Public schema used to answer `tools/list`
    pub fn public_schema(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema.as_value(),
        })
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

/// Wrap a handler result as a `tools/call` result payload
pub fn call_result(value: &Value) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({
        "content": [{"type": "text", "text": text}],
        "isError": false,
    })
}
