//! Tool registry.
//!
//! Built single-threaded during startup, then frozen behind an `Arc` and read
//! concurrently without locking.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::ToolDescriptor;
use crate::error::{McpError, Result};

/// Registered tools in registration order
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique and case-sensitive.
    pub fn register(&mut self, tool: ToolDescriptor) -> Result<()> {
        let name = tool.name();
        if name.trim().is_empty() {
            return Err(McpError::InvalidSchema(
                "tool name must not be empty".to_string(),
            ));
        }
        if self.by_name.contains_key(name) {
            return Err(McpError::DuplicateName(name.to_string()));
        }

        tracing::debug!(tool = name, "Registered tool");
        self.by_name.insert(name.to_string(), self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    /// Builder-style registration
    pub fn with_tool(mut self, tool: ToolDescriptor) -> Result<Self> {
        self.register(tool)?;
        Ok(self)
    }

    /// Look up a tool by exact name
    pub fn lookup(&self, name: &str) -> Option<&ToolDescriptor> {
        self.by_name.get(name).and_then(|&index| self.tools.get(index))
    }

    /// Tools in registration order
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// `tools/list` result payload
    pub fn list_result(&self) -> Value {
        json!({
            "tools": self.list().map(ToolDescriptor::public_schema).collect::<Vec<_>>(),
        })
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if no tools are registered
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
