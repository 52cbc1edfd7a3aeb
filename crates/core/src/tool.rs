//! Tool trait: the abstraction over assistant capabilities.
//!
//! Tools are what let the assistant act: evaluate arithmetic, read the
//! clock, look up the weather. Each tool advertises a JSON schema for its
//! arguments and returns plain text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Prefix marking a tool result that carries a failure instead of output.
pub const ERROR_PREFIX: &str = "Error: ";

/// The outcome of one tool call, as appended to the transcript.
///
/// Failures are not a separate type: they are encoded in `content` with an
/// `"Error: "` prefix so the model can read and react to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result answers
    pub tool_call_id: String,

    /// The tool that was requested
    pub name: String,

    /// Output text, or an error description
    pub content: String,
}

impl ToolResult {
    pub fn success(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn error(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: format!("{ERROR_PREFIX}{message}"),
        }
    }

    pub fn is_error(&self) -> bool {
        self.content.starts_with(ERROR_PREFIX)
    }
}

/// The core Tool trait.
///
/// Each capability (calculator, clock, weather, ...) implements this trait
/// and is registered once at startup in a [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool with structured arguments.
    async fn execute(
        &self,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// Names are unique. Iteration follows registration order so the schema list
/// advertised to the model is reproducible. Built once at startup and then
/// only read, so it can be shared across sessions behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if another tool already uses its name.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ToolError::AlreadyRegistered(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(Arc::from(tool));
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&i| self.tools[i].as_ref())
    }

    /// Get a shareable handle to a tool, for running it on another task.
    pub fn resolve(&self, name: &str) -> std::result::Result<Arc<dyn Tool>, ToolError> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.tools[i]))
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// All registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
