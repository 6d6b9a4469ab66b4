//! Tool table consumed by the reasoning loop.
//!
//! Tools are looked up by name. Whatever goes wrong inside a tool (unknown
//! name, bad arguments, a failed store call) comes back as an observation
//! string starting with `Error:` so the model can correct itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::SessionContext;

/// What the model is told about a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the keyword arguments.
    pub parameters: Value,
}

/// Structured tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Observation text fed back to the model.
    pub fn observation(&self) -> String {
        if !self.success {
            return format!("Error: {}", self.message);
        }
        if self.data.is_null() {
            self.message.clone()
        } else {
            format!("{}\n{}", self.message, self.data)
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    async fn invoke(
        &self,
        arguments: Value,
        session: &mut SessionContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Name → tool table.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its descriptor name; a later registration replaces an earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.descriptor().name, tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Tool reference for the system prompt, sorted by name.
    pub fn reference(&self) -> String {
        let mut out = String::new();
        for d in self.descriptors() {
            out.push_str(&format!("### {}\n{}\n", d.name, d.description));
            out.push_str(&format!(
                "Parameters: {}\n\n",
                serde_json::to_string(&d.parameters).unwrap_or_else(|_| "{}".to_string())
            ));
        }
        out
    }

    /// Invoke by name and render the result as an observation.
    pub async fn invoke(&self, name: &str, arguments: Value, session: &mut SessionContext) -> String {
        let Some(tool) = self.tools.get(name) else {
            return format!(
                "Error: unknown tool '{}'. Available tools: {}",
                name,
                self.names().join(", ")
            );
        };
        match tool.invoke(arguments, session).await {
            Ok(output) => output.observation(),
            Err(e) => format!("Error: {}", e),
        }
    }
}
