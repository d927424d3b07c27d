use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::collab::agent::TeamMember;
use crate::dialog::Dialog;

/// How a tool's arguments are checked before invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgsValidation {
    Schema,
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub args_validation: ArgsValidation,
}

/// Structured content a tool can return beyond plain text (e.g. an image
/// reference). Most tools only ever populate `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub content: String,
    pub content_items: Vec<serde_json::Value>,
}

impl ToolCallOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), content_items: Vec::new() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Function '{name}' execution failed: {detail}")]
    ExecutionFailed { name: String, detail: String },
}

/// Function tool collaborator: `name, parameters, argsValidation,
/// call(dlg, agent, args)`. Takes the dialog and calling agent as context
/// and propagates cancellation the way every other suspension point in
/// the driver does.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(
        &self,
        dialog: &Dialog,
        agent: &TeamMember,
        args: &HashMap<String, serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<ToolCallOutput, ToolError>;
}

/// Explicit dependency-injected registry: a `Vec<Box<dyn Tool>>` with a
/// linear lookup by name, built up once at startup and handed to the
/// driver as `Arc<ToolRegistry>`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.spec().name == name).map(|t| t.as_ref())
    }

    /// Projects only the tools named in `allowed` — used to build the
    /// per-iteration tool list for a dialog's agent, and
    /// trivially returns empty for an FBR-toolless policy.
    pub fn project(&self, allowed: &[String]) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|t| t.spec())
            .filter(|s| allowed.iter().any(|a| a == &s.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool(&'static str);

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.0.to_string(),
                description: "dummy".into(),
                parameters: serde_json::json!({}),
                args_validation: ArgsValidation::Passthrough,
            }
        }

        async fn call(
            &self,
            _dialog: &Dialog,
            _agent: &TeamMember,
            _args: &HashMap<String, serde_json::Value>,
            _cancel: CancellationToken,
        ) -> Result<ToolCallOutput, ToolError> {
            Ok(ToolCallOutput::text(format!("ran {}", self.0)))
        }
    }

    #[test]
    fn project_filters_to_allowed_names() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(DummyTool("alpha")));
        reg.register(Box::new(DummyTool("beta")));

        let projected = reg.project(&["beta".to_string()]);
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].name, "beta");
    }

    #[test]
    fn fbr_toolless_projects_nothing() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(DummyTool("alpha")));
        assert!(reg.project(&[]).is_empty());
    }
}
