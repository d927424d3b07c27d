use std::collections::HashMap;

use async_trait::async_trait;
use dominds_core::collab::agent::TeamMember;
use dominds_core::collab::tools::{ArgsValidation, Tool, ToolCallOutput, ToolError, ToolSpec};
use dominds_core::dialog::Dialog;
use tokio_util::sync::CancellationToken;

/// Returns its `text` argument unchanged — a function-tool round-trip
/// exercisable without a real LLM-facing tool catalog.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "echo".to_string(),
            description: "Echoes the given text back unchanged.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
            args_validation: ArgsValidation::Schema,
        }
    }

    async fn call(
        &self,
        _dialog: &Dialog,
        _agent: &TeamMember,
        args: &HashMap<String, serde_json::Value>,
        _cancel: CancellationToken,
    ) -> Result<ToolCallOutput, ToolError> {
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field 'text'".to_string()))?;
        Ok(ToolCallOutput::text(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominds_core::ids::DialogId;

    fn member() -> TeamMember {
        TeamMember {
            id: "alice".into(),
            name: "Alice".into(),
            provider: "test".into(),
            model: "test".into(),
            streaming: false,
            model_params: None,
            fbr_model_params: None,
            fbr_effort: 0,
            diligence_push_max: 3,
        }
    }

    #[tokio::test]
    async fn echoes_text_argument() {
        let tool = EchoTool;
        let dlg = Dialog::new_root(DialogId::new_root(), "alice", 3);
        let mut args = HashMap::new();
        args.insert("text".to_string(), serde_json::json!("hi"));
        let out = tool.call(&dlg, &member(), &args, CancellationToken::new()).await.unwrap();
        assert_eq!(out.content, "hi");
    }

    #[tokio::test]
    async fn missing_text_is_invalid_arguments() {
        let tool = EchoTool;
        let dlg = Dialog::new_root(DialogId::new_root(), "alice", 3);
        let args = HashMap::new();
        let err = tool.call(&dlg, &member(), &args, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
