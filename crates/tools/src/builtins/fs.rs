//! File system tools: read and write files within a workspace root.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use dominds_core::collab::agent::TeamMember;
use dominds_core::collab::tools::{ArgsValidation, Tool, ToolCallOutput, ToolError, ToolSpec};
use dominds_core::dialog::Dialog;
use tokio_util::sync::CancellationToken;

/// Find the largest byte offset ≤ `max` that falls on a UTF-8 character
/// boundary. Safe to use as `&s[..truncate_byte_boundary(s, max)]`.
fn truncate_byte_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

fn exec_failed(name: &str, detail: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed { name: name.to_string(), detail: detail.to_string() }
}

pub struct ReadFileTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read the contents of a file within the workspace.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path from workspace root" },
                    "max_bytes": { "type": "integer", "description": "Maximum bytes to read (default 65536)" },
                },
                "required": ["path"],
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
        let rel_path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field 'path'".to_string()))?;

        let full = self.workspace_root.join(rel_path);
        let canonical = full.canonicalize().map_err(|e| exec_failed("read_file", format!("cannot resolve path '{rel_path}': {e}")))?;

        let root_canonical = self.workspace_root.canonicalize().map_err(|e| exec_failed("read_file", e))?;
        if !canonical.starts_with(&root_canonical) {
            return Err(exec_failed("read_file", format!("path escapes workspace boundary: {}", canonical.display())));
        }

        let max_bytes = args.get("max_bytes").and_then(|v| v.as_u64()).unwrap_or(65536) as usize;

        let content = tokio::fs::read_to_string(&canonical).await.map_err(|e| exec_failed("read_file", e))?;
        let truncated = if content.len() > max_bytes {
            let end = truncate_byte_boundary(&content, max_bytes);
            format!("{}…[truncated at {} bytes]", &content[..end], max_bytes)
        } else {
            content
        };

        Ok(ToolCallOutput::text(truncated))
    }
}

pub struct WriteFileTool {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Write content to a file within the workspace (creates or overwrites).".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Relative path from workspace root" },
                    "content": { "type": "string", "description": "File content to write" },
                },
                "required": ["path", "content"],
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
        let rel_path = args
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field 'path'".to_string()))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field 'content'".to_string()))?;

        let full = self.workspace_root.join(rel_path);
        let root_canonical = self.workspace_root.canonicalize().map_err(|e| exec_failed("write_file", e))?;

        if let Ok(canonical) = full.canonicalize() {
            if !canonical.starts_with(&root_canonical) {
                return Err(exec_failed("write_file", format!("path escapes workspace boundary: {}", canonical.display())));
            }
        } else {
            let parent = full.parent().ok_or_else(|| exec_failed("write_file", "invalid path"))?;
            tokio::fs::create_dir_all(parent).await.map_err(|e| exec_failed("write_file", e))?;
            let parent_canonical = parent.canonicalize().map_err(|e| exec_failed("write_file", e))?;
            if !parent_canonical.starts_with(&root_canonical) {
                return Err(exec_failed("write_file", format!("parent escapes workspace boundary: {}", parent_canonical.display())));
            }
        }

        tokio::fs::write(&full, content).await.map_err(|e| exec_failed("write_file", e))?;
        Ok(ToolCallOutput::text(format!("wrote {} bytes to {}", content.len(), rel_path)))
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
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteFileTool { workspace_root: dir.path().to_path_buf() };
        let read = ReadFileTool { workspace_root: dir.path().to_path_buf() };
        let dlg = Dialog::new_root(DialogId::new_root(), "alice", 3);

        let mut write_args = HashMap::new();
        write_args.insert("path".to_string(), serde_json::json!("notes.txt"));
        write_args.insert("content".to_string(), serde_json::json!("hello world"));
        write.call(&dlg, &member(), &write_args, CancellationToken::new()).await.unwrap();

        let mut read_args = HashMap::new();
        read_args.insert("path".to_string(), serde_json::json!("notes.txt"));
        let out = read.call(&dlg, &member(), &read_args, CancellationToken::new()).await.unwrap();
        assert_eq!(out.content, "hello world");
    }

    #[tokio::test]
    async fn read_escaping_workspace_fails() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFileTool { workspace_root: dir.path().to_path_buf() };
        let dlg = Dialog::new_root(DialogId::new_root(), "alice", 3);
        let mut args = HashMap::new();
        args.insert("path".to_string(), serde_json::json!("../../etc/passwd"));
        let err = read.call(&dlg, &member(), &args, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
