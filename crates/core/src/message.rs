use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grammar a `prompting_msg` was authored in — plain prose or a structured
/// tellask block the parser should scan for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grammar {
    Markdown,
    Tellask,
}

/// A single entry in a dialog's history. Closed tagged enum rather than a
/// duck-typed shape with optional fields — matching against it is exhaustive,
/// so a new variant forces every call site to be updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatMessage {
    /// User-authored turn. Carries the genseq of the iteration it was
    /// appended in and the grammar it should be parsed with.
    Prompting {
        msg_id: String,
        content: String,
        grammar: Grammar,
        genseq: u64,
    },
    /// Synthetic context injection (memories, subdialog responses, course
    /// prefixes). Always role=user on the wire but never user-authored.
    Environment { content: String },
    /// Guidance injected for this generation only; never retained once the
    /// iteration that produced it ends.
    TransientGuide { content: String },
    /// Assistant prose.
    Saying { content: String, genseq: u64 },
    /// Assistant reasoning, kept separate from `Saying` so UIs can fold it.
    Thinking { content: String, genseq: u64 },
    /// A function tool invocation emitted by the assistant.
    FuncCall {
        id: String,
        name: String,
        arguments: String,
        genseq: u64,
    },
    /// The result of executing a `FuncCall`. Shares `{id, genseq}` with it
    /// so context assembly and tool execution can pair them up.
    FuncResult {
        id: String,
        name: String,
        content: String,
        genseq: u64,
    },
    /// The reply delivered back into a subdialog or supdialog after a
    /// tellask call completes.
    TellaskResult {
        responder_id: String,
        tellask_head: String,
        status: TellaskResultStatus,
        content: String,
    },
    /// Rendered for the UI only; filtered out at context-assembly time and
    /// never sent to the LLM.
    UiOnlyMarkdown { content: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TellaskResultStatus {
    Completed,
    Failed,
}

impl ChatMessage {
    /// Whether this message is ever shown to the LLM. Only `UiOnlyMarkdown`
    /// is excluded.
    pub fn visible_to_llm(&self) -> bool {
        !matches!(self, ChatMessage::UiOnlyMarkdown { .. })
    }

    pub fn genseq(&self) -> Option<u64> {
        match self {
            ChatMessage::Prompting { genseq, .. }
            | ChatMessage::Saying { genseq, .. }
            | ChatMessage::Thinking { genseq, .. }
            | ChatMessage::FuncCall { genseq, .. }
            | ChatMessage::FuncResult { genseq, .. } => Some(*genseq),
            _ => None,
        }
    }

    pub fn prompting(msg_id: impl Into<String>, content: impl Into<String>, grammar: Grammar, genseq: u64) -> Self {
        ChatMessage::Prompting {
            msg_id: msg_id.into(),
            content: content.into(),
            grammar,
            genseq,
        }
    }

    pub fn environment(content: impl Into<String>) -> Self {
        ChatMessage::Environment { content: content.into() }
    }

    pub fn saying(content: impl Into<String>, genseq: u64) -> Self {
        ChatMessage::Saying { content: content.into(), genseq }
    }

    pub fn func_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>, genseq: u64) -> Self {
        ChatMessage::FuncCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            genseq,
        }
    }

    pub fn func_result(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>, genseq: u64) -> Self {
        ChatMessage::FuncResult {
            id: id.into(),
            name: name.into(),
            content: content.into(),
            genseq,
        }
    }
}

/// Timestamped wrapper persisted in the message log. Kept separate from
/// `ChatMessage` so the core enum can stay focused on shape, not storage
/// concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: ChatMessage,
    pub stored_at: DateTime<Utc>,
    pub course: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_only_markdown_is_filtered_from_llm_view() {
        let msgs = vec![
            ChatMessage::saying("hello", 1),
            ChatMessage::UiOnlyMarkdown { content: "render hint".into() },
        ];
        let visible: Vec<_> = msgs.iter().filter(|m| m.visible_to_llm()).collect();
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn func_call_and_result_share_genseq() {
        let call = ChatMessage::func_call("c1", "echo", "{}", 5);
        let result = ChatMessage::func_result("c1", "echo", "hi", 5);
        assert_eq!(call.genseq(), result.genseq());
    }
}
