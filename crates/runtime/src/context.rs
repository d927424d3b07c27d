//! Context assembler: composes the ordered context list handed
//! to the LLM generator for one iteration.

use dominds_core::dialog::{Dialog, Reminder};
use dominds_core::message::ChatMessage;
use dominds_core::records::SubdialogResponseRecord;

use crate::policy::DrivePolicy;

pub struct ContextInputs<'a> {
    pub dialog: &'a Dialog,
    pub policy: &'a DrivePolicy,
    pub memories: &'a [String],
    pub taskdoc: Option<&'a str>,
    pub skip_taskdoc: bool,
    pub course_prefix: Option<&'a str>,
    pub taken_responses: &'a [SubdialogResponseRecord],
    pub internal_prompt: Option<ChatMessage>,
    pub language_guide: Option<&'a str>,
}

fn is_user_role(msg: &ChatMessage) -> bool {
    matches!(msg, ChatMessage::Prompting { .. } | ChatMessage::Environment { .. })
}

fn render_response_note(record: &SubdialogResponseRecord) -> String {
    format!(
        "{} replied to {}'s request (\"{}\"): {}",
        record.responder_id, record.origin_member_id, record.tellask_head, record.response
    )
}

/// Reminders with an `owner_tool` are meant to be rendered by that tool;
/// since concrete tools are out of scope this falls back to the
/// default environment-message rendering for every reminder.
fn render_reminder(reminder: &Reminder) -> ChatMessage {
    ChatMessage::environment(format!("[reminder {}] {}", reminder.id, reminder.content))
}

/// Builds the ordered context for one generation iteration (steps 1-7), then renders reminders and the language guide immediately
/// before the last user-role message (steps 8-9).
pub fn assemble_context(inputs: ContextInputs<'_>) -> Vec<ChatMessage> {
    let mut ctx = Vec::new();

    // Step 1: prepended policy messages.
    ctx.extend(inputs.policy.prepended_messages.iter().cloned());

    // Step 2: memories.
    for memory in inputs.memories {
        ctx.push(ChatMessage::environment(memory.clone()));
    }

    // Step 3: taskdoc.
    if !inputs.skip_taskdoc {
        if let Some(taskdoc) = inputs.taskdoc {
            ctx.push(ChatMessage::environment(taskdoc.to_string()));
        }
    }

    // Step 4: course prefix.
    if let Some(prefix) = inputs.course_prefix {
        ctx.push(ChatMessage::environment(prefix.to_string()));
    }

    // Step 5: dialog history, filtered.
    ctx.extend(inputs.dialog.core().msgs.iter().filter(|m| m.visible_to_llm()).cloned());

    // Step 6: taken subdialog responses.
    for record in inputs.taken_responses {
        ctx.push(ChatMessage::environment(render_response_note(record)));
    }

    // Step 7: internal (non-persisted) prompt.
    if let Some(prompt) = inputs.internal_prompt {
        ctx.push(prompt);
    }

    // Steps 8-9: reminders then language guide, both immediately before
    // the last user-role message.
    let rendered_reminders: Vec<ChatMessage> = inputs.dialog.core().reminders.iter().map(render_reminder).collect();

    let insert_at = ctx.iter().rposition(is_user_role).unwrap_or(ctx.len());

    let mut to_insert = rendered_reminders;
    if let Some(guide) = inputs.language_guide {
        to_insert.push(ChatMessage::TransientGuide { content: guide.to_string() });
    }

    if !to_insert.is_empty() {
        for (offset, msg) in to_insert.into_iter().enumerate() {
            ctx.insert(insert_at + offset, msg);
        }
    }

    ctx
}
