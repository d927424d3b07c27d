//! The generation loop: iterates gen -> parse tellasks/function
//! calls -> execute -> decide continue/suspend/stop for one dialog.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dominds_core::collab::llm::{FuncCallEvent, GenerationReceiver, GenerationRequest, GenerationUsage, ProviderMessage, ProviderRole, ProviderToolSpec};
use dominds_core::collab::tellask::TellaskParser;
use dominds_core::dialog::Dialog;
use dominds_core::error::{DriveError, DriveResult};
use dominds_core::events::DialogEvent;
use dominds_core::ids::DialogId;
use dominds_core::message::{ChatMessage, Grammar};
use dominds_core::records::{CallSiteRef, InterruptReasonKind, RunState};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::diligence::{DiligenceOutcome, DiligencePushController};
use crate::driver::DriverContext;
use crate::health::{compute_snapshot, RemediationAction};
use crate::parser::RegexTellaskParser;
use crate::policy::tellask_allowed;
use crate::tellask_executor::execute_tellask_calls;
use crate::tool_exec::execute_function_calls;
use crate::{context, policy};

pub struct DriveOutcome {
    pub run_state: RunState,
}

/// Forwards a streaming generation's chunks to `tracing` as they arrive;
/// the collected `GenerationResult` returned by `gen_to_receiver` still
/// carries the full content, so this receiver only needs to observe.
struct TracingReceiver {
    dialog_id: DialogId,
    genseq: u64,
}

#[async_trait::async_trait]
impl GenerationReceiver for TracingReceiver {
    async fn thinking_chunk(&mut self, text: &str) {
        tracing::trace!(dialog = %self.dialog_id, genseq = self.genseq, chunk = text, "thinking chunk");
    }

    async fn saying_chunk(&mut self, text: &str) {
        tracing::trace!(dialog = %self.dialog_id, genseq = self.genseq, chunk = text, "saying chunk");
    }

    async fn func_call(&mut self, event: FuncCallEvent) {
        tracing::trace!(dialog = %self.dialog_id, genseq = self.genseq, name = %event.name, "streamed func call");
    }

    async fn stream_error(&mut self, detail: &str) {
        warn!(dialog = %self.dialog_id, genseq = self.genseq, detail, "stream error");
    }
}

async fn load_taskdoc(path: &str) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(e) => {
            warn!(path, error = %e, "failed to read taskdoc");
            None
        }
    }
}

/// A short prologue shown once a context-health reset has force-started a
/// new course; course 0 is the dialog's initial course and gets none.
fn build_course_prefix(dialog: &Dialog) -> Option<String> {
    let course = dialog.core().current_course;
    (course > 0).then(|| format!("This is course {course} of the dialog; the prior course was closed out by a context-health reset."))
}

fn build_language_guide(dialog: &Dialog) -> String {
    match dialog.core().last_user_language_code.as_deref() {
        Some(lang) => format!("Respond to the user in their language ({lang})."),
        None => "Respond to the user in the same language they last used.".to_string(),
    }
}

fn to_provider_messages(ctx: &[ChatMessage], system_prompt: &str) -> Vec<ProviderMessage> {
    let mut out = vec![ProviderMessage { role: ProviderRole::System, content: system_prompt.to_string(), tool_call_id: None }];
    for msg in ctx {
        match msg {
            ChatMessage::Prompting { content, .. } | ChatMessage::Environment { content } | ChatMessage::TransientGuide { content } => {
                out.push(ProviderMessage { role: ProviderRole::User, content: content.clone(), tool_call_id: None });
            }
            ChatMessage::Saying { content, .. } | ChatMessage::Thinking { content, .. } => {
                out.push(ProviderMessage { role: ProviderRole::Assistant, content: content.clone(), tool_call_id: None });
            }
            ChatMessage::FuncCall { id, name, arguments, .. } => {
                out.push(ProviderMessage { role: ProviderRole::Assistant, content: format!("call {name}({arguments})"), tool_call_id: Some(id.clone()) });
            }
            ChatMessage::FuncResult { id, content, .. } => {
                out.push(ProviderMessage { role: ProviderRole::Tool, content: content.clone(), tool_call_id: Some(id.clone()) });
            }
            ChatMessage::TellaskResult { content, responder_id, .. } => {
                out.push(ProviderMessage { role: ProviderRole::Tool, content: format!("[{responder_id}] {content}"), tool_call_id: None });
            }
            ChatMessage::UiOnlyMarkdown { .. } => {}
        }
    }
    out
}

/// Runs the generation loop for `dialog_id` to its next suspension point.
/// `suppress_diligence` is set for a Type A synchronous
/// supdialog drive, which must never itself trigger Diligence Push.
///
/// Returns a boxed future so Type A tellask calls can recursively drive
/// their supdialog from inside the same loop (ordinary `async fn`s can't
/// call themselves without this).
pub fn drive(
    ctx: Arc<DriverContext>,
    dialog_id: DialogId,
    initial_prompt: Option<ChatMessage>,
    suppress_diligence: bool,
) -> Pin<Box<dyn Future<Output = DriveResult<DriveOutcome>> + Send>> {
    Box::pin(async move { drive_inner(ctx, dialog_id, initial_prompt, suppress_diligence).await })
}

#[instrument(skip(ctx, initial_prompt), fields(dialog = %dialog_id))]
async fn drive_inner(
    ctx: Arc<DriverContext>,
    dialog_id: DialogId,
    initial_prompt: Option<ChatMessage>,
    suppress_diligence: bool,
) -> DriveResult<DriveOutcome> {
    let mut dialog = ctx
        .persistence
        .load_dialog_latest(dialog_id)
        .await?
        .ok_or_else(|| DriveError::Persistence(format!("dialog {dialog_id} has no persisted state")))?;

    let cancel = CancellationToken::new();
    let was_interrupted = matches!(ctx.persistence.load_dialog_run_state(dialog_id).await?, Some(RunState::Interrupted { .. }));
    ctx.persistence.set_dialog_run_state(dialog_id, RunState::Proceeding).await?;
    if initial_prompt.is_none() && was_interrupted {
        ctx.event_bus.post_dialog_event(dialog_id, DialogEvent::Resumed).await;
    }

    let mut next_prompt = initial_prompt;
    let mut first_iteration = true;
    let mut health_fsm = ctx.take_health_fsm(dialog_id).await;
    let mut taken_responses = Vec::new();

    let final_state = loop {
        let minds = match ctx.agent_loader.load_agent_minds(&dialog.core().agent_id, &dialog).await {
            Ok(minds) => minds,
            Err(e) => break finalize_interrupted(&ctx, dialog_id, format!("configuration error: {e}")).await?,
        };

        if minds.member.provider.is_empty() || minds.member.model.is_empty() {
            break finalize_interrupted(&ctx, dialog_id, "no provider/model configured for this member".to_string()).await?;
        }

        let drive_policy = policy::build_drive_policy(&dialog, &minds, &ctx.tools)?;

        let mut had_user_prompt = false;
        let mut user_tellask_suspended = false;
        if let Some(prompt) = next_prompt.take() {
            dialog.core_mut().msgs.push(prompt.clone());
            ctx.persistence.save_dialog(&dialog).await?;

            if let ChatMessage::Prompting { content, grammar: Grammar::Tellask, .. } = &prompt {
                let mut parser = RegexTellaskParser::new();
                parser.take_upstream_chunk(content);
                parser.finalize();
                let calls = parser.collected_calls().to_vec();
                let result = execute_tellask_calls(&ctx, &mut dialog, &calls, &minds.known_team_member_ids, minds.member.fbr_effort).await?;
                dialog.core_mut().msgs.extend(result.messages);
                ctx.persistence.save_dialog(&dialog).await?;
                user_tellask_suspended = result.question.is_some() || result.awaiting_subdialog;
            }
            had_user_prompt = true;
        }
        if had_user_prompt {
            ctx.event_bus
                .post_dialog_event(
                    dialog_id,
                    DialogEvent::EndOfUserSaying {
                        course: dialog.core().current_course,
                        genseq: dialog.core().active_gen_seq,
                        msg_id: Uuid::new_v4().to_string(),
                        content: String::new(),
                        grammar: Grammar::Markdown,
                        user_language_code: dialog.core().last_user_language_code.clone(),
                    },
                )
                .await;
        }

        // A user-authored tellask (e.g. `@human ...`) can itself suspend the
        // dialog; don't call the LLM this iteration if it did.
        if user_tellask_suspended {
            break suspend_and_finalize(&ctx, &mut dialog, dialog_id, &minds, &taken_responses).await?;
        }

        if first_iteration {
            let _lock = ctx.locks.acquire_suspension(dialog_id.key()).await;
            taken_responses = ctx.persistence.take_subdialog_responses(dialog_id).await?;
        }

        let genseq = dialog.core_mut().next_gen_seq();

        let remediation = match &dialog.core().last_context_health {
            Some(snapshot) => {
                let cadence = ctx
                    .models
                    .model(&minds.member.provider, &minds.member.model)
                    .map(|m| m.caution_cadence())
                    .unwrap_or(dominds_config::models::DEFAULT_CAUTION_CADENCE);
                health_fsm.remediate(snapshot, cadence, genseq, had_user_prompt)
            }
            None => RemediationAction::Proceed { guide: None },
        };

        let internal_prompt = match remediation {
            RemediationAction::ContinueWithNewCourse { prompt } => {
                dialog.core_mut().start_new_course(Some(prompt));
                ctx.persistence.save_dialog(&dialog).await?;
                first_iteration = false;
                continue;
            }
            RemediationAction::Suspend => {
                break finalize_run(&ctx, dialog_id, &taken_responses, true).await?;
            }
            RemediationAction::Proceed { guide } => guide,
        };

        let taskdoc = match dialog.core().task_doc_path.clone() {
            Some(path) => load_taskdoc(&path).await,
            None => None,
        };
        let course_prefix = build_course_prefix(&dialog);
        let language_guide = build_language_guide(&dialog);

        let ctx_messages = context::assemble_context(context::ContextInputs {
            dialog: &dialog,
            policy: &drive_policy,
            memories: &minds.memories,
            taskdoc: taskdoc.as_deref(),
            skip_taskdoc: false,
            course_prefix: course_prefix.as_deref(),
            taken_responses: if first_iteration { &taken_responses } else { &[] },
            internal_prompt,
            language_guide: Some(&language_guide),
        });

        let request = GenerationRequest {
            provider: minds.member.provider.clone(),
            model: minds.member.model.clone(),
            messages: to_provider_messages(&ctx_messages, &drive_policy.system_prompt),
            tools: drive_policy
                .tools
                .iter()
                .map(|t| ProviderToolSpec { name: t.name.clone(), description: t.description.clone(), parameters: t.parameters.clone() })
                .collect(),
            model_params: drive_policy.model_params_override.clone(),
        };

        let generator = ctx.generator.clone();
        let max_retries = ctx.max_retries;
        let streaming = minds.member.streaming;
        let result = dominds_llm::run_with_retry(&minds.member.provider, max_retries, || true, cancel.clone(), || {
            let generator = generator.clone();
            let request = request.clone();
            let cancel = cancel.clone();
            async move {
                if streaming {
                    let mut receiver = TracingReceiver { dialog_id, genseq };
                    generator.gen_to_receiver(request, &mut receiver, cancel).await
                } else {
                    generator.gen_more_messages(request, cancel).await
                }
            }
        })
        .await;

        let generation = match result {
            Ok(g) => g,
            Err(dominds_core::collab::llm::LlmError::Rejected { provider, detail }) => {
                ctx.problem_sink.upsert(dominds_llm::ProblemRecord {
                    dialog_id,
                    kind: "llm_provider_rejected_request".to_string(),
                    detail: detail.clone(),
                    occurred_at: chrono::Utc::now(),
                });
                break finalize_interrupted(&ctx, dialog_id, format!("request rejected by {provider}: {detail}")).await?;
            }
            Err(e) => break finalize_interrupted(&ctx, dialog_id, format!("generation failed: {e}")).await?,
        };

        if let Some(usage) = &generation.usage {
            update_context_health(&mut dialog, &ctx, &minds, usage);
        }

        let mut saying_parser = RegexTellaskParser::new();
        let mut saying_text = String::new();
        for m in &generation.messages {
            if m.role == ProviderRole::Assistant {
                saying_text.push_str(&m.content);
                saying_parser.take_upstream_chunk(&m.content);
            }
        }
        saying_parser.finalize();
        let tellask_calls = saying_parser.collected_calls().to_vec();

        if !saying_text.is_empty() {
            dialog.core_mut().msgs.push(ChatMessage::saying(saying_text, genseq));
        }

        if drive_policy.is_fbr_toolless {
            let violates = tellask_calls.iter().any(|c| !tellask_allowed(&drive_policy, &c.tellask_head)) || !generation.func_calls.is_empty();
            if violates {
                dialog.core_mut().msgs.push(ChatMessage::TellaskResult {
                    responder_id: "dominds".to_string(),
                    tellask_head: String::new(),
                    status: dominds_core::message::TellaskResultStatus::Failed,
                    content: "FBR-toolless policy violation: only @tellasker and no function calls are permitted here.".to_string(),
                });
                ctx.persistence.save_dialog(&dialog).await?;
                break finalize_run(&ctx, dialog_id, &taken_responses, true).await?;
            }
        }

        let tellask_outcome = execute_tellask_calls(&ctx, &mut dialog, &tellask_calls, &minds.known_team_member_ids, minds.member.fbr_effort).await?;
        dialog.core_mut().msgs.extend(tellask_outcome.messages);

        let executed_tools = !generation.func_calls.is_empty();
        if executed_tools {
            let executed = execute_function_calls(&dialog, &minds.member, &ctx.tools, &generation.func_calls, genseq, cancel.clone()).await;
            for call in executed {
                dialog.core_mut().msgs.push(call.call_msg);
                dialog.core_mut().msgs.push(call.result_msg);
            }
        }

        ctx.persistence.save_dialog(&dialog).await?;

        let suspended_this_iteration = tellask_outcome.question.is_some() || tellask_outcome.awaiting_subdialog;
        if suspended_this_iteration {
            break suspend_and_finalize(&ctx, &mut dialog, dialog_id, &minds, &taken_responses).await?;
        }

        if executed_tools {
            first_iteration = false;
            continue;
        }

        if dialog.is_root() {
            let controller = DiligencePushController::new(&ctx.minds_dir, dialog.core().last_user_language_code.as_deref());
            let site = CallSiteRef { course: dialog.core().current_course, message_index: dialog.core().msgs.len() };
            match controller.evaluate(&mut dialog, minds.member.diligence_push_max, suppress_diligence, site).await {
                DiligenceOutcome::Continue { prompt, event } => {
                    ctx.persistence.save_dialog(&dialog).await?;
                    ctx.event_bus.post_dialog_event(dialog_id, event).await;
                    next_prompt = Some(prompt);
                    first_iteration = false;
                    continue;
                }
                DiligenceOutcome::Suspend { question, event } => {
                    ctx.persistence.append_question4human(dialog_id, question.clone()).await?;
                    ctx.persistence.save_dialog(&dialog).await?;
                    ctx.event_bus.post_dialog_event(dialog_id, event).await;
                    ctx.event_bus.post_dialog_event(dialog_id, DialogEvent::NewQ4hAsked { question }).await;
                    break suspend_and_finalize(&ctx, &mut dialog, dialog_id, &minds, &taken_responses).await?;
                }
                DiligenceOutcome::Stop => {
                    break finalize_run(&ctx, dialog_id, &taken_responses, true).await?;
                }
            }
        }

        break finalize_run(&ctx, dialog_id, &taken_responses, true).await?;
    };

    ctx.store_health_fsm(dialog_id, health_fsm).await;

    info!(run_state = ?final_state, "drive finished");
    Ok(DriveOutcome { run_state: final_state })
}

fn update_context_health(
    dialog: &mut Dialog,
    ctx: &Arc<DriverContext>,
    minds: &dominds_core::collab::agent::AgentMinds,
    usage: &GenerationUsage,
) {
    if let Some(model) = ctx.models.model(&minds.member.provider, &minds.member.model) {
        dialog.core_mut().last_context_health = Some(compute_snapshot(usage.prompt_tokens, model));
    }
}

async fn suspend_and_finalize(
    ctx: &Arc<DriverContext>,
    dialog: &mut Dialog,
    dialog_id: DialogId,
    minds: &dominds_core::collab::agent::AgentMinds,
    taken_responses: &[dominds_core::records::SubdialogResponseRecord],
) -> DriveResult<RunState> {
    let has_pending_q4h = ctx.persistence.load_pending_question4human(dialog_id).await?.is_some();
    if has_pending_q4h {
        if let Some((_, disabled)) = dialog.diligence_budget() {
            if !disabled {
                dialog.set_diligence_budget(minds.member.diligence_push_max);
                ctx.persistence.save_dialog(dialog).await?;
            }
        }
    }
    finalize_run(ctx, dialog_id, taken_responses, true).await
}

async fn finalize_run(
    ctx: &Arc<DriverContext>,
    dialog_id: DialogId,
    taken_responses: &[dominds_core::records::SubdialogResponseRecord],
    success: bool,
) -> DriveResult<RunState> {
    if success {
        ctx.persistence.commit_subdialog_responses(dialog_id).await?;
    } else {
        ctx.persistence.rollback_subdialog_responses(dialog_id, taken_responses.to_vec()).await?;
    }

    let has_q4h = ctx.persistence.load_pending_question4human(dialog_id).await?.is_some();
    let has_pending = !ctx.persistence.load_pending_subdialogs(dialog_id).await?.is_empty();

    let state = if !has_q4h && !has_pending {
        RunState::IdleWaitingUser
    } else {
        RunState::Interrupted { reason: InterruptReasonKind::SystemStop { detail: "awaiting subdialog or human response".to_string() } }
    };

    if !matches!(ctx.persistence.load_dialog_run_state(dialog_id).await?, Some(RunState::Dead)) {
        ctx.persistence.set_dialog_run_state(dialog_id, state.clone()).await?;
    }
    Ok(state)
}

async fn finalize_interrupted(ctx: &Arc<DriverContext>, dialog_id: DialogId, detail: String) -> DriveResult<RunState> {
    let state = RunState::Interrupted { reason: InterruptReasonKind::SystemStop { detail: detail.clone() } };
    ctx.persistence.set_dialog_run_state(dialog_id, state.clone()).await?;
    ctx.event_bus
        .post_dialog_event(dialog_id, DialogEvent::Interrupted { reason: InterruptReasonKind::SystemStop { detail } })
        .await;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dominds_config::LlmProvidersConfig;
    use dominds_core::collab::event_bus::EventBus;
    use dominds_core::collab::llm::{GenerationResult, GenerationUsage, LlmError, ProviderMessage, ProviderRole};
    use dominds_core::collab::memory::InMemoryPersistence;
    use dominds_core::collab::tools::ToolRegistry;
    use dominds_core::ids::DialogId;
    use dominds_core::lock::DialogLockTable;
    use dominds_llm::{problem::InMemoryProblemSink, ScriptedGenerator};
    use dominds_tools::EchoTool;

    use super::*;

    struct NoopEventBus;
    #[async_trait::async_trait]
    impl EventBus for NoopEventBus {
        async fn post_dialog_event(&self, _dialog_id: DialogId, _event: DialogEvent) {}
    }

    async fn write_team(minds_dir: &PathBuf, extra: &str) {
        tokio::fs::write(
            minds_dir.join("team.yaml"),
            format!("members:\n  - id: alice\n    name: Alice\n    provider: openai\n    model: gpt-4o\n    diligence_push_max: 3\n{extra}"),
        )
        .await
        .unwrap();
    }

    fn ctx_with(minds_dir: PathBuf, generator: Arc<dyn dominds_core::collab::llm::LlmGenerator>, tools: ToolRegistry) -> Arc<DriverContext> {
        Arc::new(DriverContext {
            persistence: Arc::new(InMemoryPersistence::new()),
            event_bus: Arc::new(NoopEventBus),
            locks: Arc::new(DialogLockTable::new()),
            agent_loader: Arc::new(dominds_config::FileAgentLoader::new(minds_dir.clone())),
            generator,
            tools: Arc::new(tools),
            models: Arc::new(LlmProvidersConfig::default()),
            problem_sink: Arc::new(InMemoryProblemSink::new()),
            minds_dir,
            max_retries: 2,
            health_fsms: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn assistant_turn(text: &str) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            messages: vec![ProviderMessage { role: ProviderRole::Assistant, content: text.to_string(), tool_call_id: None }],
            func_calls: Vec::new(),
            usage: Some(GenerationUsage { prompt_tokens: 10, completion_tokens: 5 }),
            llm_gen_model: None,
        })
    }

    /// A user prompt in tellask grammar that itself asks `@human` must
    /// suspend before the LLM is ever called — an empty `ScriptedGenerator`
    /// errors loudly if `drive()` tries to generate anyway.
    #[tokio::test]
    async fn user_authored_q4h_suspends_without_generating() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "").await;
        let ctx = ctx_with(dir.path().to_path_buf(), Arc::new(ScriptedGenerator::new(Vec::new())), ToolRegistry::new());

        let id = DialogId::new_root();
        let mut dlg = Dialog::new_root(id, "alice", 3);
        dlg.set_diligence_budget(0);
        ctx.persistence.save_dialog(&dlg).await.unwrap();

        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "@human please confirm this plan", Grammar::Tellask, 0);
        let outcome = drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        assert!(matches!(outcome.run_state, RunState::Interrupted { .. }));
        assert!(ctx.persistence.load_pending_question4human(id).await.unwrap().is_some());

        let reloaded = ctx.persistence.load_dialog_latest(id).await.unwrap().unwrap();
        assert_eq!(reloaded.diligence_budget(), Some((3, false)));
    }

    /// A function tool call round-trips through one iteration, then the
    /// loop continues into a second generation with no pending work left.
    #[tokio::test]
    async fn function_tool_round_trip_then_idles() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "    tools: [echo]\n").await;
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));

        let first = Ok(GenerationResult {
            messages: Vec::new(),
            func_calls: vec![dominds_core::collab::llm::FuncCallEvent {
                call_id: "c1".to_string(),
                name: "echo".to_string(),
                arguments: serde_json::json!({ "text": "hi" }).to_string(),
            }],
            usage: Some(GenerationUsage { prompt_tokens: 10, completion_tokens: 5 }),
            llm_gen_model: None,
        });
        let second = assistant_turn("all done");
        let ctx = ctx_with(dir.path().to_path_buf(), Arc::new(ScriptedGenerator::new(vec![first, second])), tools);

        let id = DialogId::new_root();
        ctx.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();

        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "please echo hi", Grammar::Markdown, 0);
        let outcome = drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        assert_eq!(outcome.run_state, RunState::IdleWaitingUser);
        let reloaded = ctx.persistence.load_dialog_latest(id).await.unwrap().unwrap();
        let has_func_result = reloaded.core().msgs.iter().any(|m| matches!(m, ChatMessage::FuncResult { content, .. } if content == "hi"));
        assert!(has_func_result);
    }

    /// A Type B tellask with `!tellaskSession` registers a subdialog and
    /// suspends the caller until the reply arrives.
    #[tokio::test]
    async fn registered_tellask_suspends_awaiting_subdialog() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "  - id: bob\n    name: Bob\n    provider: openai\n    model: gpt-4o\n    diligence_push_max: 3\n").await;
        let ctx = ctx_with(
            dir.path().to_path_buf(),
            Arc::new(ScriptedGenerator::new(vec![assistant_turn("@bob !tellaskSession plan.v1\nplease draft the outline")])),
            ToolRegistry::new(),
        );

        let id = DialogId::new_root();
        ctx.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();

        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "kick things off", Grammar::Markdown, 0);
        let outcome = drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        assert!(matches!(outcome.run_state, RunState::Interrupted { .. }));
        assert_eq!(ctx.persistence.load_pending_subdialogs(id).await.unwrap().len(), 1);
    }

    /// An LLM rejection (fatal, non-retriable) interrupts the dialog and
    /// records a problem.
    #[tokio::test]
    async fn rejected_generation_interrupts_and_records_problem() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "").await;
        let rejected = Err(LlmError::Rejected { provider: "openai".to_string(), detail: "http 400: bad request".to_string() });
        let ctx = ctx_with(dir.path().to_path_buf(), Arc::new(ScriptedGenerator::new(vec![rejected])), ToolRegistry::new());

        let id = DialogId::new_root();
        ctx.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();

        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "hello", Grammar::Markdown, 0);
        let outcome = drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        assert!(matches!(
            outcome.run_state,
            RunState::Interrupted { reason: InterruptReasonKind::SystemStop { .. } }
        ));
    }

    /// A test double that records which `LlmGenerator` method the drive
    /// loop actually called, so the `streaming` member flag's effect on
    /// `drive_inner` is observable rather than inferred from identical
    /// output.
    struct StreamFlagGenerator {
        used_streaming: std::sync::atomic::AtomicBool,
        turn: std::sync::Mutex<Option<Result<GenerationResult, LlmError>>>,
    }

    #[async_trait::async_trait]
    impl dominds_core::collab::llm::LlmGenerator for StreamFlagGenerator {
        async fn gen_more_messages(&self, _request: GenerationRequest, _cancel: CancellationToken) -> Result<GenerationResult, LlmError> {
            self.turn.lock().unwrap().take().expect("turn already consumed")
        }

        async fn gen_to_receiver(
            &self,
            _request: GenerationRequest,
            receiver: &mut dyn dominds_core::collab::llm::GenerationReceiver,
            _cancel: CancellationToken,
        ) -> Result<GenerationResult, LlmError> {
            self.used_streaming.store(true, std::sync::atomic::Ordering::SeqCst);
            receiver.saying_start().await;
            let result = self.turn.lock().unwrap().take().expect("turn already consumed");
            if let Ok(generation) = &result {
                for msg in &generation.messages {
                    receiver.saying_chunk(&msg.content).await;
                }
            }
            receiver.saying_finish().await;
            result
        }
    }

    #[tokio::test]
    async fn streaming_member_drives_via_gen_to_receiver() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "    streaming: true\n").await;
        let generator = Arc::new(StreamFlagGenerator {
            used_streaming: std::sync::atomic::AtomicBool::new(false),
            turn: std::sync::Mutex::new(Some(assistant_turn("all done"))),
        });
        let ctx = ctx_with(dir.path().to_path_buf(), generator.clone(), ToolRegistry::new());

        let id = DialogId::new_root();
        ctx.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();
        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "hello", Grammar::Markdown, 0);
        drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        assert!(generator.used_streaming.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn non_streaming_member_drives_via_gen_more_messages() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "    streaming: false\n").await;
        let generator = Arc::new(StreamFlagGenerator {
            used_streaming: std::sync::atomic::AtomicBool::new(false),
            turn: std::sync::Mutex::new(Some(assistant_turn("all done"))),
        });
        let ctx = ctx_with(dir.path().to_path_buf(), generator.clone(), ToolRegistry::new());

        let id = DialogId::new_root();
        ctx.persistence.save_dialog(&Dialog::new_root(id, "alice", 3)).await.unwrap();
        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "hello", Grammar::Markdown, 0);
        drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        assert!(!generator.used_streaming.load(std::sync::atomic::Ordering::SeqCst));
    }

    /// A context-health reset mid-drive persists its critical countdown in
    /// `DriverContext` rather than resetting it — verified here by driving
    /// twice and confirming the second `drive()` call still observes the
    /// countdown the first call left behind instead of a fresh FSM.
    #[tokio::test]
    async fn context_health_fsm_persists_across_separate_drive_calls() {
        let dir = tempfile::tempdir().unwrap();
        write_team(&dir.path().to_path_buf(), "").await;
        let ctx = ctx_with(dir.path().to_path_buf(), Arc::new(ScriptedGenerator::new(vec![assistant_turn("ok")])), ToolRegistry::new());

        let id = DialogId::new_root();
        let mut dlg = Dialog::new_root(id, "alice", 3);
        dlg.core_mut().last_context_health = Some(dominds_core::records::ContextHealthSnapshot::Available {
            prompt_tokens: 190_000,
            model_context_limit_tokens: 200_000,
            level: dominds_core::records::ContextHealthLevel::Critical,
            hard_util: 0.95,
            optimal_util: 1.1,
        });
        ctx.persistence.save_dialog(&dlg).await.unwrap();

        let fsm = ctx.take_health_fsm(id).await;
        assert!(fsm.critical_countdown_remaining().is_none());
        ctx.store_health_fsm(id, fsm).await;

        let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), "hi", Grammar::Markdown, 0);
        drive(ctx.clone(), id, Some(prompt), false).await.unwrap();

        // The first drive observed one critical iteration and counted down
        // from the default; a fresh-FSM bug would leave this `None` again.
        let fsm_after_first_drive = ctx.take_health_fsm(id).await;
        assert!(fsm_after_first_drive.critical_countdown_remaining().is_some());
        ctx.store_health_fsm(id, fsm_after_first_drive).await;
    }
}
