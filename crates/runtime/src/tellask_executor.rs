//! Tellask executor: classifies collected tellask calls into
//! Type A/B/C, handles `@human` (Q4H) and alias resolution, fans out
//! multi-teammate headlines, and delivers subdialog replies back to their
//! caller.

use std::sync::Arc;

use chrono::Utc;
use dominds_core::collab::tellask::{TellaskCall, TellaskValidation};
use dominds_core::dialog::{Dialog, SubdialogAssignment};
use dominds_core::error::DriveResult;
use dominds_core::events::DialogEvent;
use dominds_core::ids::{CallId, DialogId};
use dominds_core::message::{ChatMessage, TellaskResultStatus};
use dominds_core::records::{CallSiteRef, CallType, HumanQuestion, PendingSubdialogRecord, SubdialogResponseRecord};
use uuid::Uuid;

use crate::driver::DriverContext;
use crate::generation;

/// What executing one dialog's collected tellask calls produced this
/// iteration.
#[derive(Default)]
pub struct TellaskExecutionOutcome {
    /// Messages to append to the caller's history (tellask replies,
    /// dominds bubbles), in call order.
    pub messages: Vec<ChatMessage>,
    /// At least one call created a subdialog this drive must wait on
    /// (Type B/C): the loop stops waiting rather than continuing.
    pub awaiting_subdialog: bool,
    /// A `@human` call was made this iteration.
    pub question: Option<HumanQuestion>,
}

/// What fanning out to a single resolved target produced.
#[derive(Default)]
struct TargetOutcome {
    messages: Vec<ChatMessage>,
    awaiting_subdialog: bool,
    question: Option<HumanQuestion>,
}

impl TargetOutcome {
    fn message(msg: ChatMessage) -> Self {
        Self { messages: vec![msg], ..Self::default() }
    }
}

enum ResolvedTarget {
    Human,
    Agent(String),
    Reserved,
    Unknown(String),
}

fn resolve_target(raw: &str, dialog: &Dialog) -> ResolvedTarget {
    match raw {
        "human" => ResolvedTarget::Human,
        "self" => ResolvedTarget::Agent(dialog.core().agent_id.clone()),
        "tellasker" => match dialog.direct_supdialog_agent() {
            Some(agent) => ResolvedTarget::Agent(agent.to_string()),
            None => ResolvedTarget::Unknown("tellasker (not inside a subdialog)".to_string()),
        },
        "dominds" => ResolvedTarget::Reserved,
        other => ResolvedTarget::Agent(other.to_string()),
    }
}

fn extract_mentions(head: &str) -> Vec<String> {
    head.split_whitespace()
        .filter(|w| w.starts_with('@'))
        .map(|w| w.trim_start_matches('@').trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Splits a tellask call's body into `(tellask_session, remaining_body)`
/// when it leads with a `!tellaskSession <id>` directive (the convention
/// `RegexTellaskParser` writes it in).
fn extract_session(body: &str) -> (Option<String>, String) {
    if let Some(rest) = body.strip_prefix("!tellaskSession ") {
        match rest.find('\n') {
            Some(nl) => (Some(rest[..nl].trim().to_string()), rest[nl + 1..].to_string()),
            None => (Some(rest.trim().to_string()), String::new()),
        }
    } else {
        (None, body.to_string())
    }
}

fn dominds_bubble(tellask_head: &str, content: impl Into<String>) -> ChatMessage {
    ChatMessage::TellaskResult {
        responder_id: "dominds".to_string(),
        tellask_head: tellask_head.to_string(),
        status: TellaskResultStatus::Failed,
        content: content.into(),
    }
}

pub async fn execute_tellask_calls(
    ctx: &Arc<DriverContext>,
    dialog: &Dialog,
    calls: &[TellaskCall],
    known_team_member_ids: &[String],
    fbr_effort: u8,
) -> DriveResult<TellaskExecutionOutcome> {
    let mut outcome = TellaskExecutionOutcome::default();

    for call in calls {
        let TellaskValidation::Valid { .. } = &call.validation else {
            let reason = match &call.validation {
                TellaskValidation::Malformed { reason } => reason.clone(),
                _ => unreachable!(),
            };
            outcome.messages.push(dominds_bubble(&call.tellask_head, format!("Malformed tellask: {reason}")));
            continue;
        };

        let mentions = extract_mentions(&call.tellask_head);
        let (session, body) = extract_session(&call.body);

        let mut targets = Vec::new();
        let mut unknown = Vec::new();
        for raw in &mentions {
            match resolve_target(raw, dialog) {
                ResolvedTarget::Human => targets.push(("human".to_string(), raw.clone())),
                ResolvedTarget::Reserved => unknown.push(raw.clone()),
                ResolvedTarget::Agent(agent) if known_team_member_ids.contains(&agent) || agent == dialog.core().agent_id => {
                    targets.push((agent, raw.clone()))
                }
                ResolvedTarget::Agent(agent) => unknown.push(agent),
                ResolvedTarget::Unknown(reason) => unknown.push(reason),
            }
        }

        if targets.is_empty() {
            outcome.messages.push(dominds_bubble(&call.tellask_head, format!("No addressable target in headline (unresolved: {unknown:?})")));
            continue;
        }
        if !unknown.is_empty() {
            outcome.messages.push(dominds_bubble(&call.tellask_head, format!("Unknown target(s) before fan-out: {unknown:?}")));
            continue;
        }

        // Dedup targets by resolved agent id, preserving first-seen order.
        let mut seen = std::collections::HashSet::new();
        targets.retain(|(agent, _)| seen.insert(agent.clone()));

        // Every resolved target for this headline is driven concurrently:
        // a Type A target synchronously drives a whole supdialog generation
        // loop and must not block a sibling Type B/C spawn.
        let fanout = targets
            .into_iter()
            .map(|(agent, raw_mention)| execute_one_target(ctx, dialog, &call.tellask_head, &body, session.clone(), agent, raw_mention, fbr_effort, call.call_id));
        for result in futures::future::try_join_all(fanout).await? {
            outcome.messages.extend(result.messages);
            outcome.awaiting_subdialog |= result.awaiting_subdialog;
            if result.question.is_some() {
                outcome.question = result.question;
            }
        }
    }

    Ok(outcome)
}

/// Resolves one mentioned target (`@human`, `@self`-FBR, Type A/B/C) to its
/// reply/suspension effect. Siblings from the same headline run this
/// concurrently via `try_join_all`.
async fn execute_one_target(
    ctx: &Arc<DriverContext>,
    dialog: &Dialog,
    tellask_head: &str,
    body: &str,
    session: Option<String>,
    agent: String,
    raw_mention: String,
    fbr_effort: u8,
    call_id: CallId,
) -> DriveResult<TargetOutcome> {
    if agent == "human" {
        let question = HumanQuestion {
            id: Uuid::new_v4(),
            tellask_head: tellask_head.to_string(),
            body_content: body.to_string(),
            asked_at: Utc::now(),
            call_id: Some(call_id),
            call_site_ref: CallSiteRef { course: dialog.core().current_course, message_index: dialog.core().msgs.len() },
        };
        return Ok(match ctx.persistence.append_question4human(dialog.id(), question.clone()).await {
            Ok(()) => {
                ctx.event_bus.post_dialog_event(dialog.id(), DialogEvent::NewQ4hAsked { question: question.clone() }).await;
                TargetOutcome { question: Some(question), ..TargetOutcome::default() }
            }
            Err(e) => TargetOutcome::message(dominds_bubble(tellask_head, format!("Failed to record question for human: {e}"))),
        });
    }

    let mut outcome = TargetOutcome::default();
    if raw_mention != "self" && agent == dialog.core().agent_id {
        outcome.messages.push(ChatMessage::environment(format!(
            "Note: @{raw_mention} resolves to yourself ({agent}) — treated the same as @self."
        )));
    }

    let is_self_fbr = raw_mention == "self" && agent == dialog.core().agent_id;
    let is_type_a = !dialog.is_root() && dialog.direct_supdialog_agent() == Some(agent.as_str());

    if is_type_a {
        let reply = drive_type_a_supdialog(ctx, dialog, tellask_head, body).await?;
        outcome.messages.push(reply);
        return Ok(outcome);
    }

    if is_self_fbr {
        if fbr_effort == 0 {
            outcome.messages.push(dominds_bubble(tellask_head, "FBR is disabled for this member (fbr_effort=0)."));
            return Ok(outcome);
        }
        match &session {
            None => {
                let spawns = (0..fbr_effort).map(|_| spawn_transient_subdialog(ctx, dialog, &agent, tellask_head, body, call_id));
                futures::future::try_join_all(spawns).await?;
            }
            Some(base_session) => {
                spawn_self_fbr_registered_pool(ctx, dialog, &agent, base_session, tellask_head, body, call_id, fbr_effort).await?;
            }
        }
        outcome.awaiting_subdialog = true;
        return Ok(outcome);
    }

    match &session {
        Some(session_id) => spawn_registered_subdialog(ctx, dialog, &agent, session_id, tellask_head, body, call_id).await?,
        None => spawn_transient_subdialog(ctx, dialog, &agent, tellask_head, body, call_id).await?,
    }
    outcome.awaiting_subdialog = true;
    Ok(outcome)
}

/// Type A: synchronously drives the direct supdialog for one
/// course and extracts its last assistant `saying_msg` as the reply. The
/// supdialog's drive lock is acquired like any other drive, so it queues
/// FIFO behind whatever else is driving it; nested Type A calls made by
/// that drive are themselves permitted (no recursion limit).
async fn drive_type_a_supdialog(ctx: &Arc<DriverContext>, dialog: &Dialog, tellask_head: &str, body: &str) -> DriveResult<ChatMessage> {
    let Some(assignment) = dialog.assignment() else {
        return Ok(dominds_bubble(tellask_head, "Type A call made from a root dialog has no supdialog to reach."));
    };
    let sup_id = assignment.caller_dialog_id;
    let prompt = ChatMessage::prompting(Uuid::new_v4().to_string(), body.to_string(), dominds_core::message::Grammar::Markdown, 0);

    let _guard = ctx.locks.acquire_drive(sup_id.key()).await;
    generation::drive(ctx.clone(), sup_id, Some(prompt), true).await?;
    drop(_guard);

    let reply_content = match ctx.persistence.load_dialog_latest(sup_id).await? {
        Some(sup_dialog) => sup_dialog
            .core()
            .msgs
            .iter()
            .rev()
            .find_map(|m| match m {
                ChatMessage::Saying { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_default(),
        None => String::new(),
    };

    Ok(ChatMessage::TellaskResult {
        responder_id: assignment.origin_member_id.clone(),
        tellask_head: tellask_head.to_string(),
        status: TellaskResultStatus::Completed,
        content: reply_content,
    })
}

async fn spawn_transient_subdialog(
    ctx: &Arc<DriverContext>,
    caller: &Dialog,
    target_agent: &str,
    tellask_head: &str,
    body: &str,
    call_id: CallId,
) -> DriveResult<()> {
    spawn_subdialog(ctx, caller, target_agent, None, tellask_head, body, call_id, CallType::C).await
}

/// A short, human-legible disambiguator for a pooled FBR tellaskSession id
/// (`<base>.fbr-<shortId>`) — the first 8 hex characters of a fresh uuid.
fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// `@self` Type B FBR: derives a pool of `fbr_effort` tellaskSession
/// identifiers prefixed `<base_session>.fbr-<shortId>`, finding or creating
/// each (so a re-tellask with the same base session resumes whichever pool
/// members already exist instead of spawning duplicates), and drives the
/// whole pool in parallel.
async fn spawn_self_fbr_registered_pool(
    ctx: &Arc<DriverContext>,
    caller: &Dialog,
    target_agent: &str,
    base_session: &str,
    tellask_head: &str,
    body: &str,
    call_id: CallId,
    fbr_effort: u8,
) -> DriveResult<()> {
    let session_ids: Vec<String> = (0..fbr_effort).map(|_| format!("{base_session}.fbr-{}", short_id())).collect();
    let spawns = session_ids
        .iter()
        .map(|session_id| spawn_registered_subdialog(ctx, caller, target_agent, session_id, tellask_head, body, call_id));
    futures::future::try_join_all(spawns).await?;
    Ok(())
}

async fn spawn_registered_subdialog(
    ctx: &Arc<DriverContext>,
    caller: &Dialog,
    target_agent: &str,
    session_id: &str,
    tellask_head: &str,
    body: &str,
    call_id: CallId,
) -> DriveResult<()> {
    let root_id = caller.id().root_id;
    if let Some(existing) = ctx.persistence.find_registered_subdialog(root_id, target_agent, session_id).await? {
        ctx.persistence.update_subdialog_assignment(existing, tellask_head.to_string(), body.to_string()).await?;
        register_pending(ctx, caller, existing, tellask_head, target_agent, CallType::B, Some(session_id.to_string())).await?;
        drive_subdialog_in_background(ctx.clone(), existing);
        return Ok(());
    }
    spawn_subdialog(ctx, caller, target_agent, Some(session_id.to_string()), tellask_head, body, call_id, CallType::B).await
}

async fn spawn_subdialog(
    ctx: &Arc<DriverContext>,
    caller: &Dialog,
    target_agent: &str,
    session_id: Option<String>,
    tellask_head: &str,
    body: &str,
    call_id: CallId,
    call_type: CallType,
) -> DriveResult<()> {
    let root_id = caller.id().root_id;
    let sub_id = DialogId::new_sub(root_id);
    let assignment = SubdialogAssignment {
        tellask_head: tellask_head.to_string(),
        tellask_body: body.to_string(),
        origin_member_id: caller.core().agent_id.clone(),
        caller_dialog_id: caller.id(),
        call_id,
        collective_targets: vec![target_agent.to_string()],
    };
    let sub_dialog = Dialog::new_sub(sub_id, target_agent, assignment);
    ctx.persistence.save_dialog(&sub_dialog).await?;

    if let Some(session_id) = &session_id {
        ctx.persistence.register_subdialog(root_id, target_agent, session_id, sub_id).await?;
    }

    register_pending(ctx, caller, sub_id, tellask_head, target_agent, call_type, session_id).await?;
    drive_subdialog_in_background(ctx.clone(), sub_id);
    Ok(())
}

async fn register_pending(
    ctx: &Arc<DriverContext>,
    caller: &Dialog,
    sub_id: DialogId,
    tellask_head: &str,
    target_agent: &str,
    call_type: CallType,
    tellask_session: Option<String>,
) -> DriveResult<()> {
    let _lock = ctx.locks.acquire_suspension(caller.id().key()).await;
    let mut pending = ctx.persistence.load_pending_subdialogs(caller.id()).await?;
    pending.push(PendingSubdialogRecord {
        subdialog_id: sub_id,
        created_at: Utc::now(),
        tellask_head: tellask_head.to_string(),
        target_agent_id: target_agent.to_string(),
        call_type,
        tellask_session,
    });
    ctx.persistence.save_pending_subdialogs(caller.id(), pending).await?;
    Ok(())
}

/// Drives a freshly created/resumed subdialog off the calling task so the
/// caller's own drive can finish this iteration and suspend. A detached
/// task is the pragmatic stand-in for the backend driver picking the
/// subdialog up on its next needs-drive pass.
fn drive_subdialog_in_background(ctx: Arc<DriverContext>, sub_id: DialogId) {
    tokio::spawn(async move {
        let _guard = ctx.locks.acquire_drive(sub_id.key()).await;
        if let Err(e) = generation::drive(ctx.clone(), sub_id, None, false).await {
            tracing::error!(dialog = %sub_id, error = %e, "subdialog drive failed");
        }
        drop(_guard);
        if let Err(e) = supply_subdialog_response(&ctx, sub_id).await {
            tracing::error!(dialog = %sub_id, error = %e, "failed to deliver subdialog response");
        }
    });
}

/// Delivers a completed subdialog's reply to its caller.
pub async fn supply_subdialog_response(ctx: &Arc<DriverContext>, sub_id: DialogId) -> DriveResult<()> {
    let Some(sub_dialog) = ctx.persistence.load_dialog_latest(sub_id).await? else {
        return Ok(());
    };
    let Some(assignment) = sub_dialog.assignment() else { return Ok(()) };
    let caller_id = assignment.caller_dialog_id;

    let _lock = ctx.locks.acquire_suspension(caller_id.key()).await;
    let mut pending = ctx.persistence.load_pending_subdialogs(caller_id).await?;
    let Some(idx) = pending.iter().position(|r| r.subdialog_id == sub_id) else {
        return Ok(());
    };
    let record = pending.remove(idx);

    let reply_content = sub_dialog
        .core()
        .msgs
        .iter()
        .rev()
        .find_map(|m| match m {
            ChatMessage::Saying { content, .. } => Some(content.clone()),
            _ => None,
        })
        .unwrap_or_default();

    let response = SubdialogResponseRecord {
        response_id: Uuid::new_v4(),
        subdialog_id: sub_id,
        response: reply_content,
        completed_at: Utc::now(),
        call_type: record.call_type,
        tellask_head: record.tellask_head.clone(),
        responder_id: sub_dialog.core().agent_id.clone(),
        origin_member_id: assignment.origin_member_id.clone(),
        call_id: assignment.call_id,
    };
    ctx.persistence.append_subdialog_response(caller_id, response).await?;
    ctx.persistence.save_pending_subdialogs(caller_id, pending.clone()).await?;

    let no_pending_q4h = ctx.persistence.load_pending_question4human(caller_id).await?.is_none();
    if no_pending_q4h && pending.is_empty() {
        if caller_id.is_root() {
            ctx.persistence.set_needs_drive(caller_id.root_id, true).await?;
        } else {
            drive_subdialog_in_background(ctx.clone(), caller_id);
        }
    }

    Ok(())
}
