use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{CallId, DialogId};

/// Subdialog-call taxonomy. Type A suspends the subdialog and
/// synchronously drives the supdialog; Type B resumes a registered
/// subdialog found by `{targetAgentId, tellaskSession}`; Type C is
/// transient and never registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    A,
    B,
    C,
}

/// Kept per *owner* dialog (the caller) while a subdialog it spawned hasn't
/// replied yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSubdialogRecord {
    pub subdialog_id: DialogId,
    pub created_at: DateTime<Utc>,
    pub tellask_head: String,
    pub target_agent_id: String,
    pub call_type: CallType,
    pub tellask_session: Option<String>,
}

/// Queued for the owner to consume on revival, once a subdialog completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdialogResponseRecord {
    pub response_id: Uuid,
    pub subdialog_id: DialogId,
    pub response: String,
    pub completed_at: DateTime<Utc>,
    pub call_type: CallType,
    pub tellask_head: String,
    pub responder_id: String,
    pub origin_member_id: String,
    pub call_id: CallId,
}

/// Where in the dialog a call originated, for diagnostics and the Q4H log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CallSiteRef {
    pub course: u64,
    pub message_index: usize,
}

/// "Question for Human" (Q4H): the dialog suspends until a human answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanQuestion {
    pub id: Uuid,
    pub tellask_head: String,
    pub body_content: String,
    pub asked_at: DateTime<Utc>,
    pub call_id: Option<CallId>,
    pub call_site_ref: CallSiteRef,
}

/// Level reached by the context-health FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextHealthLevel {
    Healthy,
    Caution,
    Critical,
}

/// Snapshot computed from usage and the active model's context limits.
/// `Unavailable` covers providers that don't report usage at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextHealthSnapshot {
    Unavailable { reason: String },
    Available {
        prompt_tokens: u64,
        model_context_limit_tokens: u64,
        level: ContextHealthLevel,
        hard_util: f64,
        optimal_util: f64,
    },
}

impl ContextHealthSnapshot {
    pub fn level(&self) -> Option<ContextHealthLevel> {
        match self {
            ContextHealthSnapshot::Available { level, .. } => Some(*level),
            ContextHealthSnapshot::Unavailable { .. } => None,
        }
    }
}

/// Per-dialog run state, broadcast to subscribers of the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunState {
    Proceeding,
    IdleWaitingUser,
    Interrupted { reason: InterruptReasonKind },
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InterruptReasonKind {
    UserStop,
    EmergencyStop,
    SystemStop { detail: String },
}
