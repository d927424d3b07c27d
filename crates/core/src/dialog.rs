use serde::{Deserialize, Serialize};

use crate::ids::{CallId, DialogId};
use crate::message::ChatMessage;
use crate::records::ContextHealthSnapshot;

/// A reminder item queued for rendering into context. Tools may own a
/// reminder (and render it themselves); otherwise it gets a default
/// environment-message rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub owner_tool: Option<String>,
    pub content: String,
}

/// What a subdialog was assigned to do by the tellask that created it.
/// `collective_targets` lists every agent addressed in the same fan-out
/// headline, so a Type A reply can be matched back correctly even when the
/// headline named several teammates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdialogAssignment {
    pub tellask_head: String,
    pub tellask_body: String,
    pub origin_member_id: String,
    pub caller_dialog_id: DialogId,
    pub call_id: CallId,
    pub collective_targets: Vec<String>,
}

/// Fields shared by every dialog regardless of whether it's a root or a
/// subdialog: callers match on `Dialog::Root`/`Dialog::Sub` for the parts
/// that differ, but everything below lives in `DialogCore` so both
/// variants carry it identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogCore {
    pub id: DialogId,
    pub agent_id: String,
    pub current_course: u64,
    pub active_gen_seq: u64,
    pub msgs: Vec<ChatMessage>,
    pub reminders: Vec<Reminder>,
    pub reminders_ver: u64,
    pub task_doc_path: Option<String>,
    pub last_context_health: Option<ContextHealthSnapshot>,
    pub last_user_language_code: Option<String>,
}

impl DialogCore {
    pub fn new(id: DialogId, agent_id: impl Into<String>) -> Self {
        Self {
            id,
            agent_id: agent_id.into(),
            current_course: 0,
            active_gen_seq: 0,
            msgs: Vec::new(),
            reminders: Vec::new(),
            reminders_ver: 0,
            task_doc_path: None,
            last_context_health: None,
            last_user_language_code: None,
        }
    }

    /// Allocates the next genseq within the current course. GenSeq is
    /// strictly monotonic within a course.
    pub fn next_gen_seq(&mut self) -> u64 {
        self.active_gen_seq += 1;
        self.active_gen_seq
    }

    /// Force-starts a new course: bumps `current_course`, resets
    /// `active_gen_seq`, and invalidates the cached context-health snapshot.
    /// Used both by explicit course resets and by the critical-countdown
    /// remediation path.
    pub fn start_new_course(&mut self, prompt: Option<ChatMessage>) {
        self.current_course += 1;
        self.active_gen_seq = 0;
        self.last_context_health = None;
        if let Some(prompt) = prompt {
            self.msgs.push(prompt);
        }
    }
}

/// A dialog: root or sub. Variant, not subclass. Back-references to
/// caller/supdialog are by `DialogId` only, never by pointer, so the
/// registry (keyed by `rootId/selfId`) is the sole owner of dialog state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Dialog {
    Root {
        core: DialogCore,
        diligence_push_remaining_budget: u32,
        disable_diligence_push: bool,
    },
    Sub {
        core: DialogCore,
        assignment_from_sup: SubdialogAssignment,
    },
}

impl Dialog {
    pub fn new_root(id: DialogId, agent_id: impl Into<String>, diligence_push_max: u32) -> Self {
        Dialog::Root {
            core: DialogCore::new(id, agent_id),
            diligence_push_remaining_budget: diligence_push_max,
            disable_diligence_push: false,
        }
    }

    pub fn new_sub(id: DialogId, agent_id: impl Into<String>, assignment: SubdialogAssignment) -> Self {
        Dialog::Sub {
            core: DialogCore::new(id, agent_id),
            assignment_from_sup: assignment,
        }
    }

    pub fn core(&self) -> &DialogCore {
        match self {
            Dialog::Root { core, .. } => core,
            Dialog::Sub { core, .. } => core,
        }
    }

    pub fn core_mut(&mut self) -> &mut DialogCore {
        match self {
            Dialog::Root { core, .. } => core,
            Dialog::Sub { core, .. } => core,
        }
    }

    pub fn id(&self) -> DialogId {
        self.core().id
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Dialog::Root { .. })
    }

    /// The direct supdialog's agent id, if this is a subdialog.
    pub fn direct_supdialog_agent(&self) -> Option<&str> {
        match self {
            Dialog::Sub { assignment_from_sup, .. } => Some(&assignment_from_sup.origin_member_id),
            Dialog::Root { .. } => None,
        }
    }

    /// Whether the headline that created this subdialog begins with
    /// `@self` — the FBR-toolless trigger condition.
    pub fn is_fbr_self_tellask(&self) -> bool {
        match self {
            Dialog::Sub { assignment_from_sup, .. } => {
                assignment_from_sup.tellask_head.trim_start().starts_with("@self")
            }
            Dialog::Root { .. } => false,
        }
    }

    pub fn assignment(&self) -> Option<&SubdialogAssignment> {
        match self {
            Dialog::Sub { assignment_from_sup, .. } => Some(assignment_from_sup),
            Dialog::Root { .. } => None,
        }
    }

    pub fn diligence_budget(&self) -> Option<(u32, bool)> {
        match self {
            Dialog::Root { diligence_push_remaining_budget, disable_diligence_push, .. } => {
                Some((*diligence_push_remaining_budget, *disable_diligence_push))
            }
            Dialog::Sub { .. } => None,
        }
    }

    pub fn set_diligence_budget(&mut self, budget: u32) {
        if let Dialog::Root { diligence_push_remaining_budget, .. } = self {
            *diligence_push_remaining_budget = budget;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_new_course_resets_genseq_and_bumps_course() {
        let mut core = DialogCore::new(DialogId::new_root(), "alice");
        core.next_gen_seq();
        core.next_gen_seq();
        assert_eq!(core.active_gen_seq, 2);
        core.start_new_course(None);
        assert_eq!(core.current_course, 1);
        assert_eq!(core.active_gen_seq, 0);
        assert!(core.last_context_health.is_none());
    }

    #[test]
    fn fbr_self_tellask_detected_from_headline() {
        let root_id = uuid::Uuid::new_v4();
        let assignment = SubdialogAssignment {
            tellask_head: "@self draft ideas".into(),
            tellask_body: "draft ideas".into(),
            origin_member_id: "zed".into(),
            caller_dialog_id: DialogId { self_id: root_id, root_id },
            call_id: CallId::new(),
            collective_targets: vec!["zed".into()],
        };
        let dlg = Dialog::new_sub(DialogId::new_sub(root_id), "zed", assignment);
        assert!(dlg.is_fbr_self_tellask());
    }
}
