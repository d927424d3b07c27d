//! Drive policy builder: default vs. FBR-toolless, with the
//! invariant validation run before every generation.

use dominds_core::collab::agent::AgentMinds;
use dominds_core::collab::tools::{ToolRegistry, ToolSpec};
use dominds_core::dialog::Dialog;
use dominds_core::error::{DriveError, DriveResult};
use dominds_core::message::ChatMessage;

/// Which tellask headlines a drive is allowed to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TellaskVocabulary {
    AllowAny,
    TellaskerOnly,
}

#[derive(Debug, Clone)]
pub struct DrivePolicy {
    pub system_prompt: String,
    pub tools: Vec<ToolSpec>,
    pub tellask_vocabulary: TellaskVocabulary,
    pub function_calls_permitted: bool,
    pub prepended_messages: Vec<ChatMessage>,
    pub model_params_override: Option<serde_json::Value>,
    pub is_fbr_toolless: bool,
}

const FBR_SYSTEM_PROMPT: &str = "You have no tools available in this reasoning pass. Think the problem through in prose and, when ready, reply to @tellasker with your conclusion.";
const FBR_NO_TOOLS_NOTICE: &str = "No tools are available for this self-reasoning pass.";

/// Builds the drive policy for one generation iteration.
/// FBR-toolless triggers iff the dialog is a subdialog whose
/// `assignmentFromSup.tellaskHead` begins with `@self`.
pub fn build_drive_policy(dialog: &Dialog, minds: &AgentMinds, tools: &ToolRegistry) -> DriveResult<DrivePolicy> {
    let projected_tools: Vec<ToolSpec> = tools.project(&minds.agent_tools);

    if dialog.is_fbr_self_tellask() {
        let policy = DrivePolicy {
            system_prompt: FBR_SYSTEM_PROMPT.to_string(),
            tools: Vec::new(),
            tellask_vocabulary: TellaskVocabulary::TellaskerOnly,
            function_calls_permitted: false,
            prepended_messages: vec![ChatMessage::environment(FBR_NO_TOOLS_NOTICE)],
            model_params_override: minds.member.fbr_model_params.clone(),
            is_fbr_toolless: true,
        };
        validate_policy(&policy)?;
        return Ok(policy);
    }

    let policy = DrivePolicy {
        system_prompt: minds.system_prompt.clone(),
        tools: projected_tools,
        tellask_vocabulary: TellaskVocabulary::AllowAny,
        function_calls_permitted: true,
        prepended_messages: Vec::new(),
        model_params_override: minds.member.model_params.clone(),
        is_fbr_toolless: false,
    };
    validate_policy(&policy)?;
    Ok(policy)
}

/// Validates the invariants required before every generation:
/// an FBR-toolless policy must carry no tools, forbid function calls, and
/// restrict its tellask vocabulary; a default policy is never toolless by
/// policy construction.
fn validate_policy(policy: &DrivePolicy) -> DriveResult<()> {
    if policy.is_fbr_toolless {
        if !policy.tools.is_empty() {
            return Err(DriveError::Internal("FBR-toolless policy built with non-empty tools".to_string()));
        }
        if policy.function_calls_permitted {
            return Err(DriveError::Internal("FBR-toolless policy permits function calls".to_string()));
        }
        if policy.tellask_vocabulary != TellaskVocabulary::TellaskerOnly {
            return Err(DriveError::Internal("FBR-toolless policy does not restrict tellask vocabulary".to_string()));
        }
    }
    Ok(())
}

/// Whether a generated tellask headline is permitted under this policy's
/// vocabulary.
pub fn tellask_allowed(policy: &DrivePolicy, tellask_head: &str) -> bool {
    match policy.tellask_vocabulary {
        TellaskVocabulary::AllowAny => true,
        TellaskVocabulary::TellaskerOnly => tellask_head.trim_start().starts_with("@tellasker"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominds_core::collab::agent::TeamMember;
    use dominds_core::dialog::{Dialog, SubdialogAssignment};
    use dominds_core::ids::{CallId, DialogId};

    fn minds() -> AgentMinds {
        AgentMinds {
            member: TeamMember {
                id: "zed".into(),
                name: "Zed".into(),
                provider: "test".into(),
                model: "test".into(),
                streaming: false,
                model_params: None,
                fbr_model_params: None,
                fbr_effort: 3,
                diligence_push_max: 3,
            },
            system_prompt: "be helpful".into(),
            memories: vec![],
            agent_tools: vec!["echo".into()],
            known_team_member_ids: vec!["zed".into()],
        }
    }

    #[test]
    fn default_policy_keeps_tools_and_allows_any_tellask() {
        let dlg = Dialog::new_root(DialogId::new_root(), "zed", 3);
        let policy = build_drive_policy(&dlg, &minds(), &ToolRegistry::new()).unwrap();
        assert!(!policy.is_fbr_toolless);
        assert_eq!(policy.tellask_vocabulary, TellaskVocabulary::AllowAny);
        assert!(policy.function_calls_permitted);
    }

    #[test]
    fn self_tellask_subdialog_builds_fbr_toolless_policy() {
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
        let policy = build_drive_policy(&dlg, &minds(), &ToolRegistry::new()).unwrap();
        assert!(policy.is_fbr_toolless);
        assert!(policy.tools.is_empty());
        assert!(!policy.function_calls_permitted);
        assert_eq!(policy.tellask_vocabulary, TellaskVocabulary::TellaskerOnly);
    }

    #[test]
    fn tellasker_only_vocabulary_rejects_non_tellasker_targets() {
        let policy = DrivePolicy {
            system_prompt: String::new(),
            tools: vec![],
            tellask_vocabulary: TellaskVocabulary::TellaskerOnly,
            function_calls_permitted: false,
            prepended_messages: vec![],
            model_params_override: None,
            is_fbr_toolless: true,
        };
        assert!(tellask_allowed(&policy, "@tellasker here is my answer"));
        assert!(!tellask_allowed(&policy, "@alice here is my answer"));
    }
}
