use std::path::PathBuf;

use async_trait::async_trait;
use dominds_core::collab::agent::{AgentLoader, AgentMinds};
use dominds_core::dialog::Dialog;
use dominds_core::error::{DriveError, DriveResult};

use crate::team::TeamConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful team member. Respond concisely and address teammates with @name when you need their input.";

/// `AgentLoader` backed by `.minds/team.yaml` plus per-member files under
/// `.minds/agents/<id>/`. Reloaded fresh on every call, since configuration
/// may have changed on disk between iterations.
pub struct FileAgentLoader {
    pub minds_dir: PathBuf,
}

impl FileAgentLoader {
    pub fn new(minds_dir: impl Into<PathBuf>) -> Self {
        Self { minds_dir: minds_dir.into() }
    }

    async fn read_system_prompt(&self, agent_id: &str) -> String {
        let path = self.minds_dir.join("agents").join(agent_id).join("system_prompt.md");
        tokio::fs::read_to_string(&path).await.unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string())
    }

    async fn read_memories(&self, agent_id: &str) -> Vec<String> {
        let path = self.minds_dir.join("agents").join(agent_id).join("memory.md");
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw.split("\n\n").map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl AgentLoader for FileAgentLoader {
    async fn load_agent_minds(&self, agent_id: &str, _dialog: &Dialog) -> DriveResult<AgentMinds> {
        let team = TeamConfig::load_from(self.minds_dir.join("team.yaml"))
            .await
            .map_err(|e| DriveError::Config(e.to_string()))?;

        let raw_member = team.find(agent_id).ok_or_else(|| DriveError::Config(format!("unknown team member '{agent_id}'")))?;
        let member = team
            .resolve_member(agent_id)
            .ok_or_else(|| DriveError::Config(format!("unknown team member '{agent_id}'")))?;

        if member.provider.is_empty() || member.model.is_empty() {
            return Err(DriveError::Config(format!("member '{agent_id}' has no provider/model configured and no team default is set")));
        }

        Ok(AgentMinds {
            system_prompt: self.read_system_prompt(agent_id).await,
            memories: self.read_memories(agent_id).await,
            agent_tools: raw_member.tools.clone(),
            known_team_member_ids: team.known_member_ids(),
            member,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dominds_core::dialog::Dialog;
    use dominds_core::ids::DialogId;

    #[tokio::test]
    async fn unknown_member_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileAgentLoader::new(dir.path());
        let dlg = Dialog::new_root(DialogId::new_root(), "ghost", 3);
        let err = loader.load_agent_minds("ghost", &dlg).await.unwrap_err();
        assert!(matches!(err, DriveError::Config(_)));
    }

    #[tokio::test]
    async fn loads_configured_member_with_fallback_prompt() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("team.yaml"),
            "member_defaults:\n  provider: openai\n  model: gpt-4o\nmembers:\n  - id: alice\n    name: Alice\n    tools: [echo]\n",
        )
        .await
        .unwrap();
        let loader = FileAgentLoader::new(dir.path());
        let dlg = Dialog::new_root(DialogId::new_root(), "alice", 3);
        let minds = loader.load_agent_minds("alice", &dlg).await.unwrap();
        assert_eq!(minds.member.provider, "openai");
        assert_eq!(minds.agent_tools, vec!["echo".to_string()]);
        assert_eq!(minds.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }
}
