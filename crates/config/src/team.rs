use std::path::Path;

use dominds_core::collab::agent::TeamMember;
use serde::{Deserialize, Serialize};

use crate::{load_yaml_or_default, ConfigResult};

/// `.minds/team.yaml`: members plus provider/model defaults applied when a
/// member doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TeamConfig {
    pub members: Vec<MemberConfig>,
    pub member_defaults: MemberDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MemberDefaults {
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberConfig {
    pub id: String,
    pub name: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub streaming: bool,
    pub model_params: Option<serde_json::Value>,
    pub fbr_model_params: Option<serde_json::Value>,
    /// 0..100; 0 disables FBR for this member.
    pub fbr_effort: u8,
    pub diligence_push_max: u32,
    /// Names of tools this member is allowed to call — projected into
    /// `AgentMinds::agent_tools`.
    pub tools: Vec<String>,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            provider: None,
            model: None,
            streaming: true,
            model_params: None,
            fbr_model_params: None,
            fbr_effort: 0,
            diligence_push_max: 3,
            tools: Vec::new(),
        }
    }
}

impl TeamConfig {
    pub async fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        load_yaml_or_default(path.as_ref()).await
    }

    pub fn find(&self, agent_id: &str) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.id == agent_id)
    }

    pub fn known_member_ids(&self) -> Vec<String> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }

    /// Resolves a member into the `TeamMember` the driver consumes,
    /// applying `member_defaults` for any field the member left unset.
    /// Returns `None` if `agent_id` isn't a configured member — the
    /// driver's "missing configuration" fatal-error path.
    pub fn resolve_member(&self, agent_id: &str) -> Option<TeamMember> {
        let member = self.find(agent_id)?;
        Some(TeamMember {
            id: member.id.clone(),
            name: member.name.clone(),
            provider: member.provider.clone().or_else(|| self.member_defaults.provider.clone()).unwrap_or_default(),
            model: member.model.clone().or_else(|| self.member_defaults.model.clone()).unwrap_or_default(),
            streaming: member.streaming,
            model_params: member.model_params.clone(),
            fbr_model_params: member.fbr_model_params.clone(),
            fbr_effort: member.fbr_effort,
            diligence_push_max: member.diligence_push_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_empty_default() {
        let cfg = TeamConfig::load_from("/nonexistent/team.yaml").await.unwrap();
        assert!(cfg.members.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.yaml");
        tokio::fs::write(&path, "members: [this is not valid: yaml: at all:").await.unwrap();
        let result = TeamConfig::load_from(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn member_inherits_defaults_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team.yaml");
        tokio::fs::write(
            &path,
            "member_defaults:\n  provider: openai\n  model: gpt-4o\nmembers:\n  - id: alice\n    name: Alice\n",
        )
        .await
        .unwrap();
        let cfg = TeamConfig::load_from(&path).await.unwrap();
        let member = cfg.resolve_member("alice").unwrap();
        assert_eq!(member.provider, "openai");
        assert_eq!(member.model, "gpt-4o");
    }

    #[tokio::test]
    async fn unknown_member_resolves_to_none() {
        let cfg = TeamConfig::default();
        assert!(cfg.resolve_member("nobody").is_none());
    }
}
