use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dialog::Dialog;
use crate::error::DriveResult;

/// Per-member fields consumed by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub model: String,
    pub streaming: bool,
    pub model_params: Option<serde_json::Value>,
    pub fbr_model_params: Option<serde_json::Value>,
    /// 0..100; 0 disables FBR for this member.
    pub fbr_effort: u8,
    pub diligence_push_max: u32,
}

/// Result of loading an agent's configuration and working memory for one
/// iteration — reloaded fresh every iteration since configuration may have
/// changed on disk between iterations.
#[derive(Debug, Clone)]
pub struct AgentMinds {
    pub member: TeamMember,
    pub system_prompt: String,
    pub memories: Vec<String>,
    pub agent_tools: Vec<String>,
    pub known_team_member_ids: Vec<String>,
}

#[async_trait]
pub trait AgentLoader: Send + Sync {
    async fn load_agent_minds(&self, agent_id: &str, dialog: &Dialog) -> DriveResult<AgentMinds>;
}
