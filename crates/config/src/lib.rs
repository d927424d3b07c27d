//! Configuration surface: `.minds/team.yaml`, `.minds/llm.yaml`,
//! and `.minds/diligence*.md`, loaded with `serde_yaml` following a
//! "missing file → defaults, malformed file → hard error" pattern.

pub mod agent_loader;
pub mod diligence;
pub mod models;
pub mod team;

pub use agent_loader::FileAgentLoader;
pub use diligence::{load_diligence_text, DiligenceText};
pub use models::{LlmProvidersConfig, ModelConfig, ProviderConfig};
pub use team::{MemberConfig, TeamConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed yaml in {path}: {source}")]
    Yaml { path: String, #[source] source: serde_yaml::Error },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Loads a YAML file into `T`: a missing file yields `T::default()`, but a
/// file that exists and fails to parse is a hard error rather than
/// silently falling back.
pub(crate) async fn load_yaml_or_default<T>(path: &std::path::Path) -> ConfigResult<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(ConfigError::Io { path: path.display().to_string(), source: e }),
    };
    serde_yaml::from_str(&raw).map_err(|e| ConfigError::Yaml { path: path.display().to_string(), source: e })
}
