use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{load_yaml_or_default, ConfigResult};

/// `.minds/llm.yaml`: providers keyed by name, each with an `apiType` and a
/// map of model configs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LlmProvidersConfig {
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_type: String,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub models: HashMap<String, ModelConfig>,
}

/// Per-model context-window knobs consumed by the context-health evaluator.
/// `context_length`/`input_length` are read in that priority
/// order for the hard limit, matching `modelContextLimitTokens =
/// context_length || input_length`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModelConfig {
    pub context_length: Option<u64>,
    pub input_length: Option<u64>,
    pub context_window: Option<u64>,
    pub optimal_max_tokens: Option<u64>,
    pub critical_max_tokens: Option<u64>,
    pub caution_remediation_cadence_generations: Option<u32>,
}

/// Default caution threshold: 100,000 tokens.
pub const DEFAULT_OPTIMAL_MAX_TOKENS: u64 = 100_000;
/// Default caution-guide injection cadence: every 10 generations.
pub const DEFAULT_CAUTION_CADENCE: u32 = 10;
/// Default critical threshold: 90% of the hard context limit.
pub const DEFAULT_CRITICAL_FRACTION: f64 = 0.9;

impl ModelConfig {
    /// The model's hard context limit, preferring `context_length` then `input_length`.
    pub fn hard_limit_tokens(&self) -> Option<u64> {
        self.context_length.or(self.input_length).or(self.context_window)
    }

    pub fn effective_optimal_tokens(&self) -> u64 {
        self.optimal_max_tokens.unwrap_or(DEFAULT_OPTIMAL_MAX_TOKENS)
    }

    /// 90% of the hard limit unless overridden.
    pub fn effective_critical_tokens(&self, hard_limit: u64) -> u64 {
        self.critical_max_tokens.unwrap_or_else(|| (hard_limit as f64 * DEFAULT_CRITICAL_FRACTION) as u64)
    }

    pub fn caution_cadence(&self) -> u32 {
        self.caution_remediation_cadence_generations.unwrap_or(DEFAULT_CAUTION_CADENCE)
    }
}

impl LlmProvidersConfig {
    pub async fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        load_yaml_or_default(path.as_ref()).await
    }

    pub fn model(&self, provider: &str, model: &str) -> Option<&ModelConfig> {
        self.providers.get(provider)?.models.get(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_limit_prefers_context_length_over_input_length() {
        let model = ModelConfig { context_length: Some(128_000), input_length: Some(8_000), ..Default::default() };
        assert_eq!(model.hard_limit_tokens(), Some(128_000));
    }

    #[test]
    fn critical_defaults_to_ninety_percent_of_hard_limit() {
        let model = ModelConfig::default();
        assert_eq!(model.effective_critical_tokens(100_000), 90_000);
    }

    #[tokio::test]
    async fn missing_llm_yaml_yields_empty_providers() {
        let cfg = LlmProvidersConfig::load_from("/nonexistent/llm.yaml").await.unwrap();
        assert!(cfg.providers.is_empty());
    }
}
