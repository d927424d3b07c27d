use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A function tool projected for the provider's API type, alongside its
/// JSON-schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One request to generate further messages, built by the context assembler.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<ProviderMessage>,
    pub tools: Vec<ProviderToolSpec>,
    pub model_params: Option<serde_json::Value>,
}

/// Wire-shaped message the generator sends upstream — deliberately not the
/// same type as `ChatMessage`: the provider's wire format is out of scope,
/// so this is the narrow seam between the driver's rich history and
/// whatever bytes actually go over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: String,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub messages: Vec<ProviderMessage>,
    pub func_calls: Vec<FuncCallEvent>,
    pub usage: Option<GenerationUsage>,
    pub llm_gen_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncCallEvent {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Failure classification the LLM request runner uses to decide whether to
/// retry. A generator implementation is expected to map
/// transport/HTTP failures into these variants rather than returning a
/// generic error string.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    #[error("retriable transport or server error: {0}")]
    Retriable(String),
    #[error("request rejected (non-retriable, provider={provider}): {detail}")]
    Rejected { provider: String, detail: String },
    #[error("fatal error: {0}")]
    Fatal(String),
}

/// Streaming callback surface the generator drives as chunks arrive:
/// thinking/saying start-chunk-finish plus a function-call and a
/// stream-error hook, collapsed into one trait with default no-op bodies
/// so a test double only needs to override what it cares about.
#[async_trait]
pub trait GenerationReceiver: Send {
    async fn thinking_start(&mut self) {}
    async fn thinking_chunk(&mut self, _text: &str) {}
    async fn thinking_finish(&mut self) {}
    async fn saying_start(&mut self) {}
    async fn saying_chunk(&mut self, _text: &str) {}
    async fn saying_finish(&mut self) {}
    async fn func_call(&mut self, _event: FuncCallEvent) {}
    async fn stream_error(&mut self, _detail: &str) {}
}

/// LLM generator collaborator. Either non-streaming
/// (`gen_more_messages`) or streaming (`gen_to_receiver`); implementations
/// may support one or both.
#[async_trait]
pub trait LlmGenerator: Send + Sync {
    async fn gen_more_messages(&self, request: GenerationRequest, cancel: CancellationToken) -> Result<GenerationResult, LlmError>;

    async fn gen_to_receiver(
        &self,
        request: GenerationRequest,
        receiver: &mut dyn GenerationReceiver,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError>;
}
