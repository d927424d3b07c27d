//! The LLM request runner: failure classification, capped
//! exponential backoff, and a `reqwest`-based OpenAI-compatible generator.
//! The wire protocol itself is out of scope — `HttpLlmGenerator`
//! is *a* reference client, not *the* client; swap it for a provider SDK
//! without touching `dominds-runtime`.

use std::time::Duration;

use async_trait::async_trait;
use dominds_core::collab::llm::{
    FuncCallEvent, GenerationReceiver, GenerationRequest, GenerationResult, GenerationUsage, LlmError, LlmGenerator,
    ProviderMessage, ProviderRole,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod problem;
pub mod retry;

pub use problem::{ProblemRecord, ProblemSink};
pub use retry::run_with_retry;

/// A reqwest-based OpenAI-compatible chat completions client, the one
/// wire format most self-hosted and hosted providers alike normalize to.
#[derive(Debug, Clone)]
pub struct HttpLlmGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpLlmGenerator {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), api_key }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": role_str(m.role),
                    "content": m.content,
                    "tool_call_id": m.tool_call_id,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        if let Some(params) = &request.model_params {
            if let (Some(obj), Some(extra)) = (body.as_object_mut(), params.as_object()) {
                for (k, v) in extra {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        body
    }

    async fn do_request(&self, request: &GenerationRequest) -> Result<RawCompletion, LlmError> {
        let mut req = self.client.post(self.endpoint()).json(&self.build_body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(classify_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_status(status.as_u16(), &request.provider, &body));
        }
        resp.json::<RawCompletion>().await.map_err(|e| LlmError::Fatal(e.to_string()))
    }
}

#[async_trait]
impl LlmGenerator for HttpLlmGenerator {
    async fn gen_more_messages(&self, request: GenerationRequest, cancel: CancellationToken) -> Result<GenerationResult, LlmError> {
        let provider = request.provider.clone();
        let raw = run_with_retry(&provider, 5, || true, cancel, || async { self.do_request(&request).await }).await?;
        Ok(raw.into_result())
    }

    async fn gen_to_receiver(
        &self,
        request: GenerationRequest,
        receiver: &mut dyn GenerationReceiver,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError> {
        // The reference client has no incremental-chunk transport wired up;
        // it issues one non-streaming request and replays it through the
        // receiver as a single chunk, so callers written against the
        // streaming surface still observe start/chunk/finish in order.
        let result = self.gen_more_messages(request, cancel).await?;
        receiver.saying_start().await;
        for msg in &result.messages {
            if matches!(msg.role, ProviderRole::Assistant) && !msg.content.is_empty() {
                receiver.saying_chunk(&msg.content).await;
            }
        }
        receiver.saying_finish().await;
        for call in &result.func_calls {
            receiver.func_call(call.clone()).await;
        }
        Ok(result)
    }
}

fn role_str(role: ProviderRole) -> &'static str {
    match role {
        ProviderRole::System => "system",
        ProviderRole::User => "user",
        ProviderRole::Assistant => "assistant",
        ProviderRole::Tool => "tool",
    }
}

#[derive(Debug, Deserialize)]
struct RawCompletion {
    choices: Vec<RawChoice>,
    #[serde(default)]
    usage: Option<RawUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<RawToolCall>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct RawToolCall {
    #[serde(default)]
    id: String,
    function: RawFunctionCall,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct RawFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl RawCompletion {
    fn into_result(self) -> GenerationResult {
        let mut messages = Vec::new();
        let mut func_calls = Vec::new();
        for choice in self.choices {
            if let Some(content) = choice.message.content {
                if !content.is_empty() {
                    messages.push(ProviderMessage {
                        role: ProviderRole::Assistant,
                        content,
                        tool_call_id: None,
                    });
                }
            }
            for tc in choice.message.tool_calls {
                func_calls.push(FuncCallEvent {
                    call_id: if tc.id.is_empty() { uuid::Uuid::new_v4().to_string() } else { tc.id },
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                });
            }
        }
        GenerationResult {
            messages,
            func_calls,
            usage: self.usage.map(|u| GenerationUsage { prompt_tokens: u.prompt_tokens, completion_tokens: u.completion_tokens }),
            llm_gen_model: self.model,
        }
    }
}

/// Classifies a transport-level `reqwest::Error`: connect/timeout failures
/// and the named OS error codes are retriable; anything else that never
/// reached an HTTP status is fatal.
fn classify_transport_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() || err.is_connect() {
        return LlmError::Retriable(err.to_string());
    }
    let msg = err.to_string();
    const RETRIABLE_NEEDLES: &[&str] = &[
        "fetch failed",
        "socket hang up",
        "terminated",
        "ETIMEDOUT",
        "ECONNRESET",
        "ECONNREFUSED",
        "EAI_AGAIN",
        "ENOTFOUND",
        "ENETUNREACH",
        "EHOSTUNREACH",
        "UND_ERR",
    ];
    if RETRIABLE_NEEDLES.iter().any(|needle| msg.contains(needle)) {
        return LlmError::Retriable(msg);
    }
    LlmError::Fatal(msg)
}

/// Classifies an HTTP status: 408/429/5xx retriable, other 4xx rejected
/// (non-retriable, surfaces a problem record).
fn classify_http_status(status: u16, provider: &str, body: &str) -> LlmError {
    match status {
        408 | 429 => LlmError::Retriable(format!("http {status}")),
        s if s >= 500 => LlmError::Retriable(format!("http {s}")),
        s if (400..500).contains(&s) => LlmError::Rejected { provider: provider.to_string(), detail: format!("http {s}: {body}") },
        s => LlmError::Fatal(format!("unexpected status {s}: {body}")),
    }
}

/// Deterministic, network-free `LlmGenerator` for tests: always returns a
/// single assistant `Saying` with the given text.
pub struct EchoGenerator {
    pub text: String,
}

#[async_trait]
impl LlmGenerator for EchoGenerator {
    async fn gen_more_messages(&self, _request: GenerationRequest, _cancel: CancellationToken) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            messages: vec![ProviderMessage { role: ProviderRole::Assistant, content: self.text.clone(), tool_call_id: None }],
            func_calls: Vec::new(),
            usage: None,
            llm_gen_model: None,
        })
    }

    async fn gen_to_receiver(
        &self,
        request: GenerationRequest,
        receiver: &mut dyn GenerationReceiver,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError> {
        let result = self.gen_more_messages(request, cancel).await?;
        receiver.saying_start().await;
        receiver.saying_chunk(&self.text).await;
        receiver.saying_finish().await;
        Ok(result)
    }
}

/// Test double that plays back a fixed sequence of `GenerationResult`s, one
/// per call, then repeats the last one — used by `dominds-runtime`'s
/// tests to script multi-turn exchanges deterministically.
pub struct ScriptedGenerator {
    turns: std::sync::Mutex<std::collections::VecDeque<Result<GenerationResult, LlmError>>>,
}

impl ScriptedGenerator {
    pub fn new(turns: Vec<Result<GenerationResult, LlmError>>) -> Self {
        Self { turns: std::sync::Mutex::new(turns.into()) }
    }

    fn next_turn(&self) -> Result<GenerationResult, LlmError> {
        let mut guard = self.turns.lock().expect("scripted generator poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(LlmError::Fatal("ScriptedGenerator exhausted".to_string()))
        })
    }
}

#[async_trait]
impl LlmGenerator for ScriptedGenerator {
    async fn gen_more_messages(&self, _request: GenerationRequest, _cancel: CancellationToken) -> Result<GenerationResult, LlmError> {
        self.next_turn()
    }

    async fn gen_to_receiver(
        &self,
        request: GenerationRequest,
        receiver: &mut dyn GenerationReceiver,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, LlmError> {
        let result = self.gen_more_messages(request, cancel).await?;
        receiver.saying_start().await;
        for msg in &result.messages {
            if matches!(msg.role, ProviderRole::Assistant) {
                receiver.saying_chunk(&msg.content).await;
            }
        }
        receiver.saying_finish().await;
        for call in &result.func_calls {
            receiver.func_call(call.clone()).await;
        }
        Ok(result)
    }
}

/// Sleeps `dur` honoring cancellation (backoff must respect the
/// abort token). Returns `true` if the sleep completed, `false` if cancelled.
pub async fn sleep_with_abort(dur: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_generator_round_trips_text() {
        let gen = EchoGenerator { text: "hi there".into() };
        let req = GenerationRequest {
            provider: "test".into(),
            model: "test-model".into(),
            messages: vec![],
            tools: vec![],
            model_params: None,
        };
        let result = gen.gen_more_messages(req, CancellationToken::new()).await.unwrap();
        assert_eq!(result.messages[0].content, "hi there");
    }

    #[test]
    fn classify_400_is_rejected_not_retriable() {
        let err = classify_http_status(400, "openai", "bad request");
        assert!(matches!(err, LlmError::Rejected { .. }));
    }

    #[test]
    fn classify_500_is_retriable() {
        let err = classify_http_status(503, "openai", "");
        assert!(matches!(err, LlmError::Retriable(_)));
    }

    #[test]
    fn classify_429_is_retriable() {
        let err = classify_http_status(429, "openai", "");
        assert!(matches!(err, LlmError::Retriable(_)));
    }
}
