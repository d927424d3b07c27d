//! Function-call execution: every function call
//! emitted in one generation iteration runs concurrently, and both the
//! call and result messages are appended interleaved pair-wise.

use std::collections::HashMap;

use dominds_core::collab::agent::TeamMember;
use dominds_core::collab::llm::FuncCallEvent;
use dominds_core::collab::tools::{ArgsValidation, ToolCallOutput, ToolError, ToolRegistry};
use dominds_core::dialog::Dialog;
use dominds_core::message::ChatMessage;
use tokio_util::sync::CancellationToken;

/// Key under which a passthrough tool's raw, unparsed argument string is
/// handed to `Tool::call`.
const PASSTHROUGH_ARG_KEY: &str = "raw";

pub struct ExecutedCall {
    pub call_msg: ChatMessage,
    pub result_msg: ChatMessage,
}

/// Runs every function call concurrently against the projected registry,
/// returning call/result message pairs in the same order the calls were
/// emitted. A call naming an unregistered tool produces a failed result
/// rather than aborting the whole batch.
pub async fn execute_function_calls(
    dialog: &Dialog,
    agent: &TeamMember,
    registry: &ToolRegistry,
    calls: &[FuncCallEvent],
    genseq: u64,
    cancel: CancellationToken,
) -> Vec<ExecutedCall> {
    let futures = calls.iter().map(|call| {
        let cancel = cancel.clone();
        async move {
            let call_msg = ChatMessage::func_call(call.call_id.clone(), call.name.clone(), call.arguments.clone(), genseq);
            let content = run_one(dialog, agent, registry, call, cancel).await;
            let result_msg = ChatMessage::func_result(call.call_id.clone(), call.name.clone(), content, genseq);
            ExecutedCall { call_msg, result_msg }
        }
    });
    futures::future::join_all(futures).await
}

async fn run_one(
    dialog: &Dialog,
    agent: &TeamMember,
    registry: &ToolRegistry,
    call: &FuncCallEvent,
    cancel: CancellationToken,
) -> String {
    let Some(tool) = registry.get(&call.name) else {
        return ToolError::ExecutionFailed { name: call.name.clone(), detail: "tool not registered for this agent".to_string() }.to_string();
    };

    let args: HashMap<String, serde_json::Value> = match tool.spec().args_validation {
        ArgsValidation::Schema => match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => return ToolError::InvalidArguments(e.to_string()).to_string(),
        },
        // No per-field schema to check against: hand the raw argument
        // string through under one fixed key rather than decomposing it.
        ArgsValidation::Passthrough => HashMap::from([(PASSTHROUGH_ARG_KEY.to_string(), serde_json::Value::String(call.arguments.clone()))]),
    };

    match tool.call(dialog, agent, &args, cancel).await {
        Ok(ToolCallOutput { content, .. }) => content,
        Err(e) => e.to_string(),
    }
}
