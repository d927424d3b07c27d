use serde::{Deserialize, Serialize};

use crate::message::Grammar;
use crate::records::{HumanQuestion, InterruptReasonKind};

/// Events a dialog posts to its event bus as it moves through generation,
/// suspension, and tellask execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialogEvent {
    EndOfUserSaying {
        course: u64,
        genseq: u64,
        msg_id: String,
        content: String,
        grammar: Grammar,
        user_language_code: Option<String>,
    },
    NewQ4hAsked {
        question: HumanQuestion,
    },
    DiligenceBudget {
        max_inject_count: u32,
        injected_count: u32,
        remaining_count: u32,
        disable_diligence_push: bool,
    },
    Resumed,
    Interrupted {
        reason: InterruptReasonKind,
    },
}
