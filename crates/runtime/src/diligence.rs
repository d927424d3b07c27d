//! Diligence Push controller: auto-continues an idle root
//! dialog until its per-root budget is exhausted, then suspends via a
//! human question.

use std::path::Path;

use chrono::Utc;
use dominds_config::diligence::{load_diligence_text, DiligenceText};
use dominds_core::dialog::Dialog;
use dominds_core::events::DialogEvent;
use dominds_core::message::{ChatMessage, Grammar};
use dominds_core::records::{CallSiteRef, HumanQuestion};

pub const DEFAULT_DILIGENCE_TEXT: &str =
    "Continue working the task. If you believe the task is complete, say so explicitly; otherwise take the next concrete step.";

pub enum DiligenceOutcome {
    /// Controller is disabled, suppressed, or the dialog isn't a root:
    /// the loop should proceed to stop.
    Stop,
    /// Budget had room: continue the loop with this prompt as the next
    /// iteration's input.
    Continue { prompt: ChatMessage, event: DialogEvent },
    /// Budget exhausted: suspend with a budget-exhausted human question.
    Suspend { question: HumanQuestion, event: DialogEvent },
}

pub struct DiligencePushController<'a> {
    pub minds_dir: &'a Path,
    pub lang: Option<&'a str>,
}

impl<'a> DiligencePushController<'a> {
    pub fn new(minds_dir: &'a Path, lang: Option<&'a str>) -> Self {
        Self { minds_dir, lang }
    }

    /// Runs the controller for one iteration. `max_inject_count`
    /// comes from the member's `diligence_push_max`; `suppressed_by_caller`
    /// lets a drive caller (e.g. a Type A supdialog drive) force a stop
    /// without touching budget state.
    pub async fn evaluate(
        &self,
        dialog: &mut Dialog,
        max_inject_count: u32,
        suppressed_by_caller: bool,
        call_site_ref: CallSiteRef,
    ) -> DiligenceOutcome {
        let Some((remaining_budget, disable_diligence_push)) = dialog.diligence_budget() else {
            return DiligenceOutcome::Stop;
        };

        if disable_diligence_push || suppressed_by_caller {
            return DiligenceOutcome::Stop;
        }

        let text = load_diligence_text(self.minds_dir, self.lang, DEFAULT_DILIGENCE_TEXT).await;
        let DiligenceText::Text(text) = text else {
            return DiligenceOutcome::Stop;
        };

        if remaining_budget >= 1 {
            let new_remaining = remaining_budget - 1;
            dialog.set_diligence_budget(new_remaining);
            let event = DialogEvent::DiligenceBudget {
                max_inject_count,
                injected_count: max_inject_count.saturating_sub(new_remaining),
                remaining_count: new_remaining,
                disable_diligence_push: false,
            };
            let genseq = dialog.core().active_gen_seq;
            let prompt = ChatMessage::prompting(uuid::Uuid::new_v4().to_string(), text, Grammar::Markdown, genseq);
            DiligenceOutcome::Continue { prompt, event }
        } else {
            dialog.set_diligence_budget(0);
            let question = HumanQuestion {
                id: uuid::Uuid::new_v4(),
                tellask_head: "@human".to_string(),
                body_content: "Diligence Push budget exhausted — is there more to do on this task?".to_string(),
                asked_at: Utc::now(),
                call_id: None,
                call_site_ref,
            };
            let event = DialogEvent::DiligenceBudget {
                max_inject_count,
                injected_count: max_inject_count,
                remaining_count: 0,
                disable_diligence_push: false,
            };
            DiligenceOutcome::Suspend { question, event }
        }
    }
}
