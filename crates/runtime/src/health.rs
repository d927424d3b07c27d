//! Context-health remediation FSM.

use dominds_config::ModelConfig;
use dominds_core::message::ChatMessage;
use dominds_core::records::{ContextHealthLevel, ContextHealthSnapshot};

const CRITICAL_COUNTDOWN_GENERATIONS: u32 = 5;

#[derive(Debug, Clone, Default)]
pub struct ContextHealthFsm {
    last_seen_level: Option<ContextHealthLevel>,
    last_caution_guide_injected_at_gen_seq: Option<u64>,
    critical_countdown_remaining: Option<u32>,
}

/// What the generation loop should do after remediation runs this
/// iteration.
pub enum RemediationAction {
    /// Proceed with the (possibly amended) context; `guide` is an extra
    /// message to fold into context assembly if present.
    Proceed { guide: Option<ChatMessage> },
    /// Force a new course and continue the loop with this prompt.
    ContinueWithNewCourse { prompt: ChatMessage },
    /// Suspend the drive.
    Suspend,
}

pub fn compute_snapshot(prompt_tokens: u64, model: &ModelConfig) -> ContextHealthSnapshot {
    let Some(hard_limit) = model.hard_limit_tokens() else {
        return ContextHealthSnapshot::Unavailable { reason: "model has no configured context limit".to_string() };
    };
    let optimal = model.effective_optimal_tokens();
    let critical = model.effective_critical_tokens(hard_limit);

    let level = if prompt_tokens > critical {
        ContextHealthLevel::Critical
    } else if prompt_tokens > optimal {
        ContextHealthLevel::Caution
    } else {
        ContextHealthLevel::Healthy
    };

    ContextHealthSnapshot::Available {
        prompt_tokens,
        model_context_limit_tokens: hard_limit,
        level,
        hard_util: prompt_tokens as f64 / hard_limit as f64,
        optimal_util: prompt_tokens as f64 / optimal as f64,
    }
}

impl ContextHealthFsm {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn critical_countdown_remaining(&self) -> Option<u32> {
        self.critical_countdown_remaining
    }

    fn reset(&mut self) {
        self.last_seen_level = None;
        self.last_caution_guide_injected_at_gen_seq = None;
        self.critical_countdown_remaining = None;
    }

    /// Runs remediation for one iteration given the freshly computed
    /// snapshot, the model's caution cadence, the current gen_seq, and
    /// whether a user prompt was already emitted this iteration.
    pub fn remediate(
        &mut self,
        snapshot: &ContextHealthSnapshot,
        caution_cadence: u32,
        current_gen_seq: u64,
        user_prompt_emitted_this_iteration: bool,
    ) -> RemediationAction {
        let Some(level) = snapshot.level() else {
            self.reset();
            return RemediationAction::Proceed { guide: None };
        };

        match level {
            ContextHealthLevel::Healthy => {
                self.reset();
                self.last_seen_level = Some(level);
                RemediationAction::Proceed { guide: None }
            }
            ContextHealthLevel::Caution => {
                self.last_seen_level = Some(level);
                self.critical_countdown_remaining = None;
                let due = match self.last_caution_guide_injected_at_gen_seq {
                    None => true,
                    Some(last) => current_gen_seq.saturating_sub(last) >= caution_cadence as u64,
                };
                if !due {
                    return RemediationAction::Proceed { guide: None };
                }
                self.last_caution_guide_injected_at_gen_seq = Some(current_gen_seq);
                let text = "Context is approaching its optimal size. Wrap up loose ends and consider summarizing before continuing.";
                let guide = if user_prompt_emitted_this_iteration {
                    ChatMessage::environment(text)
                } else {
                    ChatMessage::prompting(uuid::Uuid::new_v4().to_string(), text, dominds_core::message::Grammar::Markdown, current_gen_seq)
                };
                RemediationAction::Proceed { guide: Some(guide) }
            }
            ContextHealthLevel::Critical => {
                self.last_seen_level = Some(level);
                let remaining = self.critical_countdown_remaining.unwrap_or(CRITICAL_COUNTDOWN_GENERATIONS);
                if remaining == 0 {
                    self.reset();
                    let prompt = ChatMessage::environment(
                        "Context reached its critical limit. A new course has been started; continue the task with a clean context.",
                    );
                    return RemediationAction::ContinueWithNewCourse { prompt };
                }
                self.critical_countdown_remaining = Some(remaining - 1);
                let guide = ChatMessage::environment(format!(
                    "Context is critically large. {remaining} generation(s) remain before a new course is force-started — wrap up now."
                ));
                RemediationAction::Proceed { guide: Some(guide) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(limit: u64) -> ModelConfig {
        ModelConfig { context_length: Some(limit), ..Default::default() }
    }

    #[test]
    fn healthy_below_optimal() {
        let snap = compute_snapshot(1000, &model(200_000));
        assert_eq!(snap.level(), Some(ContextHealthLevel::Healthy));
    }

    #[test]
    fn caution_above_optimal_below_critical() {
        let snap = compute_snapshot(150_000, &model(200_000));
        assert_eq!(snap.level(), Some(ContextHealthLevel::Caution));
    }

    #[test]
    fn critical_above_ninety_percent() {
        let snap = compute_snapshot(190_000, &model(200_000));
        assert_eq!(snap.level(), Some(ContextHealthLevel::Critical));
    }

    #[test]
    fn critical_countdown_decrements_then_forces_new_course() {
        let mut fsm = ContextHealthFsm::new();
        let snap = compute_snapshot(190_000, &model(200_000));
        for expected_remaining in (0..CRITICAL_COUNTDOWN_GENERATIONS).rev() {
            match fsm.remediate(&snap, 10, 1, false) {
                RemediationAction::Proceed { .. } => {
                    assert_eq!(fsm.critical_countdown_remaining, Some(expected_remaining));
                }
                _ => panic!("expected Proceed while countdown > 0"),
            }
        }
        match fsm.remediate(&snap, 10, 1, false) {
            RemediationAction::ContinueWithNewCourse { .. } => {}
            _ => panic!("expected ContinueWithNewCourse once countdown reaches 0"),
        }
        assert!(fsm.critical_countdown_remaining.is_none());
    }

    #[test]
    fn caution_guide_injected_at_cadence_only() {
        let mut fsm = ContextHealthFsm::new();
        let snap = compute_snapshot(150_000, &model(200_000));
        let first = fsm.remediate(&snap, 10, 1, false);
        assert!(matches!(first, RemediationAction::Proceed { guide: Some(_) }));
        let second = fsm.remediate(&snap, 10, 5, false);
        assert!(matches!(second, RemediationAction::Proceed { guide: None }));
        let third = fsm.remediate(&snap, 10, 11, false);
        assert!(matches!(third, RemediationAction::Proceed { guide: Some(_) }));
    }

    #[test]
    fn healthy_after_caution_resets_fsm() {
        let mut fsm = ContextHealthFsm::new();
        let caution = compute_snapshot(150_000, &model(200_000));
        fsm.remediate(&caution, 10, 1, false);
        let healthy = compute_snapshot(1000, &model(200_000));
        fsm.remediate(&healthy, 10, 2, false);
        assert!(fsm.last_caution_guide_injected_at_gen_seq.is_none());
    }
}
