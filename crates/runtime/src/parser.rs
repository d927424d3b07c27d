//! A default, deliberately simple tellask stream parser: *a*
//! parser, not *the* parser — the exact teammate-mention grammar is out of
//! scope. Recognizes headline lines starting with one
//! or more `@name` mentions, an optional `!tellaskSession <id>` directive,
//! and the body text up to the next headline.

use dominds_core::collab::tellask::{TellaskCall, TellaskParser, TellaskValidation};
use dominds_core::ids::CallId;
use regex::Regex;

/// `@name` mention, anchored so `@self`/`@human`/`@dominds` all parse the
/// same way as any team member id.
fn mention_regex() -> Regex {
    Regex::new(r"@([A-Za-z_][A-Za-z0-9_-]*)").expect("valid regex")
}

fn session_regex() -> Regex {
    Regex::new(r"!tellaskSession\s+([A-Za-z][A-Za-z0-9_-]*(?:\.[A-Za-z][A-Za-z0-9_-]*)*)").expect("valid regex")
}

/// A headline is any line whose first non-whitespace character starts an
/// `@mention`.
fn is_headline(line: &str) -> bool {
    line.trim_start().starts_with('@')
}

pub struct RegexTellaskParser {
    buffer: String,
    calls: Vec<TellaskCall>,
    finalized: bool,
}

impl Default for RegexTellaskParser {
    fn default() -> Self {
        Self { buffer: String::new(), calls: Vec::new(), finalized: false }
    }
}

impl RegexTellaskParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_buffer(&mut self) {
        let mentions = mention_regex();
        let session = session_regex();
        let lines: Vec<&str> = self.buffer.lines().collect();

        let mut i = 0;
        while i < lines.len() {
            if !is_headline(lines[i]) {
                i += 1;
                continue;
            }
            let headline = lines[i].trim().to_string();
            let mut j = i + 1;
            let mut body_lines = Vec::new();
            while j < lines.len() && !is_headline(lines[j]) {
                body_lines.push(lines[j]);
                j += 1;
            }
            let body = body_lines.join("\n").trim().to_string();

            let mention_names: Vec<String> = mentions.captures_iter(&headline).map(|c| c[1].to_string()).collect();
            let session_id = session.captures(&headline).map(|c| c[1].to_string());
            // `!tellaskSession` may also appear on the first body line.
            let session_id = session_id.or_else(|| body_lines.first().and_then(|l| session.captures(l).map(|c| c[1].to_string())));

            let validation = if mention_names.is_empty() {
                TellaskValidation::Malformed { reason: "headline has no recognizable @mention".to_string() }
            } else {
                TellaskValidation::Valid { first_mention: true }
            };

            self.calls.push(TellaskCall {
                call_id: CallId::new(),
                tellask_head: headline,
                body: if let Some(sid) = &session_id { format!("!tellaskSession {sid}\n{body}") } else { body },
                validation,
            });
            i = j;
        }
    }
}

impl TellaskParser for RegexTellaskParser {
    fn take_upstream_chunk(&mut self, text: &str) -> String {
        // Markdown rendered immediately is everything outside a headline
        // block; for this reference parser we conservatively only render
        // text once finalize() has run the full pass, so streaming chunks
        // are buffered and nothing is surfaced to the caller mid-stream.
        self.buffer.push_str(text);
        String::new()
    }

    fn finalize(&mut self) {
        if !self.finalized {
            self.parse_buffer();
            self.finalized = true;
        }
    }

    fn collected_calls(&self) -> &[TellaskCall] {
        &self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_target_headline_parses_body() {
        let mut parser = RegexTellaskParser::new();
        parser.take_upstream_chunk("@alice please review this\nfor the payments bug");
        parser.finalize();
        let calls = parser.collected_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tellask_head, "@alice please review this");
        assert_eq!(calls[0].body, "for the payments bug");
        assert!(matches!(calls[0].validation, TellaskValidation::Valid { .. }));
    }

    #[test]
    fn tellask_session_directive_is_captured() {
        let mut parser = RegexTellaskParser::new();
        parser.take_upstream_chunk("@bob !tellaskSession plan.v1\ndraft the outline");
        parser.finalize();
        let calls = parser.collected_calls();
        assert!(calls[0].body.starts_with("!tellaskSession plan.v1"));
    }

    #[test]
    fn multi_target_fanout_headline_mentions_both() {
        let mut parser = RegexTellaskParser::new();
        parser.take_upstream_chunk("@alice @bob please weigh in\non the release plan");
        parser.finalize();
        let calls = parser.collected_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].tellask_head.contains("@alice") && calls[0].tellask_head.contains("@bob"));
    }

    #[test]
    fn bare_at_sign_is_malformed() {
        let mut parser = RegexTellaskParser::new();
        parser.take_upstream_chunk("@ this is not a real mention\nbody text");
        parser.finalize();
        let calls = parser.collected_calls();
        assert!(matches!(calls[0].validation, TellaskValidation::Malformed { .. }));
    }

    #[test]
    fn distinct_calls_get_distinct_call_ids() {
        let mut parser = RegexTellaskParser::new();
        parser.take_upstream_chunk("@alice first\nbody one\n@bob second\nbody two");
        parser.finalize();
        let calls = parser.collected_calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].call_id, calls[1].call_id);
    }
}
