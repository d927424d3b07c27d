use std::path::Path;

/// Outcome of reloading Diligence Push text: either the
/// controller is explicitly disabled for this root (empty file / empty
/// body after frontmatter strip), or there's text to inject — either the
/// operator's own file or the built-in fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiligenceText {
    Disabled,
    Text(String),
}

/// Strips a leading `---\n...\n---` YAML frontmatter block if present,
/// returning the remaining body: strip-prefix `---`, find the closing
/// `\n---`, take everything after it.
fn strip_frontmatter(raw: &str) -> &str {
    let rest = raw.trim_start_matches('\n');
    if let Some(after_open) = rest.strip_prefix("---") {
        if let Some(close) = after_open.find("\n---") {
            return after_open[close + 4..].trim_start_matches('\n');
        }
    }
    rest
}

/// Reloads Diligence Push text: tries
/// `.minds/diligence.<lang>.md` then `.minds/diligence.md`; an existing
/// file whose body is empty after frontmatter strip explicitly disables
/// the controller; if neither file is readable, fall back to
/// `default_text`.
pub async fn load_diligence_text(minds_dir: &Path, lang: Option<&str>, default_text: &str) -> DiligenceText {
    let mut candidates = Vec::new();
    if let Some(lang) = lang {
        candidates.push(minds_dir.join(format!("diligence.{lang}.md")));
    }
    candidates.push(minds_dir.join("diligence.md"));

    for path in candidates {
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let body = strip_frontmatter(&raw).trim();
                return if body.is_empty() { DiligenceText::Disabled } else { DiligenceText::Text(body.to_string()) };
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(_) => continue,
        }
    }
    DiligenceText::Text(default_text.to_string())
}
