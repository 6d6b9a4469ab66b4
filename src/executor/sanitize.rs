//! Thought filtering.
//!
//! Models sometimes echo their instructions inside the `thought` field.
//! Sentences carrying one of the signature phrases are dropped before a
//! thought is surfaced or logged.

const SIGNATURE_PHRASES: &[&str] = &[
    "system prompt",
    "you are an",
    "you are a helpful",
    "my instructions",
    "your instructions",
    "i was instructed",
    "i am instructed",
    "respond with json",
    "response format",
    "available tools:",
    "do not reveal",
    "as an ai",
];

const LEADING_PREFIXES: &[&str] = &["system:", "instructions:", "instruction:"];

/// Remove leaked instruction text from a thought and cap its length.
pub fn sanitize_thought(thought: &str, limit: usize) -> String {
    let mut text = thought.trim();
    loop {
        let lower = text.to_lowercase();
        let Some(prefix) = LEADING_PREFIXES.iter().find(|p| lower.starts_with(*p)) else {
            break;
        };
        text = text.get(prefix.len()..).unwrap_or_default().trim_start();
    }

    let kept: Vec<&str> = sentences(text)
        .into_iter()
        .filter(|s| {
            let lower = s.to_lowercase();
            !SIGNATURE_PHRASES.iter().any(|p| lower.contains(p))
        })
        .collect();
    let joined = kept.join(" ");
    truncate_chars(joined.trim(), limit)
}

/// Split after `.`, `!`, `?` and newlines, keeping the terminator.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = i + c.len_utf8();
            let s = text[start..end].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Character-safe truncation with an ellipsis marker.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drops_leaked_sentences() {
        let thought = "I need the scope id first. You are an ISMS assistant that must respond with JSON. Then I can link.";
        assert_eq!(
            sanitize_thought(thought, 500),
            "I need the scope id first. Then I can link."
        );
    }

    #[test]
    fn test_strips_prefixes() {
        assert_eq!(
            sanitize_thought("System: Instructions: look up asset Desktop", 500),
            "look up asset Desktop"
        );
    }

    #[test]
    fn test_truncation_is_char_safe() {
        let out = truncate_chars("ääääää", 3);
        assert_eq!(out, "äää...");
    }
}
