//! Parsing of semi-structured model output.
//!
//! A strict parse is tried first. Only when it fails do the recovery steps
//! run, in order: a ```` ```json ```` fence, any fence, the first balanced
//! `{...}` in the text, and finally a best-effort close of a truncated
//! object. Whatever is recovered is checked against the required fields
//! before it is deserialized into the target shape.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StructuredOutputError {
    #[error("no JSON object found in model output")]
    NoObject,

    #[error("model output is missing required field '{0}'")]
    MissingField(String),

    #[error("model output does not match the expected shape: {0}")]
    Shape(String),
}

/// Which step produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Strict,
    JsonFence,
    Fence,
    BraceScan,
    ClosedTruncation,
}

/// Parse `text` into `T`, requiring `required` top-level fields.
pub fn parse_structured<T: DeserializeOwned>(
    text: &str,
    required: &[&str],
) -> Result<T, StructuredOutputError> {
    parse_with_recovery(text, required).map(|(value, _)| value)
}

/// Like [`parse_structured`] but also reports the recovery step used.
pub fn parse_with_recovery<T: DeserializeOwned>(
    text: &str,
    required: &[&str],
) -> Result<(T, Recovery), StructuredOutputError> {
    let (value, recovery) = extract_object(text).ok_or(StructuredOutputError::NoObject)?;
    for field in required {
        if value.get(field).is_none_or(Value::is_null) {
            return Err(StructuredOutputError::MissingField(field.to_string()));
        }
    }
    let parsed = serde_json::from_value(value)
        .map_err(|e| StructuredOutputError::Shape(e.to_string()))?;
    if recovery != Recovery::Strict {
        tracing::debug!(?recovery, "Recovered structured output");
    }
    Ok((parsed, recovery))
}

/// First JSON object recoverable from the text.
pub fn extract_object(text: &str) -> Option<(Value, Recovery)> {
    let trimmed = text.trim();

    if let Some(v) = as_object(trimmed) {
        return Some((v, Recovery::Strict));
    }

    if let Some(inner) = trimmed
        .split("```json")
        .nth(1)
        .and_then(|s| s.split("```").next())
    {
        if let Some(v) = as_object(inner.trim()) {
            return Some((v, Recovery::JsonFence));
        }
    }

    if let Some(inner) = trimmed.split("```").nth(1) {
        if let Some(v) = as_object(inner.trim()) {
            return Some((v, Recovery::Fence));
        }
    }

    let start = trimmed.find('{')?;
    let candidate = &trimmed[start..];
    match scan_balanced(candidate) {
        Scan::Balanced(end) => {
            if let Some(v) = as_object(&candidate[..end]) {
                return Some((v, Recovery::BraceScan));
            }
            None
        }
        Scan::Truncated { depth, in_string } => {
            let mut repaired = candidate.trim_end().trim_end_matches(',').to_string();
            if in_string {
                repaired.push('"');
            }
            repaired.push_str(&"}".repeat(depth));
            as_object(&repaired).map(|v| (v, Recovery::ClosedTruncation))
        }
    }
}

fn as_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(Value::is_object)
}

enum Scan {
    /// Byte offset one past the closing brace.
    Balanced(usize),
    Truncated { depth: usize, in_string: bool },
}

/// Walk from an opening brace, tracking depth outside string literals.
fn scan_balanced(text: &str) -> Scan {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Scan::Balanced(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    Scan::Truncated { depth, in_string }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Step {
        thought: String,
        action: String,
    }

    #[test]
    fn test_strict_parse() {
        let (step, how): (Step, _) =
            parse_with_recovery(r#"{"thought": "t", "action": "complete"}"#, &["action"]).unwrap();
        assert_eq!(step.action, "complete");
        assert_eq!(how, Recovery::Strict);
    }

    #[test]
    fn test_json_fence() {
        let text = "Here you go:\n```json\n{\"thought\": \"t\", \"action\": \"use_tool\"}\n```\nDone.";
        let (_, how): (Step, _) = parse_with_recovery(text, &["action"]).unwrap();
        assert_eq!(how, Recovery::JsonFence);
    }

    #[test]
    fn test_brace_scan_ignores_braces_in_strings() {
        let text = r#"Sure. {"thought": "use {braces} here", "action": "complete"} trailing {junk"#;
        let (step, how): (Step, _) = parse_with_recovery(text, &["action"]).unwrap();
        assert_eq!(step.thought, "use {braces} here");
        assert_eq!(how, Recovery::BraceScan);
    }

    #[test]
    fn test_truncated_object_is_closed() {
        let text = r#"{"thought": "planning", "action": "complete", "result": "half"#;
        let (value, how) = extract_object(text).unwrap();
        assert_eq!(how, Recovery::ClosedTruncation);
        assert_eq!(value["result"], "half");
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = parse_structured::<Step>(r#"{"thought": "t"}"#, &["action"]).unwrap_err();
        assert_eq!(err, StructuredOutputError::MissingField("action".into()));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(
            parse_structured::<Step>("I cannot help with that.", &[]).unwrap_err(),
            StructuredOutputError::NoObject
        );
    }
}
