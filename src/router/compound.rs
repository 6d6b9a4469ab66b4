//! Splitting of "X, then Y" messages into ordered steps.

use std::sync::LazyLock;

use regex::Regex;

use super::lexicon;

static THEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|;)?\s*\b(?:and\s+)?then\b\s*").unwrap());

/// Ordered steps of a compound message.
///
/// Only splits when every clause starts with an operation or planning
/// verb. "create X and set status" is one step.
pub fn split_steps(text: &str) -> Vec<String> {
    let parts: Vec<String> = THEN_RE
        .split(text)
        .map(|p| p.trim().trim_end_matches(['.', ',']).to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 || !parts.iter().all(|p| is_imperative(p)) {
        return vec![text.trim().to_string()];
    }
    parts
}

fn is_imperative(clause: &str) -> bool {
    let words = lexicon::words(clause);
    let Some(first) = words.first() else {
        return false;
    };
    lexicon::OPERATION_KEYWORDS
        .iter()
        .flat_map(|(_, kws)| kws.iter())
        .chain(lexicon::PLANNING_VERBS.iter())
        .chain(["generate", "assign"].iter())
        .any(|k| lexicon::keyword_matches(first, k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_then() {
        assert_eq!(
            split_steps("create scope Alpha, then create asset Desktop"),
            vec!["create scope Alpha", "create asset Desktop"]
        );
        assert_eq!(
            split_steps("create asset Desktop and then link Desktop to Alpha"),
            vec!["create asset Desktop", "link Desktop to Alpha"]
        );
    }

    #[test]
    fn test_no_split_without_then() {
        assert_eq!(
            split_steps("create scope Alpha and set status active"),
            vec!["create scope Alpha and set status active"]
        );
    }

    #[test]
    fn test_no_split_for_non_imperative_clause() {
        assert_eq!(
            split_steps("create scope Alpha then maybe later"),
            vec!["create scope Alpha then maybe later"]
        );
    }
}
