//! Name normalization, comparison tiers and candidate-name extraction.
//!
//! Every component that compares user-typed names against platform names
//! goes through this module so the rules cannot drift between callers.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::types::ObjectType;

// ============================================================================
// Normalization
// ============================================================================

/// Lowercase, NFKC-fold, strip surrounding quotes, fold `_`/`-` to spaces and
/// collapse whitespace. Cache keys and tier-2 comparisons use this form.
pub fn normalize_name(raw: &str) -> String {
    let folded: String = strip_quotes(raw.trim())
        .nfkc()
        .flat_map(char::to_lowercase)
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove one layer of matching surrounding quotes.
pub fn strip_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    for (open, close) in [('\'', '\''), ('"', '"'), ('‘', '’'), ('“', '”'), ('`', '`')] {
        if trimmed.len() >= 2 && trimmed.starts_with(open) && trimmed.ends_with(close) {
            let inner = &trimmed[open.len_utf8()..trimmed.len() - close.len_utf8()];
            return inner.trim();
        }
    }
    trimmed.trim_matches(|c| c == '\'' || c == '"')
}

fn singular(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

fn token_set(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().map(singular).collect()
}

// ============================================================================
// Comparison tiers
// ============================================================================

/// Strength of a name match, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatchTier {
    /// Case-insensitive equality, quotes ignored.
    Exact,
    /// Equality after separator folding.
    Normalized,
    /// One normalized name contains the other.
    Substring,
    /// Token sets overlap by at least the configured fraction of the smaller set.
    TokenOverlap,
}

/// Compare a query against a candidate name; `None` when no tier matches.
pub fn compare_names(query: &str, candidate: &str, overlap_threshold: f32) -> Option<NameMatchTier> {
    let q = strip_quotes(query);
    let c = strip_quotes(candidate);
    if q.is_empty() || c.is_empty() {
        return None;
    }
    if q.to_lowercase() == c.to_lowercase() {
        return Some(NameMatchTier::Exact);
    }

    let qn = normalize_name(q);
    let cn = normalize_name(c);
    if qn == cn {
        return Some(NameMatchTier::Normalized);
    }
    if qn.contains(&cn) || cn.contains(&qn) {
        return Some(NameMatchTier::Substring);
    }

    let qt = token_set(&qn);
    let ct = token_set(&cn);
    let smaller = qt.len().min(ct.len());
    if smaller == 0 {
        return None;
    }
    let shared = qt.intersection(&ct).count();
    if shared as f32 >= overlap_threshold * smaller as f32 {
        Some(NameMatchTier::TokenOverlap)
    } else {
        None
    }
}

/// Pick the best candidate: the strongest tier wins, and within a tier the
/// first candidate in iteration order wins. A weaker match found earlier is
/// never preferred over a stronger one found later.
pub fn best_match<'a, T>(
    query: &str,
    candidates: &'a [T],
    name_of: impl Fn(&T) -> &str,
    overlap_threshold: f32,
) -> Option<(&'a T, NameMatchTier)> {
    let mut best: Option<(&'a T, NameMatchTier)> = None;
    for candidate in candidates {
        let Some(tier) = compare_names(query, name_of(candidate), overlap_threshold) else {
            continue;
        };
        if tier == NameMatchTier::Exact {
            return Some((candidate, tier));
        }
        match best {
            Some((_, current)) if current <= tier => {}
            _ => best = Some((candidate, tier)),
        }
    }
    best
}

// ============================================================================
// Canonical identifiers
// ============================================================================

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12})\b").unwrap()
});

/// First canonical identifier embedded in the text, lowercased.
pub fn find_canonical_id(text: &str) -> Option<String> {
    UUID_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Whether the whole (trimmed) text is a canonical identifier.
pub fn is_canonical_id(text: &str) -> bool {
    let t = strip_quotes(text);
    find_canonical_id(t).is_some_and(|id| id.len() == t.len())
}

// ============================================================================
// Candidate-name extraction
// ============================================================================

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'“‘`]([^"'”’`]+)["'”’`]"#).unwrap());

static NAMED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:named|called)\s+(.+)$").unwrap());

/// Words that end a name when they follow it ("Alpha description to X").
const FIELD_STOP_WORDS: &[&str] = &[
    "description",
    "status",
    "subtype",
    "name",
    "abbreviation",
    "abbr",
    "field",
    "value",
    "to",
    "is",
    "as",
    "change",
    "set",
    "with",
    "from",
    "in",
];

const LEADING_FILLERS: &[&str] = &["the", "a", "an", "our", "my", "this", "that", "new"];

/// Extract the object name an utterance refers to.
///
/// Tried in order: a quoted segment, text after `named`/`called`, and the
/// free text following the object-type keyword. Trailing field words and
/// leading fillers are stripped.
pub fn extract_name(utterance: &str, object_type: Option<ObjectType>) -> Option<String> {
    if let Some(caps) = QUOTED_RE.captures(utterance) {
        let name = caps[1].trim();
        if !name.is_empty() {
            return Some(name.to_string());
        }
    }

    if let Some(caps) = NAMED_RE.captures(utterance) {
        let name = clean_reference(&caps[1]);
        if !name.is_empty() {
            return Some(name);
        }
    }

    let object_type = object_type?;
    let pattern = format!(
        r"(?i)\b(?:{}|{})\b\s+(.+)$",
        regex::escape(object_type.name()),
        regex::escape(object_type.plural())
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(utterance)?;
    let name = clean_reference(&caps[1]);
    (!name.is_empty()).then_some(name)
}

/// Strip quotes, leading fillers, trailing field words, a trailing type
/// word and trailing punctuation from a free-text reference.
pub fn clean_reference(raw: &str) -> String {
    let unquoted = strip_quotes(raw.trim().trim_end_matches(['.', ',', ';', ':', '!', '?']));
    let mut tokens: Vec<&str> = unquoted.split_whitespace().collect();

    while tokens.len() > 1 && LEADING_FILLERS.contains(&tokens[0].to_lowercase().as_str()) {
        tokens.remove(0);
    }

    if let Some(cut) = tokens
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, t)| FIELD_STOP_WORDS.contains(&t.to_lowercase().as_str()))
        .map(|(i, _)| i)
    {
        tokens.truncate(cut);
    }

    if tokens.len() > 1 {
        if let Some(last) = tokens.last() {
            if ObjectType::from_word(last).is_some() {
                tokens.pop();
            }
        }
    }

    strip_quotes(&tokens.join(" "))
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  'Project_Phoenix' "), "project phoenix");
        assert_eq!(normalize_name("IT-System"), "it system");
        assert_eq!(normalize_name("Main   Firewall"), "main firewall");
    }

    #[test]
    fn test_compare_tiers() {
        assert_eq!(compare_names("desktop", "Desktop", 0.8), Some(NameMatchTier::Exact));
        assert_eq!(
            compare_names("project-phoenix", "Project Phoenix", 0.8),
            Some(NameMatchTier::Normalized)
        );
        assert_eq!(
            compare_names("Phoenix", "Project Phoenix", 0.8),
            Some(NameMatchTier::Substring)
        );
        assert_eq!(
            compare_names("Databases Server Room", "Server Room Database", 0.8),
            Some(NameMatchTier::TokenOverlap)
        );
        assert_eq!(compare_names("Alpha", "Beta", 0.8), None);
    }

    #[test]
    fn test_token_overlap_threshold_is_configurable() {
        assert_eq!(compare_names("alpha beta gamma", "alpha beta delta", 0.8), None);
        assert_eq!(
            compare_names("alpha beta gamma", "alpha beta delta", 0.6),
            Some(NameMatchTier::TokenOverlap)
        );
    }

    #[test]
    fn test_best_match_prefers_stronger_tier_found_later() {
        let names = vec!["Project Phoenix Legacy", "Phoenix"];
        let (hit, tier) = best_match("phoenix", &names, |n| n, 0.8).unwrap();
        assert_eq!(*hit, "Phoenix");
        assert_eq!(tier, NameMatchTier::Exact);
    }

    #[test]
    fn test_best_match_first_iterated_wins_within_tier() {
        let names = vec!["Phoenix One", "Phoenix Two"];
        let (hit, tier) = best_match("phoenix", &names, |n| n, 0.8).unwrap();
        assert_eq!(*hit, "Phoenix One");
        assert_eq!(tier, NameMatchTier::Substring);
    }

    #[test]
    fn test_canonical_id_detection() {
        let id = "3f2b8c1e-9a4d-4e2f-8b7a-1c2d3e4f5a6b";
        assert!(is_canonical_id(id));
        assert!(is_canonical_id(&format!("'{}'", id.to_uppercase())));
        assert!(!is_canonical_id(&format!("scope {}", id)));
        assert_eq!(
            find_canonical_id(&format!("delete scope {}", id)).as_deref(),
            Some(id)
        );
    }

    #[test]
    fn test_extract_quoted_name() {
        assert_eq!(
            extract_name("create scope named 'Project Phoenix'", Some(ObjectType::Scope)).as_deref(),
            Some("Project Phoenix")
        );
    }

    #[test]
    fn test_extract_named_without_quotes() {
        assert_eq!(
            extract_name("create asset called Main Firewall", Some(ObjectType::Asset)).as_deref(),
            Some("Main Firewall")
        );
    }

    #[test]
    fn test_extract_after_type_keyword_strips_field_words() {
        assert_eq!(
            extract_name("update scope Alpha description to new text", Some(ObjectType::Scope))
                .as_deref(),
            Some("Alpha")
        );
        assert_eq!(
            extract_name("delete the asset Main Firewall.", Some(ObjectType::Asset)).as_deref(),
            Some("Main Firewall")
        );
    }

    #[test]
    fn test_clean_reference_drops_trailing_type_word() {
        assert_eq!(clean_reference("the DESKTOP asset"), "DESKTOP");
        assert_eq!(clean_reference("'SCOPE1'"), "SCOPE1");
    }
}
