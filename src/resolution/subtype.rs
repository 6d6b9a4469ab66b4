//! Subtype matcher.
//!
//! Maps a user-supplied category label onto the canonical label a container
//! actually defines. First match wins:
//!
//! 1. Exact case-insensitive equality
//! 2. Alias table (dashboard names, abbreviations)
//! 3. Equality after stripping `SCP_`-style prefixes and folding separators
//! 4. Token-subset containment
//! 5. Keyword patterns ("server" implies an IT-system)
//!
//! A `None` from [`SubtypeMatcher::match_label`] means "ask the user". It is
//! never a licence to pick an arbitrary option.

use std::collections::HashSet;

use crate::types::ObjectType;

// ============================================================================
// Tables
// ============================================================================

/// Curated synonyms → canonical label.
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("controller", "SCP_Controller"),
    ("controllers", "SCP_Controller"),
    ("processor", "SCP_Processor"),
    ("processors", "SCP_Processor"),
    ("scopes", "SCP_Scope"),
    ("joint controller", "SCP_JointController"),
    ("joint controllers", "SCP_JointController"),
    ("joint controllership", "SCP_JointController"),
    ("joint controllerships", "SCP_JointController"),
    ("responsible body", "SCP_ResponsibleBody"),
    ("responsible bodies", "SCP_ResponsibleBody"),
    ("datatype", "AST_Datatype"),
    ("datatypes", "AST_Datatype"),
    ("data type", "AST_Datatype"),
    ("data types", "AST_Datatype"),
    ("it system", "AST_IT-System"),
    ("it systems", "AST_IT-System"),
    ("itsystem", "AST_IT-System"),
    ("application", "AST_Application"),
    ("applications", "AST_Application"),
    ("persons", "PER_Person"),
    ("data protection officer", "PER_DataProtectionOfficer"),
    ("data protection officers", "PER_DataProtectionOfficer"),
    ("dpo", "PER_DataProtectionOfficer"),
    ("dpos", "PER_DataProtectionOfficer"),
    ("tom", "CTL_TOM"),
    ("toms", "CTL_TOM"),
    ("technical and organizational measure", "CTL_TOM"),
    ("technical and organizational measures", "CTL_TOM"),
    ("dpia", "PRO_DPIA"),
    ("data protection impact assessment", "PRO_DPIA"),
    ("data transfer", "PRO_DataTransfer"),
    ("data transfers", "PRO_DataTransfer"),
    ("data processing", "PRO_DataProcessing"),
    ("data processings", "PRO_DataProcessing"),
    ("data privacy incident", "INC_Incident"),
    ("data privacy incidents", "INC_Incident"),
    ("contract", "DOC_Contract"),
    ("contracts", "DOC_Contract"),
    ("documents", "DOC_Document"),
];

/// Container prefixes stripped before comparison.
const KNOWN_PREFIXES: &[&str] = &[
    "scp_", "ast_", "per_", "ctl_", "pro_", "inc_", "doc_", "scn_",
];

/// Keyword → compact fragment of the canonical label it implies.
///
/// Order matters: the more specific DPO keywords must beat "person", and
/// the generic "data" keyword sits last.
const KEYWORD_PATTERNS: &[(&[&str], &str)] = &[
    (
        &["dpo", "data protection", "privacy officer", "gdpr officer"],
        "dataprotectionofficer",
    ),
    (&["employee", "staff", "user"], "person"),
    (
        &["it system", "server", "infrastructure", "network", "system"],
        "itsystem",
    ),
    (&["app", "software", "program"], "application"),
    (&["data type", "data", "information", "dataset"], "datatype"),
];

// ============================================================================
// Label normalization
// ============================================================================

/// Split camel case, strip a known prefix, fold separators, lowercase.
///
/// `PER_DataProtectionOfficer` → `data protection officer`,
/// `AST_IT-System` → `it system`.
pub fn normalize_label(label: &str) -> String {
    let trimmed = label.trim();
    let lower = trimmed.to_lowercase();
    let without_prefix = KNOWN_PREFIXES
        .iter()
        .find(|p| lower.starts_with(*p))
        .map(|p| &trimmed[p.len()..])
        .unwrap_or(trimmed);

    let mut spaced = String::with_capacity(without_prefix.len() + 4);
    let mut prev: Option<char> = None;
    for c in without_prefix.chars() {
        if c.is_uppercase() && prev.is_some_and(|p| p.is_lowercase()) {
            spaced.push(' ');
        }
        spaced.push(if c == '_' || c == '-' { ' ' } else { c });
        prev = Some(c);
    }
    spaced
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized label with every space removed.
fn compact(label: &str) -> String {
    normalize_label(label).replace(' ', "")
}

fn singular(token: &str) -> &str {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        &token[..token.len() - 1]
    } else {
        token
    }
}

fn tokens(normalized: &str) -> HashSet<&str> {
    normalized.split_whitespace().map(singular).collect()
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack
        .match_indices(phrase)
        .any(|(start, _)| {
            let end = start + phrase.len();
            let before_ok = haystack[..start]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric());
            let after_ok = haystack[end..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric());
            before_ok && after_ok
        })
}

/// Human-readable form of a canonical label (`SCP_JointController` → `Joint Controller`).
pub fn display_label(label: &str) -> String {
    normalize_label(label)
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Matcher
// ============================================================================

/// Outcome of choosing a subtype for an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtypeChoice {
    /// The catalog is empty; proceed without a subtype.
    NoCatalog,
    /// A single canonical label was chosen.
    Selected(String),
    /// No label was given and several exist; ask which one.
    Ambiguous { options: Vec<String> },
    /// A label was given but matched nothing; ask again.
    Unmatched { provided: String, options: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct SubtypeMatcher {
    /// (normalized alias, canonical label)
    aliases: Vec<(String, String)>,
}

impl Default for SubtypeMatcher {
    fn default() -> Self {
        Self {
            aliases: BUILTIN_ALIASES
                .iter()
                .map(|(a, c)| (normalize_label(a), c.to_string()))
                .collect(),
        }
    }
}

impl SubtypeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or override an alias.
    pub fn with_alias(mut self, alias: &str, canonical: &str) -> Self {
        let key = normalize_label(alias);
        self.aliases.retain(|(a, _)| *a != key);
        self.aliases.push((key, canonical.to_string()));
        self
    }

    /// Every alias that maps to `canonical`.
    pub fn aliases_of(&self, canonical: &str) -> Vec<&str> {
        self.aliases
            .iter()
            .filter(|(_, c)| c.eq_ignore_ascii_case(canonical))
            .map(|(a, _)| a.as_str())
            .collect()
    }

    /// Every (alias, canonical) pair.
    pub fn alias_table(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, c)| (a.as_str(), c.as_str()))
    }

    fn alias_target(&self, provided: &str) -> Option<&str> {
        let key = normalize_label(provided);
        self.aliases
            .iter()
            .find(|(a, _)| *a == key)
            .map(|(_, c)| c.as_str())
    }

    /// Match a provided label against the available canonical labels.
    pub fn match_label(&self, provided: &str, available: &[String]) -> Option<String> {
        let provided = provided.trim().trim_matches(|c| c == '\'' || c == '"');
        if provided.is_empty() || available.is_empty() {
            return None;
        }

        // 1. exact
        if let Some(hit) = available.iter().find(|a| a.eq_ignore_ascii_case(provided)) {
            return Some(hit.clone());
        }

        // 2. alias
        if let Some(target) = self.alias_target(provided) {
            let target_compact = compact(target);
            if let Some(hit) = available
                .iter()
                .find(|a| a.eq_ignore_ascii_case(target) || compact(a) == target_compact)
            {
                return Some(hit.clone());
            }
        }

        // 3. normalized equality
        let provided_norm = normalize_label(provided);
        let provided_compact = provided_norm.replace(' ', "");
        if let Some(hit) = available.iter().find(|a| {
            let n = normalize_label(a);
            n == provided_norm || n.replace(' ', "") == provided_compact
        }) {
            return Some(hit.clone());
        }

        // 4. token-subset containment
        let provided_tokens = tokens(&provided_norm);
        if let Some(hit) = available.iter().find(|a| {
            let norm = normalize_label(a);
            let label_tokens = tokens(&norm);
            if provided_tokens.is_empty() || label_tokens.is_empty() {
                return false;
            }
            let (shorter, longer) = if provided_tokens.len() <= label_tokens.len() {
                (&provided_tokens, &label_tokens)
            } else {
                (&label_tokens, &provided_tokens)
            };
            shorter.is_subset(longer)
        }) {
            return Some(hit.clone());
        }

        // 5. keyword patterns
        let lower = provided.to_lowercase().replace(['-', '_'], " ");
        for (keywords, fragment) in KEYWORD_PATTERNS {
            if keywords.iter().any(|k| contains_phrase(&lower, k)) {
                if let Some(hit) = available.iter().find(|a| compact(a).contains(fragment)) {
                    return Some(hit.clone());
                }
            }
        }

        None
    }

    /// Decide the subtype for an operation, applying auto-selection.
    ///
    /// Without explicit input, zero options means "no subtype" and exactly
    /// one option is used. Explicit input that matches nothing is never
    /// replaced by a guess.
    pub fn choose(&self, provided: Option<&str>, available: &[String]) -> SubtypeChoice {
        if available.is_empty() {
            return SubtypeChoice::NoCatalog;
        }
        match provided.map(str::trim).filter(|p| !p.is_empty()) {
            Some(label) => match self.match_label(label, available) {
                Some(hit) => SubtypeChoice::Selected(hit),
                None => SubtypeChoice::Unmatched {
                    provided: label.to_string(),
                    options: available.to_vec(),
                },
            },
            None if available.len() == 1 => SubtypeChoice::Selected(available[0].clone()),
            None => SubtypeChoice::Ambiguous {
                options: available.to_vec(),
            },
        }
    }

    /// If `word` names a subtype rather than an object type, the type that owns it.
    ///
    /// "Controllers" → (`Scope`, `SCP_Controller`). Words that are object
    /// types themselves ("persons", "documents") return `None`.
    pub fn owning_type(&self, word: &str) -> Option<(ObjectType, String)> {
        if ObjectType::from_word(word).is_some() {
            return None;
        }
        let canonical = self.alias_target(word)?;
        let upper = canonical.to_uppercase();
        let object_type = ObjectType::ALL
            .iter()
            .copied()
            .find(|t| upper.starts_with(t.subtype_prefix()))?;
        Some((object_type, canonical.to_string()))
    }
}

/// Parse a follow-up answer to a "which option?" question.
///
/// Accepts a 1-based number, an exact label (case-insensitive), a label in
/// normalized form, or a partial match in either direction. Returns the
/// zero-based index.
pub fn parse_selection(answer: &str, options: &[String]) -> Option<usize> {
    let answer = answer.trim().trim_end_matches(['.', '!']);
    if answer.is_empty() || options.is_empty() {
        return None;
    }

    if let Ok(n) = answer.parse::<usize>() {
        return (1..=options.len()).contains(&n).then(|| n - 1);
    }

    if let Some(i) = options.iter().position(|o| o.eq_ignore_ascii_case(answer)) {
        return Some(i);
    }

    let answer_norm = normalize_label(answer);
    if let Some(i) = options
        .iter()
        .position(|o| normalize_label(o) == answer_norm)
    {
        return Some(i);
    }

    options.iter().position(|o| {
        let o_norm = normalize_label(o);
        o_norm.contains(&answer_norm) || answer_norm.contains(&o_norm)
    })
}
