//! Keyword tables, typo correction and question detection.
//!
//! Every router layer (and the legacy router) reads its vocabulary from
//! here so the tables exist exactly once.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ObjectType, OperationKind, ReportType};

// ============================================================================
// Operation keywords
// ============================================================================

pub const OPERATION_KEYWORDS: &[(OperationKind, &[&str])] = &[
    (OperationKind::Create, &["create", "new", "add", "make"]),
    (OperationKind::List, &["list", "show", "display"]),
    (OperationKind::Get, &["get", "view", "details"]),
    (OperationKind::Update, &["update", "edit", "modify", "change", "rename", "set"]),
    (OperationKind::Delete, &["delete", "remove"]),
    (OperationKind::Analyze, &["analyze", "analyse"]),
];

/// Verbs the simple keyword tables cannot express confidently.
pub const PLANNING_VERBS: &[&str] = &[
    "link",
    "unlink",
    "connect",
    "disconnect",
    "associate",
    "attach",
    "detach",
    "compare",
    "analyze",
    "analyse",
    "assess",
];

// ============================================================================
// Typo correction
// ============================================================================

/// Common misspellings → canonical word.
const TYPO_TABLE: &[(&str, &str)] = &[
    ("creat", "create"),
    ("craete", "create"),
    ("crete", "create"),
    ("cretae", "create"),
    ("lsit", "list"),
    ("lits", "list"),
    ("shwo", "show"),
    ("delte", "delete"),
    ("deleet", "delete"),
    ("dleete", "delete"),
    ("remvoe", "remove"),
    ("udpate", "update"),
    ("upadte", "update"),
    ("updtae", "update"),
    ("anaylze", "analyze"),
    ("analize", "analyze"),
    ("lnik", "link"),
    ("linnk", "link"),
    ("comapre", "compare"),
    ("scpoe", "scope"),
    ("scoep", "scope"),
    ("socpe", "scope"),
    ("assset", "asset"),
    ("aseet", "asset"),
    ("asets", "assets"),
    ("perosn", "person"),
    ("peson", "person"),
    ("contorl", "control"),
    ("controll", "control"),
    ("proccess", "process"),
    ("docuemnt", "document"),
    ("incidnet", "incident"),
    ("deskop", "desktop"),
    ("dekstop", "desktop"),
    ("desktpo", "desktop"),
];

/// Apply the typo table token by token, keeping the original casing style
/// (`Deskop` → `Desktop`, `SCPOE` → `SCOPE`). Quoted segments are user data
/// and pass through untouched.
pub fn correct_typos(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut word = String::new();
    let mut closing: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(close) = closing {
            out.push(c);
            let at_boundary = chars.peek().map_or(true, |n| !n.is_alphanumeric());
            if c == close && at_boundary {
                closing = None;
            }
        } else if c.is_alphanumeric() {
            word.push(c);
        } else {
            flush_word(&mut word, &mut out);
            out.push(c);
            if !prev.is_some_and(char::is_alphanumeric) {
                closing = closing_quote(c);
            }
        }
        prev = Some(c);
    }
    flush_word(&mut word, &mut out);
    out
}

fn closing_quote(open: char) -> Option<char> {
    match open {
        '\'' => Some('\''),
        '"' => Some('"'),
        '`' => Some('`'),
        '‘' => Some('’'),
        '“' => Some('”'),
        _ => None,
    }
}

fn flush_word(word: &mut String, out: &mut String) {
    if word.is_empty() {
        return;
    }
    let lower = word.to_lowercase();
    match TYPO_TABLE.iter().find(|(typo, _)| *typo == lower) {
        Some((_, fixed)) => out.push_str(&match_case(word, fixed)),
        None => out.push_str(word),
    }
    word.clear();
}

fn match_case(original: &str, replacement: &str) -> String {
    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() > 1 && letters.iter().all(|c| c.is_uppercase()) {
        return replacement.to_uppercase();
    }
    if original.chars().next().is_some_and(char::is_uppercase) {
        let mut chars = replacement.chars();
        return match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
    }
    replacement.to_string()
}

/// Whether `token` is `keyword`, allowing a single edit for keywords of
/// five or more characters.
pub fn keyword_matches(token: &str, keyword: &str) -> bool {
    if token == keyword {
        return true;
    }
    keyword.len() >= 5
        && token.len() + 1 >= keyword.len()
        && strsim::levenshtein(token, keyword) == 1
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || c == '\''
}

/// Byte ranges of the words in `text`, surrounding apostrophes excluded.
pub fn word_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        match (start, is_word_char(c)) {
            (None, true) => start = Some(i),
            (Some(s), false) => {
                let run = &text[s..i];
                let trimmed = run.trim_matches('\'');
                if !trimmed.is_empty() {
                    let lead = run.len() - run.trim_start_matches('\'').len();
                    spans.push(s + lead..s + lead + trimmed.len());
                }
                start = None;
            }
            _ => {}
        }
    }
    spans
}

/// Lowercased alphanumeric words.
pub fn words(text: &str) -> Vec<String> {
    word_spans(text)
        .into_iter()
        .map(|r| text[r].to_lowercase())
        .collect()
}

/// First operation keyword in the text, with its word index.
pub fn find_operation(text: &str) -> Option<(OperationKind, usize)> {
    let tokens = words(text);
    for (i, token) in tokens.iter().enumerate() {
        for (kind, keywords) in OPERATION_KEYWORDS {
            if keywords.iter().any(|k| keyword_matches(token, k)) {
                return Some((*kind, i));
            }
        }
    }
    None
}

/// First object-type keyword in the text, with its word index.
pub fn find_object_type(text: &str) -> Option<(ObjectType, usize)> {
    words(text)
        .iter()
        .enumerate()
        .find_map(|(i, w)| ObjectType::from_word(w).map(|t| (t, i)))
}

pub fn mentions_planning_verb(text: &str) -> bool {
    let lower = text.to_lowercase();
    words(&lower)
        .iter()
        .any(|w| PLANNING_VERBS.iter().any(|v| keyword_matches(w, v)))
        || lower.contains("part of")
        || lower.contains(" and create ")
        || lower.contains(" and add ")
}

// ============================================================================
// Questions
// ============================================================================

const QUESTION_STARTERS: &[&str] = &[
    "how do", "how can", "how to", "how does", "what is", "what are", "what's", "why",
];

const QUESTION_WORDS: &[&str] = &["how", "what", "why", "which", "who", "when", "where"];

static QUESTION_ALLOW_LIST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^how many subtypes?\b",
        r"^what subtypes?\b",
        r"^which subtypes?\b",
        r"^what (?:is|'s) the .+ (?:asset|scope|person|control|process|document|incident|scenario)? ?(?:type|subtype)\??$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Whether the text reads as a question.
pub fn is_question(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    if lower.ends_with('?') {
        return true;
    }
    if QUESTION_STARTERS.iter().any(|s| lower.starts_with(s)) {
        return true;
    }
    words(&lower)
        .first()
        .is_some_and(|w| QUESTION_WORDS.contains(&w.as_str()))
}

/// Questions that may still reach an operation handler.
pub fn question_allowed(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    QUESTION_ALLOW_LIST.iter().any(|re| re.is_match(&lower))
}

// ============================================================================
// Greetings
// ============================================================================

const GREETINGS: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "hiya",
    "greetings",
    "good morning",
    "good afternoon",
    "good evening",
];

const THANKS: &[&str] = &["thanks", "thank you", "thx", "cheers", "thanks a lot", "thank you very much"];

fn bare(text: &str) -> String {
    text.trim()
        .trim_end_matches(['!', '.', '?', ','])
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn is_greeting(text: &str) -> bool {
    GREETINGS.contains(&bare(text).as_str())
}

pub fn is_thanks(text: &str) -> bool {
    THANKS.contains(&bare(text).as_str())
}

// ============================================================================
// Reports
// ============================================================================

const REPORT_PHRASES: &[(&str, ReportType)] = &[
    ("inventory of assets", ReportType::InventoryOfAssets),
    ("asset inventory", ReportType::InventoryOfAssets),
    ("risk assessment", ReportType::RiskAssessment),
    ("statement of applicability", ReportType::StatementOfApplicability),
    ("soa", ReportType::StatementOfApplicability),
];

/// Report type named in the text, if any.
pub fn find_report_type(text: &str) -> Option<ReportType> {
    let lower = text.to_lowercase();
    let tokens = words(&lower);
    REPORT_PHRASES
        .iter()
        .find(|(phrase, _)| {
            if phrase.contains(' ') {
                lower.contains(phrase)
            } else {
                tokens.iter().any(|t| t == phrase)
            }
        })
        .map(|(_, r)| *r)
}
