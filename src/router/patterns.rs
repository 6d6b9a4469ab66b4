//! Pattern layers: direct keyword dispatch and the structured command forms
//! (role assignment, multi-create, create-and-link, reports).

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::decision::{DecisionPayload, Handler, Route, RoutingDecision};
use super::lexicon;
use super::{RouteInput, RouteStrategy};
use crate::error::Result;
use crate::resolution::names::{clean_reference, extract_name, strip_quotes};
use crate::resolution::SubtypeMatcher;
use crate::session::SessionContext;
use crate::types::{ObjectReference, ObjectType, Operation, OperationKind, ReportType};

// ============================================================================
// Shared parsing helpers
// ============================================================================

/// Words in an object name that hint at its type.
const NAME_TYPE_HINTS: &[(ObjectType, &[&str])] = &[
    (
        ObjectType::Asset,
        &[
            "server", "laptop", "desktop", "firewall", "database", "application", "app", "system",
            "router", "workstation", "pc", "device", "phone",
        ],
    ),
    (ObjectType::Document, &["policy", "contract", "procedure", "guideline"]),
    (ObjectType::Person, &["officer", "dpo", "manager", "employee", "ciso"]),
    (ObjectType::Process, &["processing", "workflow"]),
    (ObjectType::Incident, &["breach", "outage"]),
    (ObjectType::Scenario, &["threat"]),
    (ObjectType::Control, &["measure", "tom", "safeguard"]),
];

/// Guess an object type from words inside its name ("Mail Server" → asset).
pub fn infer_type_from_name(name: &str) -> Option<ObjectType> {
    let words = lexicon::words(name);
    NAME_TYPE_HINTS
        .iter()
        .find(|(_, hints)| words.iter().any(|w| hints.contains(&w.as_str())))
        .map(|(t, _)| *t)
}

/// Split "asset Desktop", "Desktop asset", "the 'Desktop' asset" into an
/// optional explicit type and the bare name.
pub fn parse_typed_reference(text: &str) -> (Option<ObjectType>, String) {
    let trimmed = text.trim().trim_end_matches(['.', '?', '!', ',']);
    let mut tokens: Vec<&str> = trimmed.split_whitespace().collect();
    while tokens.len() > 1 && matches!(tokens[0].to_lowercase().as_str(), "the" | "a" | "an" | "our" | "my") {
        tokens.remove(0);
    }
    if tokens.len() > 1 {
        if let Some(t) = ObjectType::from_word(tokens[0]) {
            return (Some(t), strip_quotes(&tokens[1..].join(" ")).to_string());
        }
        if let Some(t) = tokens.last().and_then(|w| ObjectType::from_word(w)) {
            return (
                Some(t),
                strip_quotes(&tokens[..tokens.len() - 1].join(" ")).to_string(),
            );
        }
    }
    (None, strip_quotes(&tokens.join(" ")).to_string())
}

static SUBTYPE_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\bsub-?type\s+(?:to\s+|of\s+|=\s*)?['"]?([^'"]+?)['"]?(?:\s+(?:and|with|description|named|called|abbreviation)\b|[.,;]|$)"#,
    )
    .unwrap()
});

static DESCRIPTION_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bdescription\s+(?:to\s+|is\s+|as\s+|of\s+|=\s*)?['"]?(.+?)['"]?\s*$"#).unwrap()
});

static ABBREVIATION_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:abbreviation|abbr)\s+(?:to\s+|is\s+|as\s+|=\s*)?['"]?([^'"\s,]+)['"]?"#).unwrap()
});

static FIELD_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(status|owner|confidentiality|integrity|availability|priority)\s+(?:to|=|is|as)\s+['"]?(.+?)['"]?\s*$"#,
    )
    .unwrap()
});

static NEW_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bname\s+(?:to|=|as)\s+['"]?(.+?)['"]?\s*$"#).unwrap()
});

static RENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^rename\s+(?:the\s+)?([a-z]+)\s+['"]?(.+?)['"]?\s+(?:to|as)\s+['"]?(.+?)['"]?\s*$"#).unwrap()
});

static ASSET_TYPE_QUESTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^what(?:'s|\s+is)\s+the\s+['"]?(.+?)['"]?\s+(scope|asset|control|person|process|document|incident|scenario)\s+(?:sub-?)?type\??$"#,
    )
    .unwrap()
});

static ADD_TO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:add|put|assign)\s+(.+?)\s+(?:to|into)\s+(.+?)$").unwrap()
});

static PART_OF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^make\s+(.+?)\s+(?:a\s+)?part\s+of\s+(.+?)$").unwrap()
});

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:link|connect|associate|attach)\s+(.+?)\s+(?:to|with)\s+(.+?)$").unwrap()
});

static UNLINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:unlink|disconnect|detach|remove)\s+(.+?)\s+from\s+(.+?)$").unwrap()
});

static COMPARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^compare\s+(.+?)\s+(?:and|with|to|vs\.?|versus)\s+(.+?)$").unwrap()
});

static ANALYZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:analy[sz]e|assess|review)\s+(.+?)$").unwrap());

/// Whether the text uses one of the link-like phrasings.
pub fn is_relationship_phrase(text: &str) -> bool {
    ADD_TO_RE.is_match(text)
        || PART_OF_RE.is_match(text)
        || LINK_RE.is_match(text)
        || UNLINK_RE.is_match(text)
}

/// Split a two-sided phrase into its operation and the raw left/right sides.
pub fn split_relationship(text: &str) -> Option<(OperationKind, String, String)> {
    let text = text.trim().trim_end_matches(['.', '!', '?']);
    let (kind, c) = if let Some(c) = UNLINK_RE.captures(text) {
        (OperationKind::Unlink, c)
    } else if let Some(c) = LINK_RE.captures(text) {
        (OperationKind::Link, c)
    } else if let Some(c) = ADD_TO_RE.captures(text) {
        (OperationKind::Link, c)
    } else if let Some(c) = PART_OF_RE.captures(text) {
        (OperationKind::Link, c)
    } else if let Some(c) = COMPARE_RE.captures(text) {
        (OperationKind::Compare, c)
    } else {
        return None;
    };
    Some((kind, c[1].trim().to_string(), c[2].trim().to_string()))
}

/// Two-sided forms where both sides carry an explicit type.
fn parse_typed_relationship(text: &str) -> Option<Operation> {
    let (kind, left, right) = split_relationship(text)?;

    let (Some(source_type), source_name) = parse_typed_reference(&left) else {
        return None;
    };
    let (Some(target_type), target_name) = parse_typed_reference(&right) else {
        return None;
    };
    if source_name.is_empty() || target_name.is_empty() {
        return None;
    }
    Some(
        Operation::new(kind, Some(source_type))
            .with_source(ObjectReference::named(source_type, source_name))
            .with_target(ObjectReference::named(target_type, target_name)),
    )
}

/// Subtype named right after the create verb ("create Controllers named X").
///
/// Returns the owning type, the canonical subtype and the index of the
/// first word after the subtype phrase.
fn subtype_first(
    tokens: &[String],
    op_idx: usize,
    matcher: &SubtypeMatcher,
) -> Option<(ObjectType, String, usize)> {
    let mut start = op_idx + 1;
    while tokens
        .get(start)
        .is_some_and(|t| matches!(t.as_str(), "a" | "an" | "new" | "the"))
    {
        start += 1;
    }
    for width in (1..=4).rev() {
        if start + width > tokens.len() {
            continue;
        }
        let phrase = tokens[start..start + width].join(" ");
        if width == 1 && ObjectType::from_word(&phrase).is_some() {
            return None;
        }
        if let Some((owner, subtype)) = matcher.owning_type(&phrase) {
            return Some((owner, subtype, start + width));
        }
    }
    None
}

/// Cleaned free text from the `skip`-th word on, counting words the way
/// [`lexicon::words`] does.
fn words_after(text: &str, skip: usize) -> Option<String> {
    let span = lexicon::word_spans(text).into_iter().nth(skip)?;
    let cleaned = clean_reference(&text[span.start..]);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Fill subtype, description, abbreviation and field updates.
fn extract_params(op: &mut Operation, text: &str) {
    if op.params.subtype.is_none() {
        if let Some(c) = SUBTYPE_PARAM_RE.captures(text) {
            op.params.subtype = Some(c[1].trim().to_string());
        }
    }
    if let Some(c) = DESCRIPTION_PARAM_RE.captures(text) {
        op.params.description = Some(c[1].trim().to_string());
    }
    if let Some(c) = ABBREVIATION_PARAM_RE.captures(text) {
        op.params.abbreviation = Some(c[1].trim().to_string());
    }
    if op.kind == OperationKind::Update {
        if let Some(c) = FIELD_PARAM_RE.captures(text) {
            op.params
                .fields
                .insert(c[1].to_lowercase(), c[2].trim().to_string());
        }
        if let Some(c) = NEW_NAME_RE.captures(text) {
            op.params
                .fields
                .insert("new_name".to_string(), c[1].trim().to_string());
        }
    }
}

/// Parse a single imperative clause into an operation.
///
/// Returns the operation and whether the parse was strong (operation
/// keyword followed by an explicit object type).
pub fn parse_clause(text: &str, matcher: &SubtypeMatcher) -> Option<(Operation, bool)> {
    let text = text.trim().trim_end_matches(['.', '!']);
    let lower = text.to_lowercase();

    if let Some(c) = RENAME_RE.captures(text) {
        let object_type = ObjectType::from_word(&c[1])?;
        let mut op = Operation::on(OperationKind::Update, object_type).with_name(c[2].trim());
        op.params
            .fields
            .insert("new_name".to_string(), c[3].trim().to_string());
        return Some((op, true));
    }

    if let Some(c) = ASSET_TYPE_QUESTION_RE.captures(text) {
        let object_type = ObjectType::from_word(&c[2])?;
        let mut op = Operation::on(OperationKind::Get, object_type).with_name(strip_quotes(&c[1]));
        op.params.return_subtype = true;
        return Some((op, true));
    }

    if let Some(c) = ANALYZE_RE.captures(text) {
        let (object_type, name) = parse_typed_reference(&c[1]);
        let object_type = object_type?;
        return Some((Operation::on(OperationKind::Analyze, object_type).with_name(name), true));
    }

    let tokens = lexicon::words(&lower);
    let (mut kind, op_idx) = lexicon::find_operation(&lower)?;

    if kind == OperationKind::Create {
        if let Some((owner, subtype, name_idx)) = subtype_first(&tokens, op_idx, matcher) {
            let mut op = Operation::on(OperationKind::Create, owner).with_subtype(subtype);
            op.params.subtype_first = true;
            // "create DPO Ruby": the name follows the subtype phrase
            op.params.name = extract_name(text, None).or_else(|| words_after(text, name_idx));
            extract_params(&mut op, text);
            return Some((op, true));
        }
    }

    let found_type = lexicon::find_object_type(&lower);
    let strong = found_type.is_some_and(|(_, type_idx)| type_idx > op_idx);
    let object_type = found_type.map(|(t, _)| t);

    let name = extract_name(text, object_type)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            let untyped = object_type.is_none() && kind != OperationKind::List;
            untyped.then(|| words_after(text, op_idx + 1)).flatten()
        });

    // "show asset Desktop" is a lookup, "show assets" a listing
    if kind == OperationKind::List && name.is_some() {
        if let Some((t, idx)) = found_type {
            if tokens.get(idx).is_some_and(|w| w == t.name()) {
                kind = OperationKind::Get;
            }
        }
    }

    let mut op = Operation::new(kind, object_type);
    if kind != OperationKind::List {
        op.params.name = name;
    }
    extract_params(&mut op, text);
    Some((op, strong))
}

// ============================================================================
// Direct pattern dispatch
// ============================================================================

/// Keyword dispatch. The strong variant requires an operation keyword
/// followed by an object type; the weak variant accepts anything with an
/// operation keyword and runs after the classifier.
pub struct PatternStrategy {
    matcher: SubtypeMatcher,
    weak: bool,
}

impl PatternStrategy {
    pub fn strong(matcher: SubtypeMatcher) -> Self {
        Self { matcher, weak: false }
    }

    pub fn weak(matcher: SubtypeMatcher) -> Self {
        Self { matcher, weak: true }
    }
}

#[async_trait]
impl RouteStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        if self.weak {
            "pattern_weak"
        } else {
            "pattern_strong"
        }
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let question = lexicon::is_question(&input.lower);

        if is_relationship_phrase(&input.text) || COMPARE_RE.is_match(&input.text) {
            if self.weak {
                return Ok(None);
            }
            return Ok(parse_typed_relationship(&input.text)
                .map(|op| RoutingDecision::operation(Route::Operation, 0.85, op)));
        }
        if lexicon::find_report_type(&input.lower).is_some() {
            return Ok(None);
        }

        let Some((op, strong)) = parse_clause(&input.text, &self.matcher) else {
            return Ok(None);
        };
        if question && !lexicon::question_allowed(&input.lower) {
            if op.kind.is_mutating() {
                tracing::debug!(kind = %op.kind, "Question excluded from mutating operation");
            }
            return Ok(None);
        }

        match (self.weak, strong) {
            (false, true) => Ok(Some(RoutingDecision::operation(Route::Operation, 0.9, op))),
            (false, false) => Ok(None),
            (true, _) => Ok(Some(RoutingDecision::operation(Route::Operation, 0.5, op))),
        }
    }
}

// ============================================================================
// Role / subtype assignment
// ============================================================================

static ROLE_PATTERNS: LazyLock<Vec<(Regex, [usize; 3])>> = LazyLock::new(|| {
    // capture order: [subtype, type, name]
    vec![
        (
            Regex::new(
                r#"(?i)^(?:set|change)\s+(?:the\s+)?(?:sub-?type|role)\s+(?:to\s+)?['"]?(.+?)['"]?\s+(?:for|of|on)\s+(?:the\s+)?([a-z]+)\s+['"]?(.+?)['"]?$"#,
            )
            .unwrap(),
            [1, 2, 3],
        ),
        (
            Regex::new(
                r#"(?i)^assign\s+(?:the\s+)?(?:role|sub-?type)\s+(?:of\s+)?['"]?(.+?)['"]?\s+to\s+(?:the\s+)?([a-z]+)\s+['"]?(.+?)['"]?$"#,
            )
            .unwrap(),
            [1, 2, 3],
        ),
        (
            Regex::new(
                r#"(?i)^make\s+(?:the\s+)?([a-z]+)\s+['"]?(.+?)['"]?\s+(?:a|an|the)\s+(.+?)$"#,
            )
            .unwrap(),
            [3, 1, 2],
        ),
    ]
});

/// "set subtype Controller for the scope Alpha", "make person Ruby a DPO".
pub struct RoleAssignmentStrategy;

#[async_trait]
impl RouteStrategy for RoleAssignmentStrategy {
    fn name(&self) -> &'static str {
        "role_assignment"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        if lexicon::find_operation(&input.lower)
            .is_some_and(|(k, i)| k == OperationKind::List && i == 0)
            || input.lower.starts_with("how many")
            || input.lower.contains("part of")
        {
            return Ok(None);
        }
        let text = input.text.trim().trim_end_matches(['.', '!']);
        for (re, [s, t, n]) in ROLE_PATTERNS.iter() {
            let Some(c) = re.captures(text) else { continue };
            let Some(object_type) = ObjectType::from_word(&c[*t]) else {
                continue;
            };
            let subtype = strip_quotes(&c[*s]).to_string();
            let name = strip_quotes(&c[*n]).to_string();
            if subtype.is_empty() || name.is_empty() {
                continue;
            }
            let op = Operation::on(OperationKind::Update, object_type)
                .with_name(name)
                .with_subtype(subtype);
            return Ok(Some(RoutingDecision::operation(Route::Operation, 0.9, op)));
        }
        Ok(None)
    }
}

// ============================================================================
// Multi-create
// ============================================================================

static COUNT_CREATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:create|add|make)\s+(\d+)\s+(?:new\s+)?([a-z\-]+)\b(.*)$").unwrap()
});

static COUNT_SUBTYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^\s*(?:in|as|of|with\s+sub-?type|with\s+type|of\s+type|of\s+sub-?type)\s+['"]?([a-z0-9_\- ]+?)['"]?(?:\s+and\b.*)?$"#,
    )
    .unwrap()
});

static NAME_LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(\[]([^\)\]]+)[\)\]]").unwrap());

static NAMES_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnames?d?\s*:?\s+(.+)$").unwrap());

fn split_names(list: &str) -> Vec<String> {
    list.split([',', ';'])
        .flat_map(|part| part.split(" and "))
        .map(|n| strip_quotes(n.trim()).to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

/// "create 5 persons in DPO", "create scope 'A' and create person 'B'".
pub struct MultiCreateStrategy {
    matcher: SubtypeMatcher,
}

impl MultiCreateStrategy {
    pub fn new(matcher: SubtypeMatcher) -> Self {
        Self { matcher }
    }

    fn counted(&self, text: &str) -> Option<Operation> {
        let c = COUNT_CREATE_RE.captures(text)?;
        let count: usize = c[1].parse().ok()?;
        let word = &c[2];
        let rest = &c[3];

        let (object_type, mut subtype) = match ObjectType::from_word(word) {
            Some(t) => (t, None),
            None => {
                let singular = word.strip_suffix('s').unwrap_or(word);
                let (t, s) = self
                    .matcher
                    .owning_type(word)
                    .or_else(|| self.matcher.owning_type(singular))?;
                (t, Some(s))
            }
        };

        let mut names = Vec::new();
        if let Some(list) = NAME_LIST_RE.captures(rest) {
            names = split_names(&list[1]);
        } else if let Some(tail) = NAMES_TAIL_RE.captures(rest) {
            names = split_names(&tail[1]);
        }

        if subtype.is_none() {
            let before_names = rest.split(" and ").next().unwrap_or(rest);
            if let Some(s) = COUNT_SUBTYPE_RE.captures(before_names) {
                subtype = Some(s[1].trim().to_string());
            }
        }

        let mut op = Operation::on(OperationKind::Create, object_type);
        op.params.count = Some(count.max(names.len()));
        op.params.names = names;
        op.params.subtype = subtype;
        Some(op)
    }

    fn joined(&self, text: &str) -> Option<Vec<Operation>> {
        let mut clauses: Vec<String> = Vec::new();
        for segment in text.split(" and ") {
            let starts_with_create = lexicon::words(segment)
                .first()
                .is_some_and(|w| ["create", "add", "make"].contains(&w.as_str()));
            match clauses.last_mut() {
                Some(last) if !starts_with_create => {
                    last.push_str(" and ");
                    last.push_str(segment);
                }
                _ => clauses.push(segment.trim().to_string()),
            }
        }
        if clauses.len() < 2 {
            return None;
        }
        clauses
            .iter()
            .map(|clause| {
                parse_clause(clause, &self.matcher)
                    .filter(|(op, strong)| *strong && op.kind == OperationKind::Create)
                    .map(|(op, _)| op)
            })
            .collect()
    }
}

#[async_trait]
impl RouteStrategy for MultiCreateStrategy {
    fn name(&self) -> &'static str {
        "multi_create"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let starts_with_create = lexicon::find_operation(&input.lower)
            .is_some_and(|(k, i)| k == OperationKind::Create && i == 0);
        if !starts_with_create || lexicon::is_question(&input.lower) {
            return Ok(None);
        }
        if let Some(op) = self.counted(&input.text) {
            return Ok(Some(RoutingDecision::new(
                Route::MultiOperation,
                Handler::Operation,
                0.9,
                DecisionPayload::Operations {
                    operations: vec![op],
                },
            )));
        }
        if let Some(ops) = self.joined(&input.text) {
            return Ok(Some(RoutingDecision::plan(Route::MultiOperation, 0.9, ops)));
        }
        Ok(None)
    }
}

// ============================================================================
// Create and link
// ============================================================================

static CREATE_AND_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^((?:create|add|make)\s+.+?)\s+and\s+(?:link|connect|associate|attach|add)\s+(?:it|this|that|them)\s+(?:with|to|into)\s+(.+?)$",
    )
    .unwrap()
});

/// "create scope named 'X' and link it with 'Y' asset".
pub struct CreateAndLinkStrategy {
    matcher: SubtypeMatcher,
}

impl CreateAndLinkStrategy {
    pub fn new(matcher: SubtypeMatcher) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl RouteStrategy for CreateAndLinkStrategy {
    fn name(&self) -> &'static str {
        "create_and_link"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let text = input.text.trim().trim_end_matches(['.', '!']);
        let Some(c) = CREATE_AND_LINK_RE.captures(text) else {
            return Ok(None);
        };
        let Some((create, _)) = parse_clause(&c[1], &self.matcher)
            .filter(|(op, _)| op.kind == OperationKind::Create)
        else {
            return Ok(None);
        };
        let (Some(created_type), Some(created_name)) = (create.object_type, create.params.name.clone())
        else {
            return Ok(None);
        };

        let (target_type, target_name) = parse_typed_reference(&c[2]);
        if target_name.is_empty() {
            return Ok(None);
        }
        let target_type = target_type
            .or_else(|| infer_type_from_name(&target_name))
            .unwrap_or(ObjectType::Scope);

        let link = Operation::new(OperationKind::Link, Some(created_type))
            .with_source(ObjectReference::named(created_type, created_name))
            .with_target(ObjectReference::named(target_type, target_name));
        Ok(Some(RoutingDecision::plan(
            Route::CreateAndLink,
            0.9,
            vec![create, link],
        )))
    }
}

// ============================================================================
// Reports
// ============================================================================

static REPORT_VERB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:generate|create|make|produce|run|build|prepare|export|report)\b").unwrap()
});

static REPORT_SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:for|on|of)\s+(?:the\s+)?scope\s+['"]?(.+?)['"]?\s*$|\bfor\s+(?:the\s+)?['"]?(.+?)['"]?\s+scope\s*$"#)
        .unwrap()
});

/// Inventory of assets, risk assessment, statement of applicability.
pub struct ReportStrategy;

impl ReportStrategy {
    fn parse(text: &str) -> Option<(ReportType, Option<String>)> {
        let report_type = lexicon::find_report_type(text)?;
        if !REPORT_VERB_RE.is_match(text) {
            return None;
        }
        let scope = REPORT_SCOPE_RE
            .captures(text.trim().trim_end_matches(['.', '!', '?']))
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());
        Some((report_type, scope))
    }
}

#[async_trait]
impl RouteStrategy for ReportStrategy {
    fn name(&self) -> &'static str {
        "report_generation"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let Some((report_type, scope)) = Self::parse(&input.text) else {
            return Ok(None);
        };
        let mut op = Operation::on(OperationKind::GenerateReport, ObjectType::Scope);
        op.params.report_type = Some(report_type);
        op.params.target = scope.map(|s| ObjectReference::named(ObjectType::Scope, s));
        Ok(Some(RoutingDecision::operation(Route::ReportGeneration, 0.9, op)))
    }
}
