//! Conversational layers: follow-ups, greetings, subtype questions and
//! plain list requests.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::decision::{DecisionPayload, Handler, Route, RoutingDecision};
use super::lexicon;
use super::{RouteInput, RouteStrategy};
use crate::error::Result;
use crate::resolution::names::clean_reference;
use crate::session::SessionContext;
use crate::types::{ObjectType, Operation, OperationKind};

// ============================================================================
// Follow-up
// ============================================================================

static CONTEXTUAL_DELETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:delete|remove)\s+(?:them|it|those|these|all of them|all of those|everything)\s*[.!]?$")
        .unwrap()
});

static BULK_TYPE_DELETE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:delete|remove)\s+(?:all\s+)?(?:the\s+|my\s+|our\s+)?([a-z]+)\s*[.!]?$").unwrap()
});

/// Answers to an open question, and deletes that refer back to the last list.
pub struct FollowUpStrategy;

#[async_trait]
impl RouteStrategy for FollowUpStrategy {
    fn name(&self) -> &'static str {
        "follow_up"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        if session.has_pending() {
            return Ok(Some(RoutingDecision::new(
                Route::FollowUp,
                Handler::FollowUp,
                1.0,
                DecisionPayload::FollowUp {
                    answer: input.raw.trim().to_string(),
                },
            )));
        }

        if CONTEXTUAL_DELETE_RE.is_match(&input.lower) {
            let Some(last) = &session.last_list else {
                return Ok(None);
            };
            let mut op = Operation::on(OperationKind::Delete, last.object_type).bulk();
            op.params.names = last.items.iter().map(|o| o.name.clone()).collect();
            return Ok(Some(RoutingDecision::operation(Route::FollowUp, 0.95, op)));
        }

        if let Some(caps) = BULK_TYPE_DELETE_RE.captures(&input.lower) {
            let word = &caps[1];
            // plural type word only: "delete asset" without a name is not bulk
            if let Some(object_type) = ObjectType::from_word(word).filter(|t| t.plural() == word || word == "people") {
                let mut op = Operation::on(OperationKind::Delete, object_type).bulk();
                if let Some(last) = session.last_list.as_ref().filter(|l| l.object_type == object_type) {
                    op.params.names = last.items.iter().map(|o| o.name.clone()).collect();
                }
                return Ok(Some(RoutingDecision::operation(Route::FollowUp, 0.95, op)));
            }
        }

        Ok(None)
    }
}

// ============================================================================
// Greeting
// ============================================================================

pub struct GreetingStrategy;

#[async_trait]
impl RouteStrategy for GreetingStrategy {
    fn name(&self) -> &'static str {
        "greeting"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let thanks = lexicon::is_thanks(&input.raw);
        if thanks || lexicon::is_greeting(&input.raw) {
            return Ok(Some(RoutingDecision::new(
                Route::Greeting,
                Handler::Greeting,
                1.0,
                DecisionPayload::Greeting { thanks },
            )));
        }
        Ok(None)
    }
}

// ============================================================================
// Subtype catalog questions
// ============================================================================

static SUBTYPE_QUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:show|list|display|get|what|which|how many|are there)\s+(?:are\s+|the\s+|all\s+|available\s+)*sub-?types?\b(?:\s+(?:of|for|in|are|does|do|available|exist)\b.*|\s+[a-z]+)?\??$",
    )
    .unwrap()
});

/// "show subtypes of scope", "how many subtypes assets".
pub struct SubtypeQueryStrategy;

#[async_trait]
impl RouteStrategy for SubtypeQueryStrategy {
    fn name(&self) -> &'static str {
        "subtype_query"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        if !SUBTYPE_QUERY_RE.is_match(&input.lower) {
            return Ok(None);
        }
        let Some((object_type, _)) = lexicon::find_object_type(&input.lower) else {
            return Ok(None);
        };
        Ok(Some(RoutingDecision::new(
            Route::SubtypeQuery,
            Handler::Subtypes,
            0.95,
            DecisionPayload::Subtypes { object_type },
        )))
    }
}

// ============================================================================
// Subtype-filtered list
// ============================================================================

static SUBTYPE_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:show(?:\s+me)?|list|display|get|view|how many|count)\s+(?:all\s+|the\s+|our\s+|my\s+)*([a-z]+)\s+(?:in|with|of|subtype|sub-type|sub type)\s+(?:subtype\s+|type\s+)?(?:the\s+|our\s+|my\s+)*(.+?)\??$",
    )
    .unwrap()
});

/// "list assets subType IT-System", "show persons in DPO".
pub struct SubtypeListStrategy;

#[async_trait]
impl RouteStrategy for SubtypeListStrategy {
    fn name(&self) -> &'static str {
        "subtype_list"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let Some(caps) = SUBTYPE_LIST_RE.captures(&input.text) else {
            return Ok(None);
        };
        let Some(object_type) = ObjectType::from_word(&caps[1]) else {
            return Ok(None);
        };
        let label = clean_reference(&caps[2]);
        let first_word = label.split_whitespace().next().unwrap_or_default();
        // "assets in scope Alpha" filters by container, not subtype
        if label.is_empty() || ObjectType::from_word(first_word).is_some() {
            return Ok(None);
        }
        let mut op = Operation::on(OperationKind::List, object_type);
        op.params.subtype_filter = Some(label);
        Ok(Some(RoutingDecision::operation(Route::Operation, 0.9, op)))
    }
}

// ============================================================================
// Conversational list
// ============================================================================

static LIST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(?:show(?:\s+me)?|list|display|get|view)\s+(?:all\s+|the\s+|my\s+|our\s+|existing\s+)*([a-z]+)$",
        r"^how many\s+([a-z]+)(?:\s+(?:do we have|are there|exist|we have))?$",
        r"^do we have any\s+([a-z]+)$",
        r"^what about\s+(?:the\s+|our\s+)?([a-z]+)$",
        r"^what\s+([a-z]+)\s+do we have$",
        r"^which\s+([a-z]+)\s+(?:do we have|exist|are there)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// "show all scopes", "how many persons", "what about controls".
pub struct ConversationalListStrategy;

#[async_trait]
impl RouteStrategy for ConversationalListStrategy {
    fn name(&self) -> &'static str {
        "conversational_list"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        if input.lower.contains("subtype") {
            return Ok(None);
        }
        let text = input.lower.trim().trim_end_matches(['?', '.', '!']).trim();
        for re in LIST_PATTERNS.iter() {
            if let Some(caps) = re.captures(text) {
                if let Some(object_type) = ObjectType::from_word(&caps[1]) {
                    return Ok(Some(RoutingDecision::operation(
                        Route::Operation,
                        0.95,
                        Operation::on(OperationKind::List, object_type),
                    )));
                }
            }
        }
        Ok(None)
    }
}
