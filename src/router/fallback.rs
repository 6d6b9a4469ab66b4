//! Last layers of the chain: deterministic relationship patterns for when
//! no model is reachable, knowledge questions, and chat.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::decision::{DecisionPayload, Handler, Route, RoutingDecision};
use super::lexicon;
use super::patterns::{infer_type_from_name, parse_typed_reference, split_relationship};
use super::{RouteInput, RouteStrategy};
use crate::error::Result;
use crate::session::SessionContext;
use crate::types::{ObjectReference, ObjectType, Operation, OperationKind};

static ANALYZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:analy[sz]e|assess|evaluate)\s+(.+?)[.!]?$").unwrap()
});

/// Type of one side: explicit word, then a hint inside the name, then `default`.
fn side(raw: &str, default: ObjectType) -> ObjectReference {
    let (explicit, name) = parse_typed_reference(raw);
    let object_type = explicit
        .or_else(|| infer_type_from_name(&name))
        .unwrap_or(default);
    ObjectReference::named(object_type, name)
}

/// Curated link/compare/analyze phrasings that work without a model.
pub struct DeterministicFallbackStrategy;

impl DeterministicFallbackStrategy {
    fn parse(text: &str) -> Option<Operation> {
        if let Some((kind, left, right)) = split_relationship(text) {
            let source = side(&left, ObjectType::Asset);
            // a bare target name is taken to be the container
            let target_default = match kind {
                OperationKind::Compare => source.object_type,
                _ => ObjectType::Scope,
            };
            let target = side(&right, target_default);
            if source.display_name.is_empty() || target.display_name.is_empty() {
                return None;
            }
            return Some(
                Operation::new(kind, Some(source.object_type))
                    .with_source(source)
                    .with_target(target),
            );
        }

        let c = ANALYZE_RE.captures(text)?;
        let target = side(&c[1], ObjectType::Asset);
        if target.display_name.is_empty() {
            return None;
        }
        Some(Operation::on(OperationKind::Analyze, target.object_type).with_name(target.display_name))
    }
}

#[async_trait]
impl RouteStrategy for DeterministicFallbackStrategy {
    fn name(&self) -> &'static str {
        "deterministic_fallback"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        if lexicon::is_question(&input.lower) {
            return Ok(None);
        }
        Ok(Self::parse(&input.text)
            .map(|op| RoutingDecision::operation(Route::DeterministicFallback, 0.75, op)))
    }
}

const KNOWLEDGE_TERMS: &[&str] = &[
    "iso 27001",
    "iso27001",
    "iso 27002",
    "gdpr",
    "dsgvo",
    "annex a",
    "isms",
    "risk treatment",
    "statement of applicability",
    "bsi",
    "compliance",
];

/// Knowledge questions about the standards and the platform.
pub struct KnowledgeStrategy;

#[async_trait]
impl RouteStrategy for KnowledgeStrategy {
    fn name(&self) -> &'static str {
        "fallback_knowledge"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let topical = KNOWLEDGE_TERMS.iter().any(|t| input.lower.contains(t))
            || lexicon::find_object_type(&input.lower).is_some();
        if !(lexicon::is_question(&input.lower) || topical) {
            return Ok(None);
        }
        Ok(Some(RoutingDecision::new(
            Route::FallbackKnowledge,
            Handler::Knowledge,
            0.7,
            DecisionPayload::Knowledge {
                question: input.text.clone(),
            },
        )))
    }
}

pub struct ChatStrategy;

#[async_trait]
impl RouteStrategy for ChatStrategy {
    fn name(&self) -> &'static str {
        "llm_chat"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        Ok(Some(RoutingDecision::new(
            Route::LlmChat,
            Handler::Chat,
            0.5,
            DecisionPayload::Chat {
                message: input.raw.clone(),
            },
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fallback(text: &str) -> Option<RoutingDecision> {
        DeterministicFallbackStrategy
            .evaluate(&RouteInput::new(&text.into()), &SessionContext::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_link_with_typo_defaults_target_to_scope() {
        let d = fallback("link Deskop to SCOPE1").await.unwrap();
        assert_eq!(d.route, Route::DeterministicFallback);
        assert_eq!(d.confidence, 0.75);
        let op = &d.operations()[0];
        assert_eq!(op.kind, OperationKind::Link);
        let source = op.params.source.as_ref().unwrap();
        let target = op.params.target.as_ref().unwrap();
        assert_eq!(source.display_name, "Desktop");
        assert_eq!(source.object_type, ObjectType::Asset);
        assert_eq!(target.display_name, "SCOPE1");
        assert_eq!(target.object_type, ObjectType::Scope);
    }

    #[tokio::test]
    async fn test_part_of_and_compare() {
        let d = fallback("make person Ruby part of Alpha").await.unwrap();
        let op = &d.operations()[0];
        assert_eq!(op.params.source.as_ref().unwrap().object_type, ObjectType::Person);
        assert_eq!(op.params.target.as_ref().unwrap().object_type, ObjectType::Scope);

        let d = fallback("compare scope Alpha and Beta").await.unwrap();
        let op = &d.operations()[0];
        assert_eq!(op.kind, OperationKind::Compare);
        assert_eq!(op.params.target.as_ref().unwrap().object_type, ObjectType::Scope);
    }

    #[tokio::test]
    async fn test_analyze() {
        let d = fallback("analyze Mail Server").await.unwrap();
        let op = &d.operations()[0];
        assert_eq!(op.kind, OperationKind::Analyze);
        assert_eq!(op.object_type, Some(ObjectType::Asset));
        assert_eq!(op.params.name.as_deref(), Some("Mail Server"));
    }

    #[tokio::test]
    async fn test_questions_and_chatter_abstain() {
        assert!(fallback("how do I link an asset to a scope?").await.is_none());
        assert!(fallback("nice weather today").await.is_none());
    }

    #[tokio::test]
    async fn test_knowledge() {
        let session = SessionContext::new();
        let d = KnowledgeStrategy
            .evaluate(&RouteInput::new(&"What does ISO 27001 require?".into()), &session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.route, Route::FallbackKnowledge);
        assert_eq!(d.confidence, 0.7);
        assert!(KnowledgeStrategy
            .evaluate(&RouteInput::new(&"nice weather today".into()), &session)
            .await
            .unwrap()
            .is_none());
    }
}
