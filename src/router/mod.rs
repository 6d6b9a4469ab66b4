//! Layered intent router.
//!
//! An utterance is offered to an ordered list of [`RouteStrategy`]s; each
//! returns a decision or "no opinion" and the first decision wins. The
//! standard chain is:
//!
//! ```text
//!  follow-up ─ greeting ─ subtype query ─ subtype list ─ conversational list
//!      │
//!  role assignment ─ multi-create ─ create-and-link ─ direct patterns ─ reports
//!      │
//!  classifier ─ weak patterns ─ semantic parse ─ deterministic fallback
//!      │
//!  knowledge ─ chat
//! ```
//!
//! Messages joining imperative clauses with "then" are split and each step
//! routed on its own. Every decision carrying a mutating operation is
//! screened for destructive bulk requests before it leaves the router.

pub mod classifier;
pub mod compound;
pub mod conversational;
pub mod decision;
pub mod fallback;
pub mod legacy;
pub mod lexicon;
pub mod patterns;
pub mod safety;
pub mod semantic;

use std::sync::Arc;

use async_trait::async_trait;
use isms_llm::LanguageModel;
use tracing::debug;

pub use classifier::{Classification, ClassifierStrategy, IntentClassifier, IntentLabel};
pub use decision::{DecisionPayload, Handler, Route, RoutingDecision};
pub use legacy::LegacyRouter;
pub use safety::{SafetyAssessment, SafetyVerdict};

use crate::config::RouterConfig;
use crate::error::Result;
use crate::resolution::SubtypeMatcher;
use crate::session::SessionContext;
use crate::types::{ConversationContext, Utterance};

/// Anything that turns an utterance into a routing decision.
#[async_trait]
pub trait Router: Send + Sync {
    fn name(&self) -> &'static str;

    async fn route(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
    ) -> Result<RoutingDecision>;
}

/// Normalized view of an utterance shared by every strategy.
#[derive(Debug, Clone)]
pub struct RouteInput {
    /// As typed.
    pub raw: String,
    /// Trimmed and typo-corrected outside quoted segments.
    pub text: String,
    /// `text`, lowercased.
    pub lower: String,
    pub context: ConversationContext,
}

impl RouteInput {
    pub fn new(utterance: &Utterance) -> Self {
        Self::from_text(&utterance.text, utterance.context.clone())
    }

    pub fn from_text(raw: &str, context: ConversationContext) -> Self {
        let text = lexicon::correct_typos(raw.trim());
        let lower = text.to_lowercase();
        Self {
            raw: raw.to_string(),
            text,
            lower,
            context,
        }
    }
}

/// One link of the chain.
#[async_trait]
pub trait RouteStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "no opinion"; the next strategy is asked.
    async fn evaluate(
        &self,
        input: &RouteInput,
        session: &SessionContext,
    ) -> Result<Option<RoutingDecision>>;
}

/// The layered router.
pub struct IntentRouter {
    strategies: Vec<Arc<dyn RouteStrategy>>,
}

impl IntentRouter {
    /// Router over an explicit chain.
    pub fn with_strategies(strategies: Vec<Arc<dyn RouteStrategy>>) -> Self {
        Self { strategies }
    }

    /// The standard chain. Without a model, the classifier runs on patterns
    /// only and the semantic parse abstains.
    pub fn standard(
        matcher: SubtypeMatcher,
        model: Option<Arc<dyn LanguageModel>>,
        config: &RouterConfig,
    ) -> Self {
        let classifier = Arc::new(IntentClassifier::new(
            model.clone(),
            config.classifier_threshold,
            config.classifier_cache_capacity,
        ));
        Self::with_strategies(vec![
            Arc::new(conversational::FollowUpStrategy),
            Arc::new(conversational::GreetingStrategy),
            Arc::new(conversational::SubtypeQueryStrategy),
            Arc::new(conversational::SubtypeListStrategy),
            Arc::new(conversational::ConversationalListStrategy),
            Arc::new(patterns::RoleAssignmentStrategy),
            Arc::new(patterns::MultiCreateStrategy::new(matcher.clone())),
            Arc::new(patterns::CreateAndLinkStrategy::new(matcher.clone())),
            Arc::new(patterns::PatternStrategy::strong(matcher.clone())),
            Arc::new(patterns::ReportStrategy),
            Arc::new(ClassifierStrategy::new(
                classifier,
                config.classifier_override_threshold,
            )),
            Arc::new(patterns::PatternStrategy::weak(matcher)),
            Arc::new(semantic::SemanticParseStrategy::new(model)),
            Arc::new(fallback::DeterministicFallbackStrategy),
            Arc::new(fallback::KnowledgeStrategy),
            Arc::new(fallback::ChatStrategy),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run the chain once over a single input.
    pub async fn decide(
        &self,
        input: &RouteInput,
        session: &SessionContext,
    ) -> Result<RoutingDecision> {
        for strategy in &self.strategies {
            if let Some(decision) = strategy.evaluate(input, session).await? {
                debug!(
                    strategy = strategy.name(),
                    decision = %decision.describe(),
                    "Routing decision"
                );
                return Ok(decision);
            }
            debug!(strategy = strategy.name(), "No opinion");
        }
        Ok(RoutingDecision::new(
            Route::LlmChat,
            Handler::Chat,
            0.5,
            DecisionPayload::Chat {
                message: input.raw.clone(),
            },
        ))
    }

    /// Route each "then"-separated step; `None` unless every step yields operations.
    async fn route_steps(
        &self,
        steps: &[String],
        context: &ConversationContext,
        session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let mut operations = Vec::new();
        let mut confidence: f32 = 1.0;
        for step in steps {
            let input = RouteInput::from_text(step, context.clone());
            let decision = self.decide(&input, session).await?;
            if !decision.has_operations() {
                debug!(step = %step, route = %decision.route, "Step did not map to an operation");
                return Ok(None);
            }
            confidence = confidence.min(decision.confidence);
            operations.extend(decision.operations().iter().cloned());
        }
        Ok(Some(RoutingDecision::plan(
            Route::MultiOperation,
            confidence,
            operations,
        )))
    }
}

/// Attach a safety assessment when a mutating decision needs confirmation.
pub fn screen(mut decision: RoutingDecision, message: &str) -> RoutingDecision {
    if !decision.operations().iter().any(|op| op.kind.is_mutating()) {
        return decision;
    }
    let assessment = safety::assess(message);
    if !assessment.is_safe() {
        tracing::info!(
            verdict = ?assessment.verdict,
            terms = ?assessment.matched_terms,
            "Destructive request held for confirmation"
        );
        decision.handler = Handler::Confirmation;
        decision.safety = Some(assessment);
    }
    decision
}

#[async_trait]
impl Router for IntentRouter {
    fn name(&self) -> &'static str {
        "layered"
    }

    async fn route(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
    ) -> Result<RoutingDecision> {
        let session: &SessionContext = session;
        let input = RouteInput::new(utterance);

        if !session.has_pending() {
            let steps = compound::split_steps(&input.text);
            if steps.len() > 1 {
                if let Some(decision) = self.route_steps(&steps, &input.context, session).await? {
                    debug!(steps = steps.len(), "Routed multi-step message");
                    return Ok(screen(decision, &input.raw));
                }
            }
        }

        let decision = self.decide(&input, session).await?;
        Ok(screen(decision, &input.raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_chain_order() {
        let router = IntentRouter::standard(SubtypeMatcher::new(), None, &RouterConfig::default());
        let names = router.strategy_names();
        assert_eq!(names.first(), Some(&"follow_up"));
        assert_eq!(names.last(), Some(&"llm_chat"));
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("pattern_strong") < pos("intent_classifier"));
        assert!(pos("intent_classifier") < pos("pattern_weak"));
        assert!(pos("semantic_parse") < pos("deterministic_fallback"));
        assert!(pos("deterministic_fallback") < pos("fallback_knowledge"));
    }

    #[tokio::test]
    async fn test_empty_chain_defaults_to_chat() {
        let router = IntentRouter::with_strategies(Vec::new());
        let mut session = SessionContext::new();
        let decision = router
            .route(&Utterance::new("anything"), &mut session)
            .await
            .unwrap();
        assert_eq!(decision.route, Route::LlmChat);
        assert_eq!(decision.confidence, 0.5);
    }
}
