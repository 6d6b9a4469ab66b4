//! Keyword-only router kept as the reference path for shadow comparison.

use async_trait::async_trait;

use super::decision::{DecisionPayload, Handler, Route, RoutingDecision};
use super::patterns::parse_clause;
use super::{lexicon, screen, RouteInput, Router};
use crate::error::Result;
use crate::resolution::SubtypeMatcher;
use crate::session::SessionContext;
use crate::types::Utterance;

/// The pre-layered router: greeting, keyword operation, question, chat.
#[derive(Default)]
pub struct LegacyRouter {
    matcher: SubtypeMatcher,
}

impl LegacyRouter {
    pub fn new(matcher: SubtypeMatcher) -> Self {
        Self { matcher }
    }

    fn decide(&self, input: &RouteInput, session: &SessionContext) -> RoutingDecision {
        if session.has_pending() {
            return RoutingDecision::new(
                Route::FollowUp,
                Handler::FollowUp,
                1.0,
                DecisionPayload::FollowUp {
                    answer: input.text.clone(),
                },
            );
        }

        if lexicon::is_greeting(&input.lower) || lexicon::is_thanks(&input.lower) {
            return RoutingDecision::new(
                Route::Greeting,
                Handler::Greeting,
                1.0,
                DecisionPayload::Greeting {
                    thanks: lexicon::is_thanks(&input.lower),
                },
            );
        }

        let question = lexicon::is_question(&input.lower);
        if !question || lexicon::question_allowed(&input.lower) {
            if let Some((op, _)) = parse_clause(&input.text, &self.matcher) {
                if op.object_type.is_some() {
                    return RoutingDecision::operation(Route::Operation, 0.8, op);
                }
            }
        }

        if question {
            return RoutingDecision::new(
                Route::FallbackKnowledge,
                Handler::Knowledge,
                0.7,
                DecisionPayload::Knowledge {
                    question: input.text.clone(),
                },
            );
        }

        RoutingDecision::new(
            Route::LlmChat,
            Handler::Chat,
            0.5,
            DecisionPayload::Chat {
                message: input.raw.clone(),
            },
        )
    }
}

#[async_trait]
impl Router for LegacyRouter {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn route(
        &self,
        utterance: &Utterance,
        session: &mut SessionContext,
    ) -> Result<RoutingDecision> {
        let input = RouteInput::new(utterance);
        let decision = self.decide(&input, session);
        Ok(screen(decision, &input.raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjectType, OperationKind};

    async fn route(text: &str) -> RoutingDecision {
        LegacyRouter::default()
            .route(&Utterance::new(text), &mut SessionContext::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_keyword_operation() {
        let d = route("create scope named 'Project Phoenix'").await;
        assert_eq!(d.route, Route::Operation);
        let op = &d.operations()[0];
        assert_eq!(op.kind, OperationKind::Create);
        assert_eq!(op.object_type, Some(ObjectType::Scope));
        assert_eq!(op.params.name.as_deref(), Some("Project Phoenix"));
    }

    #[tokio::test]
    async fn test_greeting_question_and_chat() {
        assert_eq!(route("hello").await.route, Route::Greeting);
        assert_eq!(route("how do I create a scope?").await.route, Route::FallbackKnowledge);
        assert_eq!(route("the weather is nice").await.route, Route::LlmChat);
    }

    #[tokio::test]
    async fn test_no_relationship_support() {
        // link phrasing has no keyword operation in the legacy tables
        assert_ne!(route("link Desktop to SCOPE1").await.route, Route::DeterministicFallback);
    }
}
