//! Dual-path routing: shadow comparison and active rollout.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{demo_store, CONTAINER};
use isms_command_engine::router::Route;
use isms_command_engine::{
    CommandEngine, EngineConfig, EngineError, IntentRouter, LegacyRouter, ObjectType, RolloutMode,
    Router, RouterConfig, RoutingDecision, SessionContext, ShadowComparator, ShadowConfig,
    SubtypeMatcher, Utterance,
};
use proptest::prelude::*;

struct Unavailable;

#[async_trait]
impl Router for Unavailable {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn route(
        &self,
        _utterance: &Utterance,
        _session: &mut SessionContext,
    ) -> isms_command_engine::Result<RoutingDecision> {
        Err(EngineError::validation("router offline"))
    }
}

fn comparator(candidate: Arc<dyn Router>, mode: RolloutMode) -> ShadowComparator {
    let config = ShadowConfig {
        mode,
        message_preview_chars: 12,
        ..ShadowConfig::default()
    };
    ShadowComparator::new(Arc::new(LegacyRouter::new(SubtypeMatcher::new())), candidate, &config)
}

fn layered() -> Arc<dyn Router> {
    Arc::new(IntentRouter::standard(SubtypeMatcher::new(), None, &RouterConfig::default()))
}

#[tokio::test]
async fn failing_candidate_is_logged_not_raised() {
    let shadow = comparator(Arc::new(Unavailable), RolloutMode::Shadow);
    let mut session = SessionContext::new();

    let decision = shadow
        .route(&Utterance::new("create scope named 'Alpha'"), &mut session)
        .await
        .unwrap();
    assert_eq!(decision.route, Route::Operation);

    let entry = shadow.routing_log(&session).last().unwrap();
    assert_eq!(entry.new_route, "error");
    assert!(entry.error.as_deref().unwrap().contains("router offline"));
    assert!(!entry.agreement);
    assert_eq!(entry.message_preview, "create scope...");
}

#[tokio::test]
async fn active_mode_falls_back_to_legacy() {
    let shadow = comparator(Arc::new(Unavailable), RolloutMode::Active);
    let mut session = SessionContext::new();
    let decision = shadow.route(&Utterance::new("hello"), &mut session).await.unwrap();
    assert_eq!(decision.route, Route::Greeting);
    assert!(shadow.routing_log(&session).is_empty());
}

#[tokio::test]
async fn mode_switches_take_effect_immediately() {
    let shadow = comparator(layered(), RolloutMode::Shadow);
    let mut session = SessionContext::new();
    let text = Utterance::new("link Deskop to SCOPE1");

    let decision = shadow.route(&text, &mut session).await.unwrap();
    assert_eq!(decision.route, Route::LlmChat);

    shadow.set_mode(RolloutMode::Active);
    let decision = shadow.route(&text, &mut session).await.unwrap();
    assert_eq!(decision.route, Route::DeterministicFallback);
    assert_eq!(shadow.routing_log(&session).len(), 1);
}

#[tokio::test]
async fn engine_in_shadow_mode_executes_the_legacy_decision_once() {
    let store = demo_store();
    let config = EngineConfig::default().rollout_mode(RolloutMode::Shadow);
    let engine = CommandEngine::new(store.clone(), None, config).unwrap();
    let mut session = engine.new_session();

    let response = engine
        .handle(&Utterance::new("create scope named 'Alpha'"), &mut session)
        .await;
    assert!(response.is_success(), "{}", response.message);
    let alphas = store
        .objects()
        .into_iter()
        .filter(|o| o.object_type == ObjectType::Scope && o.name == "Alpha")
        .count();
    assert_eq!(alphas, 1);
    assert!(session.routing_log.last().unwrap().agreement);

    // the layered router would link; the legacy one chats, and only chat runs
    let response = engine
        .handle(&Utterance::new("link Deskop to SCOPE1"), &mut session)
        .await;
    assert_eq!(response.decision.as_ref().unwrap().route, Route::LlmChat);
    let entry = session.routing_log.last().unwrap();
    assert_eq!(entry.new_route, "deterministic_fallback");
    assert!(!entry.agreement);
    assert!(store
        .find_by_name(ObjectType::Scope, "SCOPE1")
        .unwrap()
        .part_ids()
        .is_empty());
    assert_eq!(engine.router().agreement_rate(&session), Some(0.5));

    engine.router().clear_routing_log(&mut session);
    assert!(engine.router().routing_log(&session).is_empty());
    let alpha = store.find_by_name(ObjectType::Scope, "Alpha").unwrap();
    assert_eq!(alpha.container_id.as_deref(), Some(CONTAINER));
}

#[tokio::test]
async fn routing_log_is_bounded() {
    let shadow = comparator(layered(), RolloutMode::Shadow);
    let mut session = SessionContext::with_log_capacity(3);
    for i in 0..5 {
        shadow
            .route(&Utterance::new(format!("scopes {}", i)), &mut session)
            .await
            .unwrap();
    }
    let log = shadow.routing_log(&session);
    assert_eq!(log.len(), 3);
    assert!(log.entries().next().unwrap().message_preview.ends_with('2'));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn shadow_never_changes_the_legacy_result(
        text in prop::sample::select(vec![
            "hello",
            "create scope named 'Alpha'",
            "delete all assets",
            "list assets subType IT-System",
            "link Deskop to SCOPE1",
            "how do I create a scope?",
            "what is ISO 27001?",
            "create 3 persons",
            "tell me a joke",
        ]),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let legacy = LegacyRouter::new(SubtypeMatcher::new());
        let shadow = comparator(layered(), RolloutMode::Shadow);
        let utterance = Utterance::new(text);

        let mut plain = SessionContext::new();
        let expected = runtime.block_on(legacy.route(&utterance, &mut plain)).unwrap();
        let mut session = SessionContext::new();
        let actual = runtime.block_on(shadow.route(&utterance, &mut session)).unwrap();

        prop_assert_eq!(actual, expected);
        prop_assert_eq!(session.routing_log.len(), 1);
        prop_assert!(session.created.is_empty());
        prop_assert!(!session.has_pending());
    }
}
