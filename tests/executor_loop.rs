//! The reasoning loop driving the real operation tools.

mod common;

use std::sync::Arc;

use common::{demo_store, offline_engine, ScriptedModel};
use isms_command_engine::isms_llm::{ModelError, ModelErrorKind};
use isms_command_engine::{ExecutionStatus, ExecutorConfig, ObjectType, OperationExecutor};
use proptest::prelude::*;

fn executor(model: Arc<ScriptedModel>, max_iterations: usize) -> OperationExecutor {
    let config = ExecutorConfig {
        max_iterations,
        ..ExecutorConfig::default()
    };
    OperationExecutor::new(model, config)
}

#[tokio::test]
async fn creates_and_links_through_tools() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();
    let model = Arc::new(ScriptedModel::new([
        r#"{"thought": "Create the laptop first", "action": "use_tool", "tool": "create_object",
            "parameters": {"object_type": "asset", "name": "Laptop", "subtype": "IT-System"}}"#,
        r#"{"thought": "Now put it into the scope", "action": "use_tool", "tool": "link_objects",
            "parameters": {"source_type": "asset", "source_name": "Laptop", "target_type": "scope", "target_name": "SCOPE1"}}"#,
        r#"{"thought": "Both steps worked", "action": "complete", "result": "Created Laptop and linked it to SCOPE1."}"#,
    ]));

    let outcome = executor(model.clone(), 10)
        .run("create asset Laptop and link it to SCOPE1", engine.tools(), &mut session)
        .await;

    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.thoughts.len(), 3);
    let tools: Vec<&str> = outcome.tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
    assert_eq!(tools, vec!["create_object", "link_objects"]);

    let laptop = store.find_by_name(ObjectType::Asset, "Laptop").unwrap();
    assert_eq!(session.created.get(ObjectType::Asset, "laptop").unwrap().canonical_id, laptop.id);
    let scope = store.find_by_name(ObjectType::Scope, "SCOPE1").unwrap();
    assert_eq!(scope.part_ids(), vec![laptop.id]);

    // observations reach the next prompt
    assert!(model.prompts()[1].contains("Observation: Created asset 'Laptop'"));
}

#[tokio::test]
async fn unknown_tool_is_an_observation() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();
    let model = Arc::new(ScriptedModel::new([
        r#"{"thought": "t", "action": "use_tool", "tool": "teleport_object", "parameters": {}}"#,
        r#"{"thought": "that did not exist", "action": "complete", "result": "I could not do that."}"#,
    ]));

    let outcome = executor(model, 10)
        .run("teleport the desktop", engine.tools(), &mut session)
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert!(outcome.tool_calls[0].observation_summary.starts_with("Error:"));
}

#[tokio::test]
async fn missing_object_is_observed_and_the_loop_continues() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();
    let model = Arc::new(ScriptedModel::new([
        r#"{"thought": "look it up", "action": "use_tool", "tool": "get_object",
            "parameters": {"object_type": "asset", "name": "Ghost"}}"#,
        r#"{"thought": "not there", "action": "ask_clarification", "question": "Which asset did you mean?"}"#,
    ]));

    let outcome = executor(model, 10)
        .run("show the ghost asset", engine.tools(), &mut session)
        .await;
    assert_eq!(outcome.status, ExecutionStatus::NeedsClarification);
    assert_eq!(outcome.message, "Which asset did you mean?");
    assert!(outcome.tool_calls[0]
        .observation_summary
        .contains("couldn't find any asset called 'Ghost'"));
}

#[tokio::test]
async fn quota_error_stops_the_loop() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();
    let model = Arc::new(ScriptedModel::failing(ModelError::quota("insufficient_quota")));

    let outcome = executor(model.clone(), 10)
        .run("list assets", engine.tools(), &mut session)
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Error);
    assert_eq!(outcome.model_error, Some(ModelErrorKind::Quota));
    assert_eq!(model.calls(), 1);
    assert!(!outcome.message.contains("insufficient_quota"));
}

#[tokio::test]
async fn prose_reply_ends_the_loop() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();
    let model = Arc::new(ScriptedModel::new(["Sure, I listed everything for you."]));

    let outcome = executor(model, 10)
        .run("list assets", engine.tools(), &mut session)
        .await;
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert!(outcome.error.is_some());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn loop_stops_at_the_ceiling(limit in 1usize..8) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let engine = offline_engine(demo_store());
        let mut session = engine.new_session();
        let model = Arc::new(ScriptedModel::new([
            r#"{"thought": "again", "action": "use_tool", "tool": "list_objects", "parameters": {"object_type": "asset"}}"#,
        ]));

        let outcome = runtime.block_on(
            executor(model.clone(), limit).run("keep listing", engine.tools(), &mut session),
        );
        prop_assert_eq!(outcome.status, ExecutionStatus::MaxIterations);
        prop_assert_eq!(outcome.iterations, limit);
        prop_assert_eq!(outcome.tool_calls.len(), limit);
        prop_assert_eq!(model.calls(), limit);
    }
}
