//! End-to-end conversations against the in-memory store.

mod common;

use std::sync::Arc;

use common::{demo_store, engine_with_model, offline_engine, ScriptedModel, CONTAINER};
use isms_command_engine::isms_llm::ModelError;
use isms_command_engine::router::Route;
use isms_command_engine::{ObjectType, PendingSelection, ResponseStatus, Utterance};

async fn say(
    engine: &isms_command_engine::CommandEngine,
    session: &mut isms_command_engine::SessionContext,
    text: &str,
) -> isms_command_engine::EngineResponse {
    engine.handle(&Utterance::new(text), session).await
}

#[tokio::test]
async fn created_scope_is_cached_under_its_normalized_name() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "create scope named 'Project Phoenix'").await;
    assert_eq!(response.status, ResponseStatus::Success, "{}", response.message);

    let stored = store.find_by_name(ObjectType::Scope, "Project Phoenix").unwrap();
    let cached = session.created.get(ObjectType::Scope, "project phoenix").unwrap();
    assert_eq!(cached.canonical_id, stored.id);
    assert_eq!(cached.display_name, "Project Phoenix");
    assert_eq!(stored.subtype.as_deref(), Some("SCP_Scope"));
}

#[tokio::test]
async fn subtype_filter_returns_only_matching_assets() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "list assets subType IT-System").await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(response.data["count"], 2);
    assert_eq!(response.data["subtype"], "AST_IT-System");
    let names: Vec<&str> = response.data["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Desktop", "Mail Server"]);
}

#[tokio::test]
async fn unknown_subtype_filter_is_a_mismatch() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "list assets subType Spaceship").await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.data["kind"], "subtype_mismatch");
    assert!(response.message.contains("Datatype"), "{}", response.message);
}

#[tokio::test]
async fn typo_link_works_without_a_model() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "link Deskop to SCOPE1").await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(response.decision.as_ref().unwrap().route, Route::DeterministicFallback);

    let desktop = store.find_by_name(ObjectType::Asset, "Desktop").unwrap();
    let scope = store.find_by_name(ObjectType::Scope, "SCOPE1").unwrap();
    assert_eq!(scope.part_ids(), vec![desktop.id]);
}

#[tokio::test]
async fn recreating_a_name_keeps_one_cache_entry_with_the_latest_id() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    for _ in 0..2 {
        let response = say(&engine, &mut session, "create dpo named DPO-1").await;
        assert!(response.is_success(), "{}", response.message);
    }

    let dpos: Vec<_> = store
        .objects()
        .into_iter()
        .filter(|o| o.object_type == ObjectType::Person && o.name == "DPO-1")
        .collect();
    assert_eq!(dpos.len(), 2);
    assert!(dpos.iter().all(|o| o.subtype.as_deref() == Some("PER_DataProtectionOfficer")));

    let entries: Vec<_> = session
        .created
        .iter()
        .filter(|(k, _)| k.object_type == ObjectType::Person)
        .collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.canonical_id, dpos[1].id);
}

#[tokio::test]
async fn ambiguous_create_asks_then_uses_the_chosen_subtype() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "create asset 'Laptop'").await;
    assert_eq!(response.status, ResponseStatus::NeedsInput);
    assert!(matches!(session.pending(), Some(PendingSelection::Subtype { .. })));
    assert!(store.find_by_name(ObjectType::Asset, "Laptop").is_none());

    let response = say(&engine, &mut session, "Datatype").await;
    assert!(response.is_success(), "{}", response.message);
    assert!(!session.has_pending());
    let laptop = store.find_by_name(ObjectType::Asset, "Laptop").unwrap();
    assert_eq!(laptop.subtype.as_deref(), Some("AST_Datatype"));
}

#[tokio::test]
async fn bulk_delete_is_held_until_confirmed() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "delete all assets").await;
    assert_eq!(response.status, ResponseStatus::NeedsInput);
    assert!(response.message.contains("Are you sure"), "{}", response.message);
    assert_eq!(store.calls().delete_object, 0);

    let response = say(&engine, &mut session, "yes").await;
    assert!(response.is_success(), "{}", response.message);
    assert!(store.objects().iter().all(|o| o.object_type != ObjectType::Asset));
    assert!(store.find_by_name(ObjectType::Scope, "SCOPE1").is_some());
}

#[tokio::test]
async fn protected_bulk_delete_needs_the_explicit_word() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "delete all assets in production").await;
    assert_eq!(response.status, ResponseStatus::NeedsInput);
    assert!(response.message.contains("production"), "{}", response.message);

    let response = say(&engine, &mut session, "yes").await;
    assert!(response.message.contains("cancelled"), "{}", response.message);
    assert_eq!(store.calls().delete_object, 0);
    assert!(!session.has_pending());
}

#[tokio::test]
async fn delete_them_refers_to_the_last_list() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    say(&engine, &mut session, "list assets subType IT-System").await;
    let response = say(&engine, &mut session, "delete them").await;
    assert_eq!(response.status, ResponseStatus::NeedsInput);

    let response = say(&engine, &mut session, "yes").await;
    assert!(response.is_success(), "{}", response.message);
    assert!(store.find_by_name(ObjectType::Asset, "Desktop").is_none());
    assert!(store.find_by_name(ObjectType::Asset, "Mail Server").is_none());
    assert!(store.find_by_name(ObjectType::Asset, "CRM").is_some());
}

#[tokio::test]
async fn rename_moves_the_cache_entry() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "create asset 'Laptop' subtype IT-System").await;
    assert!(response.is_success(), "{}", response.message);
    let id = session.created.get(ObjectType::Asset, "Laptop").unwrap().canonical_id.clone();

    let response = say(&engine, &mut session, "rename asset Laptop to Workstation").await;
    assert!(response.is_success(), "{}", response.message);
    assert!(session.created.get(ObjectType::Asset, "Laptop").is_none());
    assert_eq!(session.created.get(ObjectType::Asset, "Workstation").unwrap().canonical_id, id);
    assert_eq!(store.find_by_name(ObjectType::Asset, "Workstation").unwrap().id, id);
}

#[tokio::test]
async fn then_separated_steps_run_in_order() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(
        &engine,
        &mut session,
        "create asset 'Laptop' subtype IT-System then link asset Laptop to scope SCOPE1",
    )
    .await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(response.decision.as_ref().unwrap().route, Route::MultiOperation);

    let laptop = store.find_by_name(ObjectType::Asset, "Laptop").unwrap();
    let scope = store.find_by_name(ObjectType::Scope, "SCOPE1").unwrap();
    assert!(scope.part_ids().contains(&laptop.id));
}

#[tokio::test]
async fn report_asks_for_the_scope_when_several_exist() {
    let store = demo_store();
    store.seed(CONTAINER, ObjectType::Scope, "SCOPE2", Some("SCP_Scope"));
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "generate the inventory of assets").await;
    assert_eq!(response.status, ResponseStatus::NeedsInput);
    assert!(matches!(session.pending(), Some(PendingSelection::ReportScope { .. })));

    let response = say(&engine, &mut session, "1").await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(response.data["entries"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn store_outage_is_reported_as_connection_failure() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();
    store.set_offline(true);

    let response = say(&engine, &mut session, "list scopes").await;
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.data["kind"], "connection");
}

#[tokio::test]
async fn planner_drives_tools_through_the_model() {
    let store = demo_store();
    let model = Arc::new(ScriptedModel::new([
        r#"{"thought": "Link the asset into the scope", "action": "use_tool", "tool": "link_objects",
            "parameters": {"source_type": "asset", "source_name": "Desktop", "target_type": "scope", "target_name": "SCOPE1"}}"#,
        r#"{"thought": "The link exists now", "action": "complete", "result": "Desktop is now part of SCOPE1."}"#,
    ]));
    let engine = engine_with_model(store.clone(), model.clone());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "link asset Desktop to scope SCOPE1").await;
    assert!(response.is_success(), "{}", response.message);
    assert_eq!(response.message, "Desktop is now part of SCOPE1.");
    assert_eq!(model.calls(), 2);
    assert_eq!(response.data["tool_calls"][0]["tool_name"], "link_objects");

    let desktop = store.find_by_name(ObjectType::Asset, "Desktop").unwrap();
    let scope = store.find_by_name(ObjectType::Scope, "SCOPE1").unwrap();
    assert_eq!(scope.part_ids(), vec![desktop.id]);
}

#[tokio::test]
async fn quota_during_planning_falls_back_to_the_parsed_operations() {
    let store = demo_store();
    let model = Arc::new(ScriptedModel::failing(ModelError::quota("insufficient_quota")));
    let engine = engine_with_model(store.clone(), model);
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "link asset Desktop to scope SCOPE1").await;
    assert!(response.is_success(), "{}", response.message);
    let scope = store.find_by_name(ObjectType::Scope, "SCOPE1").unwrap();
    assert_eq!(scope.part_ids().len(), 1);
}

#[tokio::test]
async fn chat_without_a_model_gives_offline_guidance() {
    let engine = offline_engine(demo_store());
    let mut session = engine.new_session();

    let response = say(&engine, &mut session, "tell me a story about dragons").await;
    assert!(response.is_success());
    assert_eq!(response.data["offline"], true);
    assert!(response.message.contains("offline"));
}

#[tokio::test]
async fn delete_targets_the_full_name_containing_a_type_word() {
    let store = demo_store();
    let engine = offline_engine(store.clone());
    let mut session = engine.new_session();
    for name in ["Register", "Asset Register"] {
        let response = say(
            &engine,
            &mut session,
            &format!("create asset '{}' subtype Application", name),
        )
        .await;
        assert!(response.is_success(), "{}", response.message);
    }

    let response = say(&engine, &mut session, "delete asset 'Asset Register'").await;
    assert!(response.is_success(), "{}", response.message);
    assert!(response.message.contains("Asset Register"), "{}", response.message);
    assert!(store.find_by_name(ObjectType::Asset, "Register").is_some());
    assert!(store.find_by_name(ObjectType::Asset, "Asset Register").is_none());
}
