//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use isms_command_engine::isms_llm::{GenerateRequest, LanguageModel, ModelError};
use isms_command_engine::{CommandEngine, EngineConfig, InMemoryStore, ObjectType};

pub const CONTAINER: &str = "dom-isms";

/// Replays canned replies in order; the last one repeats once the script runs out.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    last: Mutex<Option<Result<String, ModelError>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn from_results(replies: impl IntoIterator<Item = Result<String, ModelError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with `error`.
    pub fn failing(error: ModelError) -> Self {
        Self::from_results([Err(error)])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.prompt.clone())
            .collect()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => {
                *self.last.lock().unwrap() = Some(reply.clone());
                reply
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(ModelError::other("script is empty"))),
        };
        reply
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

/// One container with a small subtype catalog and a few objects.
pub fn demo_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new()
        .with_container(CONTAINER, "ISMS")
        .with_subtypes(CONTAINER, ObjectType::Scope, &["SCP_Scope"])
        .with_subtypes(CONTAINER, ObjectType::Asset, &["AST_IT-System", "AST_Application", "AST_Datatype"])
        .with_subtypes(CONTAINER, ObjectType::Person, &["PER_Person", "PER_DataProtectionOfficer"]);
    store.seed(CONTAINER, ObjectType::Scope, "SCOPE1", Some("SCP_Scope"));
    store.seed(CONTAINER, ObjectType::Asset, "Desktop", Some("AST_IT-System"));
    store.seed(CONTAINER, ObjectType::Asset, "Mail Server", Some("AST_IT-System"));
    store.seed(CONTAINER, ObjectType::Asset, "CRM", Some("AST_Application"));
    Arc::new(store)
}

/// Engine without a model.
pub fn offline_engine(store: Arc<InMemoryStore>) -> CommandEngine {
    CommandEngine::new(store, None, EngineConfig::default()).unwrap()
}

pub fn engine_with_model(store: Arc<InMemoryStore>, model: Arc<ScriptedModel>) -> CommandEngine {
    CommandEngine::new(store, Some(model), EngineConfig::default()).unwrap()
}
