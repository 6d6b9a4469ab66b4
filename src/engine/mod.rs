//! Command engine: route an utterance, then act on the decision.
//!
//! ```text
//! Utterance ─► ShadowComparator ─► RoutingDecision
//!                                       │
//!        ┌──────────────┬───────────────┼─────────────────┬───────────────┐
//!   follow-up      operation         planner         knowledge/chat   confirmation
//!        │              │               │                 │               │
//!  PendingSelection  HandlerTable  OperationExecutor   model or        PendingSelection
//!                                  over the tools      offline text
//! ```
//!
//! Every turn ends in an [`EngineResponse`]. Errors and panics below this
//! point are turned into a calm message; the session always survives.

pub mod handlers;
pub mod tools;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use isms_llm::{GenerateRequest, LanguageModel, ModelError, ModelErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

pub use handlers::{HandlerReply, HandlerTable, OperationHandler, ReportHandler, Services};
pub use tools::{operation_tools, tool_name, OperationTool};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{ExecutionOutcome, ExecutionStatus, OperationExecutor, ToolRegistry};
use crate::resolution::{display_label, parse_selection, SubtypeMatcher};
use crate::router::classifier::asks_capabilities;
use crate::router::{
    DecisionPayload, Handler, IntentRouter, LegacyRouter, Route, Router, RoutingDecision,
};
use crate::session::{PendingSelection, SessionContext};
use crate::shadow::ShadowComparator;
use crate::store::ObjectStore;
use crate::types::{ObjectReference, ObjectType, Operation, Utterance};

const CANCEL_WORDS: &[&str] = &["cancel", "no", "n", "stop", "abort", "never mind", "nevermind"];

const OFFLINE_GUIDANCE: &str = "I'm operating in offline mode right now, so I can only handle direct commands. \
Try for example:\n\
- list scopes\n\
- create asset 'Desktop'\n\
- show subtypes of person\n\
- link asset Desktop to scope Alpha\n\
- generate inventory of assets report";

const CAPABILITIES: &str = "I work with the objects of your ISMS: scopes, assets, controls, persons, \
processes, documents, incidents and scenarios. I can create, list, show, update and delete them, \
link objects into scopes, compare or analyze objects, show the subtypes of a type, and generate \
inventory-of-assets, risk-assessment and statement-of-applicability reports.";

const CHAT_SYSTEM_PROMPT: &str = "You are the assistant of an ISMS compliance platform. Answer \
questions about information security management and ISO 27001 briefly and accurately. You cannot \
change platform data in this mode; suggest a direct command such as 'create asset X' when the user \
wants to change something.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    /// A question is open; the next utterance answers it.
    NeedsInput,
    Error,
}

/// What the caller shows for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct EngineResponse {
    pub status: ResponseStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<RoutingDecision>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl EngineResponse {
    fn from_reply(reply: HandlerReply, decision: RoutingDecision) -> Self {
        Self {
            status: if reply.needs_input {
                ResponseStatus::NeedsInput
            } else {
                ResponseStatus::Success
            },
            message: reply.message,
            decision: Some(decision),
            data: reply.data,
        }
    }

    fn failure(error: &EngineError, decision: Option<RoutingDecision>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: error.user_message(),
            decision,
            data: json!({"kind": error.kind()}),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

pub struct CommandEngine {
    router: ShadowComparator,
    services: Arc<Services>,
    handlers: HandlerTable,
    registry: ToolRegistry,
    executor: Option<OperationExecutor>,
    model: Option<Arc<dyn LanguageModel>>,
    config: EngineConfig,
}

impl CommandEngine {
    /// Build an engine. Without a model the router stays on patterns and
    /// planned operations run one by one.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        model: Option<Arc<dyn LanguageModel>>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::with_matcher(store, model, config, SubtypeMatcher::new())
    }

    pub fn with_matcher(
        store: Arc<dyn ObjectStore>,
        model: Option<Arc<dyn LanguageModel>>,
        config: EngineConfig,
        matcher: SubtypeMatcher,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| EngineError::Config(format!("{:#}", e)))?;

        let services = Arc::new(Services::new(store, matcher.clone(), &config.resolver));
        let handlers = HandlerTable::standard();
        let registry = operation_tools(&handlers, services.clone());

        let candidate: Arc<dyn Router> =
            Arc::new(IntentRouter::standard(matcher.clone(), model.clone(), &config.router));
        let legacy: Arc<dyn Router> = Arc::new(LegacyRouter::new(matcher));
        let router = ShadowComparator::new(legacy, candidate, &config.shadow);

        let executor = model
            .clone()
            .map(|m| OperationExecutor::new(m, config.executor.clone()));

        info!(
            model = model.as_ref().map(|m| m.model_name()).unwrap_or("none"),
            mode = ?config.shadow.mode,
            tools = registry.len(),
            "Command engine ready"
        );

        Ok(Self {
            router,
            services,
            handlers,
            registry,
            executor,
            model,
            config,
        })
    }

    /// A fresh session sized for this engine's routing log.
    pub fn new_session(&self) -> SessionContext {
        SessionContext::with_log_capacity(self.config.shadow.log_capacity)
    }

    pub fn router(&self) -> &ShadowComparator {
        &self.router
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Handle one utterance.
    pub async fn handle(&self, utterance: &Utterance, session: &mut SessionContext) -> EngineResponse {
        let turn = AssertUnwindSafe(self.process(utterance, session)).catch_unwind();
        match turn.await {
            Ok(response) => response,
            Err(_) => {
                error!(utterance = %utterance.text, "Unexpected failure while handling utterance");
                EngineResponse {
                    status: ResponseStatus::Error,
                    message: "Something went wrong while handling that request. Please try again or rephrase it."
                        .to_string(),
                    decision: None,
                    data: json!({"kind": "internal"}),
                }
            }
        }
    }

    async fn process(&self, utterance: &Utterance, session: &mut SessionContext) -> EngineResponse {
        let decision = match self.router.route(utterance, session).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "Routing failed");
                return EngineResponse::failure(&e, None);
            }
        };
        info!(decision = %decision.describe(), "Routed utterance");

        match self.dispatch(&decision, utterance, session).await {
            Ok(reply) => EngineResponse::from_reply(reply, decision),
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Request failed");
                EngineResponse::failure(&e, Some(decision))
            }
        }
    }

    async fn dispatch(
        &self,
        decision: &RoutingDecision,
        utterance: &Utterance,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        match (&decision.handler, &decision.payload) {
            (Handler::FollowUp, DecisionPayload::FollowUp { answer }) => {
                self.follow_up(answer, session).await
            }
            (Handler::Greeting, DecisionPayload::Greeting { thanks }) => Ok(greet(*thanks)),
            (Handler::Subtypes, DecisionPayload::Subtypes { object_type }) => {
                self.subtypes(*object_type).await
            }
            (Handler::Confirmation, _) => self.hold_for_confirmation(decision, session),
            (Handler::Operation, _) => self.run_sequential(decision.operations(), session).await,
            (Handler::Planner, _) => {
                let plannable = decision.route != Route::DeterministicFallback;
                match &self.executor {
                    Some(executor) if plannable => {
                        self.plan(executor, decision.operations(), &utterance.text, session)
                            .await
                    }
                    _ => self.run_sequential(decision.operations(), session).await,
                }
            }
            (Handler::Knowledge, DecisionPayload::Knowledge { question }) => {
                self.converse(question).await
            }
            (Handler::Chat, DecisionPayload::Chat { message }) => self.converse(message).await,
            (handler, payload) => {
                error!(handler = handler.name(), ?payload, "Decision payload does not fit its handler");
                Err(EngineError::validation(
                    "I couldn't work out what to do with that. Could you rephrase it?",
                ))
            }
        }
    }

    // ------------------------------------------------------------------------
    // operations
    // ------------------------------------------------------------------------

    /// Run operations in order, stopping at the first question or failure.
    async fn run_sequential(
        &self,
        operations: &[Operation],
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        if operations.is_empty() {
            return Err(EngineError::validation("There was nothing to do in that request."));
        }

        let mut messages = Vec::new();
        let mut data = Vec::new();
        for (i, op) in operations.iter().enumerate() {
            match self.handlers.dispatch(op, &self.services, session).await {
                Ok(reply) if reply.needs_input => {
                    messages.push(reply.message);
                    return Ok(HandlerReply::ask(messages.join("\n")).with_data(Value::Array(data)));
                }
                Ok(reply) => {
                    messages.push(reply.message);
                    data.push(reply.data);
                }
                Err(e) if i == 0 => return Err(e),
                Err(e) => {
                    warn!(step = i + 1, kind = e.kind(), "Stopped a multi-step request");
                    messages.push(format!("Stopped at step {}: {}", i + 1, e.user_message()));
                    return Ok(HandlerReply::done(messages.join("\n")).with_data(json!({
                        "completed": data,
                        "failed_step": i + 1,
                        "kind": e.kind(),
                    })));
                }
            }
        }

        if operations.len() == 1 {
            let payload = data.pop().unwrap_or(Value::Null);
            return Ok(HandlerReply::done(messages.join("\n")).with_data(payload));
        }
        Ok(HandlerReply::done(messages.join("\n")).with_data(Value::Array(data)))
    }

    /// Hand multi-step work to the reasoning loop.
    async fn plan(
        &self,
        executor: &OperationExecutor,
        operations: &[Operation],
        request: &str,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let mut task = request.trim().to_string();
        if !operations.is_empty() {
            let steps: Vec<String> = operations.iter().map(Operation::summary).collect();
            task.push_str(&format!("\nUnderstood as: {}", steps.join("; ")));
        }

        let outcome = executor
            .run(&task, &self.registry, session)
            .await
            .into_result(executor.max_iterations())?;
        debug!(
            status = ?outcome.status,
            iterations = outcome.iterations,
            confidence = outcome.confidence,
            "Reasoning loop finished"
        );

        match outcome.status {
            ExecutionStatus::Completed => {
                if let Some(detail) = &outcome.error {
                    warn!(error = %detail, "Reasoning loop ended on unparseable output");
                }
                let message = outcome.message.clone();
                Ok(HandlerReply::done(message).with_data(trace(&outcome)))
            }
            ExecutionStatus::NeedsClarification => {
                let message = outcome.message.clone();
                Ok(HandlerReply::ask(message).with_data(trace(&outcome)))
            }
            ExecutionStatus::Error if outcome.model_error == Some(ModelErrorKind::Quota) && !operations.is_empty() => {
                info!("Model quota exhausted during planning, running parsed operations directly");
                self.run_sequential(operations, session).await
            }
            ExecutionStatus::Error | ExecutionStatus::MaxIterations => {
                let kind = outcome.model_error.unwrap_or(ModelErrorKind::Other);
                let detail = outcome.error.clone().unwrap_or_else(|| outcome.message.clone());
                Err(EngineError::Model(ModelError::new(kind, detail)))
            }
        }
    }

    fn hold_for_confirmation(
        &self,
        decision: &RoutingDecision,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let assessment = decision.safety.clone().ok_or_else(|| {
            EngineError::validation("That request needs confirmation, but I couldn't tell why.")
        })?;
        let summary = decision
            .operations()
            .iter()
            .map(Operation::summary)
            .collect::<Vec<_>>()
            .join("; ");
        let question = assessment.prompt(&summary);
        session.begin_selection(PendingSelection::Confirmation {
            operations: decision.operations().to_vec(),
            assessment,
        })?;
        Ok(HandlerReply::ask(question))
    }

    // ------------------------------------------------------------------------
    // follow-ups
    // ------------------------------------------------------------------------

    async fn follow_up(&self, answer: &str, session: &mut SessionContext) -> Result<HandlerReply> {
        let Some(selection) = session.take_selection() else {
            return Ok(HandlerReply::done("There is no open question right now."));
        };
        let normalized = answer.trim().trim_end_matches(['.', '!']).to_lowercase();
        if CANCEL_WORDS.contains(&normalized.as_str()) {
            debug!(kind = selection.kind(), "Selection cancelled");
            return Ok(HandlerReply::done("Okay, cancelled. Nothing was changed."));
        }

        match selection {
            PendingSelection::Subtype { operation, options } => {
                match parse_selection(answer, &options) {
                    Some(index) => {
                        let mut op = operation;
                        op.params.subtype = Some(options[index].clone());
                        self.run_sequential(std::slice::from_ref(&op), session).await
                    }
                    None => {
                        let question = format!(
                            "I didn't catch that. Please pick a number or a name:\n{}",
                            numbered(&options)
                        );
                        session.begin_selection(PendingSelection::Subtype { operation, options })?;
                        Ok(HandlerReply::ask(question))
                    }
                }
            }

            PendingSelection::ReportScope { report_type, options } => {
                let names: Vec<String> = options.iter().map(|(_, n)| n.clone()).collect();
                let Some(index) = parse_selection(answer, &names) else {
                    let question = format!(
                        "I didn't catch that. Which scope should the report cover?\n{}",
                        numbered(&names)
                    );
                    session.begin_selection(PendingSelection::ReportScope { report_type, options })?;
                    return Ok(HandlerReply::ask(question));
                };
                let (id, name) = &options[index];
                let mut reference = ObjectReference::named(ObjectType::Scope, name.clone());
                reference.canonical_id = Some(id.clone());
                let scope = self.services.fetch(&reference, session).await?;
                ReportHandler::generate(&self.services, report_type, &scope).await
            }

            PendingSelection::Confirmation { operations, assessment } => {
                if assessment.accepts(answer) {
                    info!(operations = operations.len(), "Confirmed held operations");
                    self.run_sequential(&operations, session).await
                } else {
                    Ok(HandlerReply::done("Okay, cancelled. Nothing was changed."))
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // informational
    // ------------------------------------------------------------------------

    async fn subtypes(&self, object_type: ObjectType) -> Result<HandlerReply> {
        let labels = self.services.subtype_catalog(object_type).await?;
        let shown: Vec<String> = labels.iter().map(|l| display_label(l)).collect();
        let message = if shown.is_empty() {
            format!("There are no {} subtypes configured.", object_type)
        } else {
            format!(
                "There are {} {} subtypes:\n{}",
                shown.len(),
                object_type,
                shown.iter().map(|s| format!("- {}", s)).collect::<Vec<_>>().join("\n")
            )
        };
        Ok(HandlerReply::done(message).with_data(json!({
            "object_type": object_type,
            "count": labels.len(),
            "subtypes": labels,
        })))
    }

    async fn converse(&self, text: &str) -> Result<HandlerReply> {
        if asks_capabilities(&text.to_lowercase()) {
            return Ok(HandlerReply::done(CAPABILITIES));
        }
        let Some(model) = &self.model else {
            return Ok(offline());
        };
        let request = GenerateRequest::new(CHAT_SYSTEM_PROMPT, text.trim())
            .max_tokens(self.config.executor.max_tokens);
        match model.generate(&request).await {
            Ok(answer) => Ok(HandlerReply::done(answer.trim())),
            Err(e) if matches!(e.kind, ModelErrorKind::Quota | ModelErrorKind::Network) => {
                info!(kind = %e.kind, "Model unavailable, answering with offline guidance");
                Ok(offline())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn greet(thanks: bool) -> HandlerReply {
    if thanks {
        HandlerReply::done("You're welcome. Anything else I can do?")
    } else {
        HandlerReply::done("Hello! Tell me what you'd like to do, for example 'list scopes' or 'create asset Desktop'.")
    }
}

fn offline() -> HandlerReply {
    HandlerReply::done(OFFLINE_GUIDANCE).with_data(json!({"offline": true}))
}

fn numbered(options: &[String]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}. {}", i + 1, display_label(o)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn trace(outcome: &ExecutionOutcome) -> Value {
    json!({
        "iterations": outcome.iterations,
        "confidence": outcome.confidence,
        "thoughts": outcome.thoughts,
        "tool_calls": outcome.tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn engine(store: Arc<InMemoryStore>) -> CommandEngine {
        CommandEngine::new(store, None, EngineConfig::default()).unwrap()
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(
            InMemoryStore::new()
                .with_container("dom-1", "ISMS")
                .with_subtypes("dom-1", ObjectType::Asset, &["AST_IT-System", "AST_Application"]),
        )
    }

    #[tokio::test]
    async fn test_subtype_question_then_numbered_answer() {
        let store = store();
        let engine = engine(store.clone());
        let mut session = engine.new_session();

        let asked = engine.handle(&"create asset Desktop".into(), &mut session).await;
        assert_eq!(asked.status, ResponseStatus::NeedsInput, "{}", asked.message);

        let done = engine.handle(&"2".into(), &mut session).await;
        assert!(done.is_success(), "{}", done.message);
        let desktop = store.find_by_name(ObjectType::Asset, "Desktop").unwrap();
        assert_eq!(desktop.subtype.as_deref(), Some("AST_Application"));
        assert!(!session.has_pending());
    }

    #[tokio::test]
    async fn test_cancel_abandons_selection() {
        let engine = engine(store());
        let mut session = engine.new_session();
        engine.handle(&"create asset Desktop".into(), &mut session).await;
        let reply = engine.handle(&"cancel".into(), &mut session).await;
        assert!(reply.message.contains("cancelled"));
        assert!(!session.has_pending());
    }

    #[tokio::test]
    async fn test_offline_chat_guidance() {
        let engine = engine(store());
        let mut session = engine.new_session();
        let reply = engine.handle(&"tell me a story".into(), &mut session).await;
        assert!(reply.message.contains("offline mode"));
        assert_eq!(reply.data["offline"], true);
    }

    #[tokio::test]
    async fn test_store_outage_is_calm_error() {
        let store = store();
        let engine = engine(store.clone());
        let mut session = engine.new_session();
        store.set_offline(true);
        let reply = engine.handle(&"list assets".into(), &mut session).await;
        assert_eq!(reply.status, ResponseStatus::Error);
        assert_eq!(reply.data["kind"], "connection");
        assert!(!reply.message.contains("Unreachable"));
    }
}
