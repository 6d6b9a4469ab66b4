//! Router output.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::safety::SafetyAssessment;
use crate::types::{ObjectType, Operation};

/// Which layer produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    FollowUp,
    Greeting,
    SubtypeQuery,
    Operation,
    CreateAndLink,
    MultiOperation,
    ReportGeneration,
    IntentClassifier,
    SemanticParse,
    DeterministicFallback,
    FallbackKnowledge,
    LlmChat,
}

impl Route {
    pub fn tag(&self) -> &'static str {
        match self {
            Route::FollowUp => "follow_up",
            Route::Greeting => "greeting",
            Route::SubtypeQuery => "subtype_query",
            Route::Operation => "operation",
            Route::CreateAndLink => "create_and_link",
            Route::MultiOperation => "multi_operation",
            Route::ReportGeneration => "report_generation",
            Route::IntentClassifier => "intent_classifier",
            Route::SemanticParse => "semantic_parse",
            Route::DeterministicFallback => "deterministic_fallback",
            Route::FallbackKnowledge => "fallback_knowledge",
            Route::LlmChat => "llm_chat",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which engine component should act on a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    FollowUp,
    Greeting,
    Subtypes,
    /// Direct dispatch through the operation-handler table.
    Operation,
    /// Multi-step work for the reasoning loop.
    Planner,
    Knowledge,
    Chat,
    /// Hold for explicit user confirmation.
    Confirmation,
}

impl Handler {
    pub fn name(&self) -> &'static str {
        match self {
            Handler::FollowUp => "follow_up",
            Handler::Greeting => "greeting",
            Handler::Subtypes => "subtypes",
            Handler::Operation => "operation",
            Handler::Planner => "planner",
            Handler::Knowledge => "knowledge",
            Handler::Chat => "chat",
            Handler::Confirmation => "confirmation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionPayload {
    Operations { operations: Vec<Operation> },
    FollowUp { answer: String },
    Greeting { thanks: bool },
    Subtypes { object_type: ObjectType },
    Knowledge { question: String },
    Chat { message: String },
}

/// `{route, handler, confidence, payload}`; opaque to callers except for dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route: Route,
    pub handler: Handler,
    pub confidence: f32,
    pub payload: DecisionPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyAssessment>,
}

impl RoutingDecision {
    pub fn new(route: Route, handler: Handler, confidence: f32, payload: DecisionPayload) -> Self {
        Self {
            route,
            handler,
            confidence: confidence.clamp(0.0, 1.0),
            payload,
            safety: None,
        }
    }

    /// Single operation, dispatched directly or planned depending on its kind.
    pub fn operation(route: Route, confidence: f32, operation: Operation) -> Self {
        let handler = if operation.kind.needs_planning() {
            Handler::Planner
        } else {
            Handler::Operation
        };
        Self::new(
            route,
            handler,
            confidence,
            DecisionPayload::Operations {
                operations: vec![operation],
            },
        )
    }

    /// Several operations, always planned.
    pub fn plan(route: Route, confidence: f32, operations: Vec<Operation>) -> Self {
        Self::new(
            route,
            Handler::Planner,
            confidence,
            DecisionPayload::Operations { operations },
        )
    }

    pub fn operations(&self) -> &[Operation] {
        match &self.payload {
            DecisionPayload::Operations { operations } => operations,
            _ => &[],
        }
    }

    pub fn has_operations(&self) -> bool {
        !self.operations().is_empty()
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        let ops = self
            .operations()
            .iter()
            .map(Operation::summary)
            .collect::<Vec<_>>()
            .join("; ");
        if ops.is_empty() {
            format!("{} -> {} ({:.2})", self.route, self.handler.name(), self.confidence)
        } else {
            format!(
                "{} -> {} ({:.2}): {}",
                self.route,
                self.handler.name(),
                self.confidence,
                ops
            )
        }
    }
}
