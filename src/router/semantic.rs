//! Language-model semantic parse.
//!
//! Only consulted for what the pattern layers cannot express confidently:
//! linking, comparison, analysis and multi-object creation. The model is
//! shown the operation catalog with worked examples and must answer with a
//! JSON plan, which is validated before use.

use std::sync::Arc;

use async_trait::async_trait;
use isms_llm::{GenerateRequest, LanguageModel};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::decision::{Route, RoutingDecision};
use super::lexicon;
use super::{RouteInput, RouteStrategy};
use crate::error::Result;
use crate::session::SessionContext;
use crate::structured_output::parse_structured;
use crate::types::{ObjectReference, ObjectType, Operation, OperationKind};

const SEMANTIC_SYSTEM_PROMPT: &str = r#"You translate requests for an ISMS compliance platform into operations.

Operations:
- create: {"operation": "create", "object_type": "<type>", "name": "<name>", "subtype": "<optional>"}
- link: {"operation": "link", "source": {"type": "<type>", "name": "<name>"}, "target": {"type": "<type>", "name": "<name>"}}
- unlink: same shape as link
- compare: same shape as link
- analyze: {"operation": "analyze", "object_type": "<type>", "name": "<name>"}
- delete: {"operation": "delete", "object_type": "<type>", "name": "<name>"}

Object types: scope, asset, control, person, process, document, incident, scenario.

Examples:
"put the mail server into the Finance scope" ->
{"operations": [{"operation": "link", "source": {"type": "asset", "name": "mail server"}, "target": {"type": "scope", "name": "Finance"}}], "confidence": 0.9}
"create asset Laptop and add it to scope HR" ->
{"operations": [{"operation": "create", "object_type": "asset", "name": "Laptop"}, {"operation": "link", "source": {"type": "asset", "name": "Laptop"}, "target": {"type": "scope", "name": "HR"}}], "confidence": 0.85}
"how do I link an asset to a scope?" ->
{"operations": [], "confidence": 0.9}
"what is the difference between a scope and a process?" ->
{"operations": [], "confidence": 0.9}

Questions about how the platform works are never operations. Respond with JSON only:
{"operations": [...], "confidence": <0.0-1.0>}"#;

#[derive(Debug, Deserialize)]
struct SemanticPlan {
    operations: Vec<PlannedOperation>,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct PlannedOperation {
    #[serde(alias = "action")]
    operation: String,
    #[serde(default, alias = "type")]
    object_type: Option<ObjectType>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    source: Option<PlannedReference>,
    #[serde(default)]
    target: Option<PlannedReference>,
}

#[derive(Debug, Deserialize)]
struct PlannedReference {
    #[serde(rename = "type", alias = "object_type")]
    object_type: ObjectType,
    name: String,
}

impl PlannedReference {
    fn into_reference(self) -> ObjectReference {
        ObjectReference::named(self.object_type, self.name)
    }
}

impl PlannedOperation {
    fn into_operation(self) -> Option<Operation> {
        let kind = OperationKind::from_name(&self.operation)?;
        let source = self.source.map(PlannedReference::into_reference);
        let object_type = self.object_type.or(source.as_ref().map(|s| s.object_type));
        let mut op = Operation::new(kind, object_type);
        op.params.name = self.name;
        op.params.subtype = self.subtype;
        op.params.source = source;
        op.params.target = self.target.map(PlannedReference::into_reference);

        let complete = match kind {
            OperationKind::Link | OperationKind::Unlink | OperationKind::Compare => {
                op.params.source.is_some() && op.params.target.is_some()
            }
            OperationKind::List => op.object_type.is_some(),
            _ => op.object_type.is_some() && op.params.name.is_some(),
        };
        complete.then_some(op)
    }
}

/// Whether the message is worth a model call.
fn wants_semantic_parse(lower: &str) -> bool {
    let creates = lexicon::words(lower)
        .iter()
        .filter(|w| w.as_str() == "create")
        .count();
    lexicon::mentions_planning_verb(lower) || creates > 1
}

pub struct SemanticParseStrategy {
    model: Option<Arc<dyn LanguageModel>>,
}

impl SemanticParseStrategy {
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl RouteStrategy for SemanticParseStrategy {
    fn name(&self) -> &'static str {
        "semantic_parse"
    }

    async fn evaluate(
        &self,
        input: &RouteInput,
        _session: &SessionContext,
    ) -> Result<Option<RoutingDecision>> {
        let Some(model) = &self.model else {
            return Ok(None);
        };
        if !wants_semantic_parse(&input.lower)
            || (lexicon::is_question(&input.lower) && !lexicon::question_allowed(&input.lower))
        {
            return Ok(None);
        }

        let request =
            GenerateRequest::new(SEMANTIC_SYSTEM_PROMPT, format!("Request: {}", input.text))
                .max_tokens(600)
                .json();
        let text = match model.generate(&request).await {
            Ok(text) => text,
            Err(e) if e.is_quota() => {
                info!(model = model.model_name(), "Model quota exhausted, using deterministic patterns");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Semantic parse failed");
                return Ok(None);
            }
        };

        let plan = match parse_structured::<SemanticPlan>(&text, &["operations"]) {
            Ok(plan) => plan,
            Err(e) => {
                debug!(error = %e, "Semantic parse output rejected");
                return Ok(None);
            }
        };
        let confidence = plan.confidence.unwrap_or(0.75);
        let planned = plan.operations.len();
        let operations: Vec<Operation> = plan
            .operations
            .into_iter()
            .filter_map(PlannedOperation::into_operation)
            .collect();
        if operations.is_empty() || operations.len() != planned {
            debug!(planned, usable = operations.len(), "Semantic plan incomplete");
            return Ok(None);
        }

        let decision = if operations.len() == 1 {
            let op = operations.into_iter().next();
            op.map(|op| RoutingDecision::operation(Route::SemanticParse, confidence, op))
        } else {
            Some(RoutingDecision::plan(Route::SemanticParse, confidence, operations))
        };
        Ok(decision)
    }
}
