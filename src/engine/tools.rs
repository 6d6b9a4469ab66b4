//! Operation handlers exposed as reasoning-loop tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::handlers::{HandlerTable, OperationHandler, Services};
use crate::executor::{Tool, ToolDescriptor, ToolError, ToolOutput, ToolRegistry};
use crate::session::SessionContext;
use crate::types::{ObjectReference, ObjectType, Operation, OperationKind, ReportType};

/// Tool name for an operation kind.
pub fn tool_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Create => "create_object",
        OperationKind::List => "list_objects",
        OperationKind::Get => "get_object",
        OperationKind::Update => "update_object",
        OperationKind::Delete => "delete_object",
        OperationKind::Analyze => "analyze_object",
        OperationKind::Link => "link_objects",
        OperationKind::Unlink => "unlink_objects",
        OperationKind::Compare => "compare_objects",
        OperationKind::GenerateReport => "generate_report",
    }
}

/// Keyword arguments accepted by every operation tool.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ToolArgs {
    #[serde(alias = "type")]
    object_type: Option<String>,
    name: Option<String>,
    subtype: Option<String>,
    description: Option<String>,
    abbreviation: Option<String>,
    new_name: Option<String>,
    names: Vec<String>,
    count: Option<usize>,
    subtype_filter: Option<String>,
    source_type: Option<String>,
    #[serde(alias = "source")]
    source_name: Option<String>,
    target_type: Option<String>,
    #[serde(alias = "target")]
    target_name: Option<String>,
    report_type: Option<String>,
    fields: BTreeMap<String, Value>,
    bulk: bool,
}

fn parse_type(field: &str, value: Option<&str>) -> Result<Option<ObjectType>, ToolError> {
    match value {
        None => Ok(None),
        Some(word) => ObjectType::from_word(word).map(Some).ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "{} '{}' is not an object type; use one of {}",
                field,
                word,
                ObjectType::ALL.map(|t| t.name()).join(", ")
            ))
        }),
    }
}

fn parse_report(value: &str) -> Result<ReportType, ToolError> {
    let slug = value.trim().to_lowercase().replace(['_', ' '], "-");
    [
        ReportType::InventoryOfAssets,
        ReportType::RiskAssessment,
        ReportType::StatementOfApplicability,
    ]
    .into_iter()
    .find(|r| r.slug() == slug)
    .ok_or_else(|| ToolError::InvalidArguments(format!("unknown report_type '{}'", value)))
}

impl ToolArgs {
    fn reference(
        field: &str,
        object_type: Option<&str>,
        name: Option<String>,
    ) -> Result<Option<ObjectReference>, ToolError> {
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };
        let object_type = parse_type(field, object_type)?
            .ok_or_else(|| ToolError::InvalidArguments(format!("{} is required", field)))?;
        Ok(Some(ObjectReference::named(object_type, name)))
    }

    fn into_operation(self, kind: OperationKind) -> Result<Operation, ToolError> {
        let object_type = parse_type("object_type", self.object_type.as_deref())?;
        let needs_type = !matches!(
            kind,
            OperationKind::Link | OperationKind::Unlink | OperationKind::Compare | OperationKind::GenerateReport
        );
        if needs_type && object_type.is_none() {
            return Err(ToolError::InvalidArguments("object_type is required".into()));
        }

        let mut op = Operation::new(kind, object_type);
        op.params.name = self.name;
        op.params.subtype = self.subtype;
        op.params.description = self.description;
        op.params.abbreviation = self.abbreviation;
        op.params.names = self.names;
        op.params.count = self.count;
        op.params.subtype_filter = self.subtype_filter;
        op.params.bulk = self.bulk;
        op.params.source = Self::reference("source_type", self.source_type.as_deref(), self.source_name)?;
        op.params.target = Self::reference("target_type", self.target_type.as_deref(), self.target_name)?;
        if let Some(report) = self.report_type.as_deref() {
            op.params.report_type = Some(parse_report(report)?);
        }
        if let Some(new_name) = self.new_name {
            op.params.fields.insert("new_name".to_string(), new_name);
        }
        for (key, value) in self.fields {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            op.params.fields.insert(key, text);
        }
        if op.object_type.is_none() {
            op.object_type = op.params.source.as_ref().map(|r| r.object_type);
        }
        Ok(op)
    }
}

fn parameters(kind: OperationKind) -> Value {
    let object_type = json!({
        "type": "string",
        "enum": ObjectType::ALL.map(|t| t.name()),
    });
    let string = json!({"type": "string"});
    let (properties, required) = match kind {
        OperationKind::Create => (
            json!({
                "object_type": object_type,
                "name": string,
                "subtype": string,
                "description": string,
                "abbreviation": string,
                "names": {"type": "array", "items": string},
                "count": {"type": "integer"},
            }),
            json!(["object_type"]),
        ),
        OperationKind::List => (
            json!({"object_type": object_type, "subtype_filter": string}),
            json!(["object_type"]),
        ),
        OperationKind::Get | OperationKind::Analyze => (
            json!({"object_type": object_type, "name": string}),
            json!(["object_type", "name"]),
        ),
        OperationKind::Update => (
            json!({
                "object_type": object_type,
                "name": string,
                "new_name": string,
                "subtype": string,
                "description": string,
                "abbreviation": string,
                "fields": {"type": "object"},
            }),
            json!(["object_type", "name"]),
        ),
        OperationKind::Delete => (
            json!({
                "object_type": object_type,
                "name": string,
                "names": {"type": "array", "items": string},
                "bulk": {"type": "boolean"},
            }),
            json!(["object_type"]),
        ),
        OperationKind::Link | OperationKind::Unlink | OperationKind::Compare => (
            json!({
                "source_type": object_type,
                "source_name": string,
                "target_type": object_type,
                "target_name": string,
            }),
            json!(["source_type", "source_name", "target_type", "target_name"]),
        ),
        OperationKind::GenerateReport => (
            json!({
                "report_type": {
                    "type": "string",
                    "enum": ["inventory-of-assets", "risk-assessment", "statement-of-applicability"],
                },
                "target_type": {"type": "string", "enum": ["scope"]},
                "target_name": string,
            }),
            json!(["report_type"]),
        ),
    };
    json!({"type": "object", "properties": properties, "required": required})
}

/// Adapts one [`OperationHandler`] to the [`Tool`] interface.
pub struct OperationTool {
    handler: Arc<dyn OperationHandler>,
    services: Arc<Services>,
}

impl OperationTool {
    pub fn new(handler: Arc<dyn OperationHandler>, services: Arc<Services>) -> Self {
        Self { handler, services }
    }
}

#[async_trait]
impl Tool for OperationTool {
    fn descriptor(&self) -> ToolDescriptor {
        let kind = self.handler.kind();
        ToolDescriptor {
            name: tool_name(kind).to_string(),
            description: self.handler.description().to_string(),
            parameters: parameters(kind),
        }
    }

    async fn invoke(
        &self,
        arguments: Value,
        session: &mut SessionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: ToolArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let op = args.into_operation(self.handler.kind())?;
        match self.handler.handle(&op, &self.services, session).await {
            Ok(reply) if reply.needs_input => {
                // the loop can't answer for the user; drop the question
                session.abandon_selection();
                Ok(ToolOutput::failed(format!(
                    "more input needed: {}",
                    reply.message.replace('\n', " ")
                )))
            }
            Ok(reply) => Ok(ToolOutput::ok(reply.message).with_data(reply.data)),
            Err(e) => Ok(ToolOutput::failed(e.user_message())),
        }
    }
}

/// A registry with one tool per registered handler.
pub fn operation_tools(handlers: &HandlerTable, services: Arc<Services>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in handlers.kinds() {
        if let Some(handler) = handlers.get(kind) {
            registry.register(Arc::new(OperationTool::new(handler, services.clone())));
        }
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfig;
    use crate::resolution::SubtypeMatcher;
    use crate::store::InMemoryStore;

    fn registry(store: Arc<InMemoryStore>) -> ToolRegistry {
        let services = Arc::new(Services::new(store, SubtypeMatcher::new(), &ResolverConfig::default()));
        operation_tools(&HandlerTable::standard(), services)
    }

    #[test]
    fn test_every_kind_has_a_tool() {
        let registry = registry(Arc::new(InMemoryStore::new()));
        assert_eq!(registry.len(), OperationKind::ALL.len());
        assert!(registry.contains("link_objects"));
        assert!(registry.contains("generate_report"));
    }

    #[tokio::test]
    async fn test_create_then_link_through_tools() {
        let store = Arc::new(InMemoryStore::new().with_container("dom-1", "ISMS"));
        store.seed("dom-1", ObjectType::Scope, "Alpha", None);
        let registry = registry(store.clone());
        let mut session = SessionContext::new();

        let created = registry
            .invoke("create_object", json!({"object_type": "asset", "name": "Desktop"}), &mut session)
            .await;
        assert!(created.starts_with("Created asset 'Desktop'"));

        let linked = registry
            .invoke(
                "link_objects",
                json!({"source_type": "asset", "source_name": "Desktop", "target_type": "scope", "target_name": "Alpha"}),
                &mut session,
            )
            .await;
        assert!(linked.starts_with("Linked asset 'Desktop' to scope 'Alpha'"), "{}", linked);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_observations() {
        let registry = registry(Arc::new(InMemoryStore::new()));
        let mut session = SessionContext::new();
        let out = registry
            .invoke("get_object", json!({"object_type": "spaceship", "name": "X"}), &mut session)
            .await;
        assert!(out.starts_with("Error: invalid arguments"));

        let out = registry
            .invoke("get_object", json!({"object_type": "asset", "name": "Ghost"}), &mut session)
            .await;
        assert!(out.starts_with("Error: I couldn't find any asset called 'Ghost'"), "{}", out);
    }
}
