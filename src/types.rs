//! Core domain types shared by the router, resolver and executor.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Object types
// ============================================================================

/// Typed compliance object kinds known to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Scope,
    Asset,
    Control,
    Person,
    Process,
    Document,
    Incident,
    Scenario,
}

impl ObjectType {
    pub const ALL: [ObjectType; 8] = [
        ObjectType::Scope,
        ObjectType::Asset,
        ObjectType::Control,
        ObjectType::Person,
        ObjectType::Process,
        ObjectType::Document,
        ObjectType::Incident,
        ObjectType::Scenario,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ObjectType::Scope => "scope",
            ObjectType::Asset => "asset",
            ObjectType::Control => "control",
            ObjectType::Person => "person",
            ObjectType::Process => "process",
            ObjectType::Document => "document",
            ObjectType::Incident => "incident",
            ObjectType::Scenario => "scenario",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            ObjectType::Scope => "scopes",
            ObjectType::Asset => "assets",
            ObjectType::Control => "controls",
            ObjectType::Person => "persons",
            ObjectType::Process => "processes",
            ObjectType::Document => "documents",
            ObjectType::Incident => "incidents",
            ObjectType::Scenario => "scenarios",
        }
    }

    /// Prefix the platform puts on canonical subtype labels (`AST_IT-System`).
    pub fn subtype_prefix(&self) -> &'static str {
        match self {
            ObjectType::Scope => "SCP_",
            ObjectType::Asset => "AST_",
            ObjectType::Control => "CTL_",
            ObjectType::Person => "PER_",
            ObjectType::Process => "PRO_",
            ObjectType::Document => "DOC_",
            ObjectType::Incident => "INC_",
            ObjectType::Scenario => "SCN_",
        }
    }

    /// Parse a single word, singular or plural, case-insensitive.
    ///
    /// `people` maps to `Person`.
    pub fn from_word(word: &str) -> Option<Self> {
        let lower = word.trim().to_lowercase();
        match lower.as_str() {
            "people" => return Some(ObjectType::Person),
            "processes" => return Some(ObjectType::Process),
            _ => {}
        }
        ObjectType::ALL
            .iter()
            .copied()
            .find(|t| t.name() == lower || t.plural() == lower)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Operations
// ============================================================================

/// The operations an utterance can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    List,
    Get,
    Update,
    Delete,
    Analyze,
    Link,
    Unlink,
    Compare,
    GenerateReport,
}

impl OperationKind {
    pub const ALL: [OperationKind; 10] = [
        OperationKind::Create,
        OperationKind::List,
        OperationKind::Get,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::Analyze,
        OperationKind::Link,
        OperationKind::Unlink,
        OperationKind::Compare,
        OperationKind::GenerateReport,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::List => "list",
            OperationKind::Get => "get",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Analyze => "analyze",
            OperationKind::Link => "link",
            OperationKind::Unlink => "unlink",
            OperationKind::Compare => "compare",
            OperationKind::GenerateReport => "generate_report",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_lowercase();
        OperationKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == lower)
    }

    /// Whether executing this operation changes platform state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Create
                | OperationKind::Update
                | OperationKind::Delete
                | OperationKind::Link
                | OperationKind::Unlink
        )
    }

    /// Operations that benefit from multi-step planning in the reasoning loop.
    pub fn needs_planning(&self) -> bool {
        matches!(
            self,
            OperationKind::Link
                | OperationKind::Unlink
                | OperationKind::Compare
                | OperationKind::Analyze
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Report templates the platform can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportType {
    InventoryOfAssets,
    RiskAssessment,
    StatementOfApplicability,
}

impl ReportType {
    pub fn slug(&self) -> &'static str {
        match self {
            ReportType::InventoryOfAssets => "inventory-of-assets",
            ReportType::RiskAssessment => "risk-assessment",
            ReportType::StatementOfApplicability => "statement-of-applicability",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ReportType::InventoryOfAssets => "Inventory of Assets",
            ReportType::RiskAssessment => "Risk Assessment",
            ReportType::StatementOfApplicability => "Statement of Applicability",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// A typed reference to a platform object.
///
/// Built per request and discarded after resolution. `canonical_id` and
/// `container_id` stay `None` until the entity resolver fills them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    pub object_type: ObjectType,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Set when the reference names a whole subtype ("all DPOs") rather than one object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl ObjectReference {
    pub fn named(object_type: ObjectType, display_name: impl Into<String>) -> Self {
        Self {
            object_type,
            display_name: display_name.into(),
            canonical_id: None,
            container_id: None,
            subtype: None,
        }
    }

    /// Reference to every object of a subtype.
    pub fn of_subtype(object_type: ObjectType, subtype: impl Into<String>) -> Self {
        Self {
            object_type,
            display_name: String::new(),
            canonical_id: None,
            container_id: None,
            subtype: Some(subtype.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.canonical_id.is_some()
    }
}

/// Parameters extracted from an utterance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectReference>,
    /// Explicit names for bulk creation or bulk role assignment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<ReportType>,
    /// Subtype filter on list operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype_filter: Option<String>,
    /// Remaining field updates (`status`, `new_name`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub bulk: bool,
    /// The subtype was detected before the object type ("create Controllers named X").
    #[serde(default)]
    pub subtype_first: bool,
    /// "what is the DESKTOP asset type" asks for the subtype only.
    #[serde(default)]
    pub return_subtype: bool,
}

/// A structured operation the engine can dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<ObjectType>,
    #[serde(default)]
    pub params: OperationParams,
}

impl Operation {
    pub fn new(kind: OperationKind, object_type: Option<ObjectType>) -> Self {
        Self {
            kind,
            object_type,
            params: OperationParams::default(),
        }
    }

    pub fn on(kind: OperationKind, object_type: ObjectType) -> Self {
        Self::new(kind, Some(object_type))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.params.name = Some(name.into());
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.params.subtype = Some(subtype.into());
        self
    }

    pub fn with_source(mut self, source: ObjectReference) -> Self {
        self.params.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: ObjectReference) -> Self {
        self.params.target = Some(target);
        self
    }

    pub fn bulk(mut self) -> Self {
        self.params.bulk = true;
        self
    }

    /// One-line description for logs and confirmations.
    pub fn summary(&self) -> String {
        let mut out = self.kind.name().to_string();
        if let Some(t) = self.object_type {
            out.push(' ');
            out.push_str(t.name());
        }
        if let Some(name) = &self.params.name {
            out.push_str(&format!(" '{}'", name));
        }
        if let Some(src) = &self.params.source {
            out.push_str(&format!(" {} '{}'", src.object_type, src.display_name));
        }
        if let Some(tgt) = &self.params.target {
            out.push_str(&format!(" -> {} '{}'", tgt.object_type, tgt.display_name));
        }
        if self.params.bulk {
            out.push_str(" (bulk)");
        }
        out
    }
}

// ============================================================================
// Utterances
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Structured context that accompanies an utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub recent_turns: Vec<ConversationTurn>,
    /// Names of files or documents attached to the session.
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl ConversationContext {
    /// Stable fingerprint used as part of cache keys.
    pub fn fingerprint(&self) -> String {
        let last = self
            .recent_turns
            .iter()
            .rev()
            .take(2)
            .map(|t| t.content.to_lowercase())
            .collect::<Vec<_>>()
            .join("|");
        format!("{}#{}", last, self.attachments.len())
    }
}

/// One turn of free-form user text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    #[serde(default)]
    pub context: ConversationContext,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: ConversationContext::default(),
        }
    }

    pub fn with_context(text: impl Into<String>, context: ConversationContext) -> Self {
        Self {
            text: text.into(),
            context,
        }
    }
}

impl From<&str> for Utterance {
    fn from(text: &str) -> Self {
        Utterance::new(text)
    }
}

// ============================================================================
// Executor audit
// ============================================================================

/// Audit record of one tool invocation in the reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub iteration: usize,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub observation_summary: String,
}
