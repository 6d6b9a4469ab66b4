//! Operation handlers
//!
//! One handler per [`OperationKind`], registered in a [`HandlerTable`].
//! Handlers talk to the store only through [`Services`] and report
//! "which one?" questions by opening a [`PendingSelection`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{EngineError, Result};
use crate::resolution::{display_label, EntityResolver, ResolvedObject, SubtypeChoice, SubtypeMatcher};
use crate::session::{PendingSelection, SessionContext};
use crate::store::{NewObject, ObjectFields, ObjectStore, StoreError, StoredObject, PARTS_FIELD};
use crate::types::{ObjectReference, ObjectType, Operation, OperationKind, ReportType};

// ============================================================================
// Services
// ============================================================================

/// Collaborators shared by every handler.
pub struct Services {
    pub store: Arc<dyn ObjectStore>,
    pub resolver: EntityResolver,
    pub matcher: SubtypeMatcher,
    pub default_container: Option<String>,
}

impl Services {
    pub fn new(store: Arc<dyn ObjectStore>, matcher: SubtypeMatcher, config: &ResolverConfig) -> Self {
        Self {
            resolver: EntityResolver::new(store.clone())
                .with_overlap_threshold(config.token_overlap_threshold),
            store,
            matcher,
            default_container: config.default_container_id.clone(),
        }
    }

    /// Container new objects go into: the default, else the first listed.
    pub async fn container_for_create(&self, object_type: ObjectType) -> Result<String> {
        if let Some(c) = &self.default_container {
            return Ok(c.clone());
        }
        self.store
            .list_containers()
            .await?
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "There is no container to create the {} in yet.",
                    object_type
                ))
            })
    }

    /// Subtype labels for a type: the default container's catalog, or the
    /// union over every container in listing order.
    pub async fn subtype_catalog(&self, object_type: ObjectType) -> Result<Vec<String>> {
        if let Some(c) = &self.default_container {
            return Ok(self.store.get_subtypes(c, object_type).await?);
        }
        let mut seen = BTreeSet::new();
        let mut labels = Vec::new();
        for container in self.store.list_containers().await? {
            for label in self.store.get_subtypes(&container.id, object_type).await? {
                if seen.insert(label.to_lowercase()) {
                    labels.push(label);
                }
            }
        }
        Ok(labels)
    }

    /// Resolve a reference or fail with `NotFound`.
    ///
    /// The resolver swallows store failures, so a miss is followed by one
    /// container listing to tell "absent" from "unreachable".
    pub async fn resolve(
        &self,
        reference: &ObjectReference,
        session: &SessionContext,
    ) -> Result<ResolvedObject> {
        let container = reference
            .container_id
            .as_deref()
            .or(self.default_container.as_deref());
        let literal = reference.canonical_id.as_deref().unwrap_or(&reference.display_name);
        if let Some(hit) = self
            .resolver
            .resolve(reference.object_type, literal, container, session)
            .await
        {
            return Ok(hit);
        }
        self.store.list_containers().await?;
        Err(EngineError::not_found(reference.object_type, reference.display_name.clone()))
    }

    /// Resolve and load the full object.
    pub async fn fetch(
        &self,
        reference: &ObjectReference,
        session: &SessionContext,
    ) -> Result<StoredObject> {
        let resolved = self.resolve(reference, session).await?;
        self.store
            .get_object(reference.object_type, &resolved.container_id, &resolved.canonical_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    EngineError::not_found(reference.object_type, reference.display_name.clone())
                }
                other => EngineError::Connection(other),
            })
    }
}

// ============================================================================
// Handler contract
// ============================================================================

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReply {
    pub message: String,
    pub data: Value,
    /// A pending selection was opened; the message is the question.
    pub needs_input: bool,
}

impl HandlerReply {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Value::Null,
            needs_input: false,
        }
    }

    pub fn ask(message: impl Into<String>) -> Self {
        Self {
            needs_input: true,
            ..Self::done(message)
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// One line for the tool table.
    fn description(&self) -> &'static str;

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply>;
}

/// `OperationKind` → handler.
pub struct HandlerTable {
    handlers: HashMap<OperationKind, Arc<dyn OperationHandler>>,
}

impl HandlerTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Every built-in handler.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(Arc::new(CreateHandler));
        table.register(Arc::new(ListHandler));
        table.register(Arc::new(GetHandler));
        table.register(Arc::new(UpdateHandler));
        table.register(Arc::new(DeleteHandler));
        table.register(Arc::new(LinkHandler { unlink: false }));
        table.register(Arc::new(LinkHandler { unlink: true }));
        table.register(Arc::new(CompareHandler));
        table.register(Arc::new(AnalyzeHandler));
        table.register(Arc::new(ReportHandler));
        table
    }

    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        let kind = handler.kind();
        if self.handlers.insert(kind, handler).is_some() {
            warn!(%kind, "Handler registration replaced an existing handler");
        }
    }

    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, in declaration order.
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub async fn dispatch(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let handler = self.get(op.kind).ok_or_else(|| {
            EngineError::validation(format!("I can't {} objects yet.", op.kind))
        })?;
        debug!(op = %op.summary(), "Dispatching operation");
        handler.handle(op, services, session).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn require_type(op: &Operation) -> Result<ObjectType> {
    op.object_type.ok_or_else(|| {
        EngineError::validation("Which kind of object do you mean? For example scope, asset or person.")
    })
}

fn require_name(op: &Operation, object_type: ObjectType) -> Result<String> {
    op.params
        .name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| EngineError::validation(format!("Which {} do you mean? Please give its name.", object_type)))
}

fn numbered(options: &[String]) -> String {
    options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}. {}", i + 1, display_label(o)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn capitalized(object_type: ObjectType) -> String {
    capitalize_first(object_type.name())
}

fn summary_line(object: &StoredObject) -> String {
    match &object.subtype {
        Some(s) => format!("- {} ({})", object.name, display_label(s)),
        None => format!("- {}", object.name),
    }
}

fn object_data(object: &StoredObject) -> Value {
    serde_json::to_value(object).unwrap_or(Value::Null)
}

// ============================================================================
// create
// ============================================================================

pub struct CreateHandler;

impl CreateHandler {
    /// Names for a counted create: the given ones, then "Person 4", "Person 5", ...
    fn names_for(op: &Operation, object_type: ObjectType) -> Vec<String> {
        let mut names = op.params.names.clone();
        let count = op.params.count.unwrap_or(0).max(names.len());
        for i in names.len()..count {
            names.push(format!("{} {}", capitalized(object_type), i + 1));
        }
        names
    }
}

#[async_trait]
impl OperationHandler for CreateHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Create
    }

    fn description(&self) -> &'static str {
        "Create an object of a type, optionally with a subtype, description and abbreviation"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let object_type = require_type(op)?;
        let names = if op.params.count.is_some() || op.params.names.len() > 1 {
            Self::names_for(op, object_type)
        } else {
            vec![require_name(op, object_type)?]
        };
        if names.is_empty() {
            return Err(EngineError::validation(format!(
                "How many {} should I create?",
                object_type.plural()
            )));
        }

        let container_id = services.container_for_create(object_type).await?;
        let catalog = services.store.get_subtypes(&container_id, object_type).await?;
        let subtype = match services.matcher.choose(op.params.subtype.as_deref(), &catalog) {
            SubtypeChoice::NoCatalog => None,
            SubtypeChoice::Selected(s) => Some(s),
            SubtypeChoice::Ambiguous { options } => {
                let question = format!(
                    "Which subtype should the new {} use?\n{}",
                    object_type,
                    numbered(&options)
                );
                session.begin_selection(PendingSelection::Subtype {
                    operation: op.clone(),
                    options,
                })?;
                return Ok(HandlerReply::ask(question));
            }
            SubtypeChoice::Unmatched { provided, options } => {
                let question = format!(
                    "'{}' isn't a {} subtype I know. Which one did you mean?\n{}",
                    provided,
                    object_type,
                    numbered(&options)
                );
                let mut retry = op.clone();
                retry.params.subtype = None;
                session.begin_selection(PendingSelection::Subtype {
                    operation: retry,
                    options,
                })?;
                return Ok(HandlerReply::ask(question));
            }
        };

        let mut created = Vec::new();
        for name in &names {
            let request = NewObject {
                object_type,
                container_id: container_id.clone(),
                unit_id: None,
                name: name.clone(),
                subtype: subtype.clone(),
                description: op.params.description.clone(),
                abbreviation: op.params.abbreviation.clone(),
            };
            let id = services.store.create_object(&request).await?;
            if let Some(previous) = session.created.insert(object_type, name, &id, &container_id) {
                debug!(name = %name, previous = %previous.canonical_id, "Cache entry replaced");
            }
            info!(%object_type, name = %name, id = %id, "Object created");
            created.push(json!({"id": id, "name": name, "container_id": container_id}));
        }

        let suffix = subtype
            .as_deref()
            .map(|s| format!(" with subtype {}", display_label(s)))
            .unwrap_or_default();
        let message = if names.len() == 1 {
            format!("Created {} '{}'{}.", object_type, names[0], suffix)
        } else {
            format!(
                "Created {} {}{}: {}.",
                names.len(),
                object_type.plural(),
                suffix,
                names.join(", ")
            )
        };
        Ok(HandlerReply::done(message).with_data(json!({"created": created, "subtype": subtype})))
    }
}

// ============================================================================
// list
// ============================================================================

pub struct ListHandler;

#[async_trait]
impl OperationHandler for ListHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::List
    }

    fn description(&self) -> &'static str {
        "List objects of a type, optionally filtered by subtype"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let object_type = require_type(op)?;
        let mut items = services
            .store
            .list_objects(object_type, services.default_container.as_deref())
            .await?;

        let mut filter_label = None;
        if let Some(filter) = op.params.subtype_filter.as_deref() {
            let mut labels = services.subtype_catalog(object_type).await?;
            for s in items.iter().filter_map(|o| o.subtype.as_ref()) {
                if !labels.iter().any(|l| l.eq_ignore_ascii_case(s)) {
                    labels.push(s.clone());
                }
            }
            let Some(label) = services.matcher.match_label(filter, &labels) else {
                return Err(EngineError::SubtypeMismatch {
                    object_type,
                    provided: filter.to_string(),
                    available: labels.iter().map(|l| display_label(l)).collect(),
                });
            };
            items.retain(|o| o.subtype.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(&label)));
            filter_label = Some(label);
        }

        let qualifier = filter_label
            .as_deref()
            .map(|l| format!(" with subtype {}", display_label(l)))
            .unwrap_or_default();
        let message = if items.is_empty() {
            format!("No {}{} found.", object_type.plural(), qualifier)
        } else {
            let lines = items.iter().map(summary_line).collect::<Vec<_>>().join("\n");
            format!("Found {} {}{}:\n{}", items.len(), object_type.plural(), qualifier, lines)
        };
        let data = json!({
            "count": items.len(),
            "subtype": filter_label,
            "items": items.iter().map(object_data).collect::<Vec<_>>(),
        });
        session.record_list(object_type, items);
        Ok(HandlerReply::done(message).with_data(data))
    }
}

// ============================================================================
// get
// ============================================================================

pub struct GetHandler;

#[async_trait]
impl OperationHandler for GetHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Get
    }

    fn description(&self) -> &'static str {
        "Show the details of one object"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let object_type = require_type(op)?;
        let name = require_name(op, object_type)?;
        let object = services
            .fetch(&ObjectReference::named(object_type, name), session)
            .await?;

        if op.params.return_subtype {
            let message = match &object.subtype {
                Some(s) => format!("The {} '{}' has subtype {}.", object_type, object.name, display_label(s)),
                None => format!("The {} '{}' has no subtype.", object_type, object.name),
            };
            return Ok(HandlerReply::done(message).with_data(json!({"subtype": object.subtype})));
        }

        let mut lines = vec![format!("{} '{}'", capitalized(object_type), object.name)];
        if let Some(s) = &object.subtype {
            lines.push(format!("Subtype: {}", display_label(s)));
        }
        if let Some(d) = &object.description {
            lines.push(format!("Description: {}", d));
        }
        if let Some(a) = &object.abbreviation {
            lines.push(format!("Abbreviation: {}", a));
        }
        let parts = object.part_ids().len();
        if parts > 0 {
            lines.push(format!("Linked objects: {}", parts));
        }
        for (key, value) in object.fields.iter().filter(|(k, _)| k.as_str() != PARTS_FIELD) {
            let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            lines.push(format!("{}: {}", key, shown));
        }
        Ok(HandlerReply::done(lines.join("\n")).with_data(object_data(&object)))
    }
}

// ============================================================================
// update
// ============================================================================

pub struct UpdateHandler;

impl UpdateHandler {
    async fn update_one(
        op: &Operation,
        object_type: ObjectType,
        name: &str,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<(StoredObject, ObjectFields, Option<String>)> {
        let object = services
            .fetch(&ObjectReference::named(object_type, name), session)
            .await?;
        let container_id = object.container_id.clone().unwrap_or_default();

        let mut fields = ObjectFields::new();
        let mut new_name = None;
        for (key, value) in &op.params.fields {
            if key == "new_name" || key == "name" {
                new_name = Some(value.clone());
                fields.insert("name".to_string(), Value::String(value.clone()));
            } else {
                fields.insert(key.clone(), Value::String(value.clone()));
            }
        }
        if let Some(d) = &op.params.description {
            fields.insert("description".to_string(), Value::String(d.clone()));
        }
        if let Some(a) = &op.params.abbreviation {
            fields.insert("abbreviation".to_string(), Value::String(a.clone()));
        }

        if let Some(provided) = op.params.subtype.as_deref() {
            let catalog = services.store.get_subtypes(&container_id, object_type).await?;
            let label = match services.matcher.choose(Some(provided), &catalog) {
                SubtypeChoice::Selected(s) => s,
                SubtypeChoice::NoCatalog => provided.to_string(),
                SubtypeChoice::Unmatched { options, .. } | SubtypeChoice::Ambiguous { options } => {
                    return Err(EngineError::SubtypeMismatch {
                        object_type,
                        provided: provided.to_string(),
                        available: options.iter().map(|o| display_label(o)).collect(),
                    });
                }
            };
            // the platform refuses to change a subtype once set
            if let Some(current) = object.subtype.as_deref() {
                if !current.eq_ignore_ascii_case(&label) {
                    return Err(EngineError::SubtypeMismatch {
                        object_type,
                        provided: display_label(&label),
                        available: Vec::new(),
                    });
                }
            }
            fields.insert("subtype".to_string(), Value::String(label));
        }

        if fields.is_empty() {
            return Err(EngineError::validation(format!(
                "What should I change on {} '{}'?",
                object_type, object.name
            )));
        }

        services
            .store
            .update_object(object_type, &container_id, &object.id, &fields)
            .await?;
        if let Some(new_name) = &new_name {
            session.created.rekey(object_type, &object.name, new_name);
        }
        Ok((object, fields, new_name))
    }
}

#[async_trait]
impl OperationHandler for UpdateHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Update
    }

    fn description(&self) -> &'static str {
        "Change the name, subtype, description or another field of one or more objects"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let object_type = require_type(op)?;
        // "assign role DPO to Alice and Bob" carries several names
        let names = match &op.params.name {
            Some(name) if !name.trim().is_empty() => vec![name.clone()],
            _ if !op.params.names.is_empty() => op.params.names.clone(),
            _ => vec![require_name(op, object_type)?],
        };

        let mut updated = Vec::new();
        let mut changed = Vec::new();
        for name in &names {
            let (object, fields, new_name) =
                Self::update_one(op, object_type, name, services, session).await?;
            changed = fields.keys().cloned().collect();
            info!(%object_type, id = %object.id, fields = %changed.join(", "), "Object updated");
            updated.push(json!({
                "id": object.id,
                "name": new_name.unwrap_or(object.name),
                "fields": fields,
            }));
        }

        let shown: Vec<&str> = updated.iter().filter_map(|u| u["name"].as_str()).collect();
        let message = if shown.len() == 1 {
            format!("Updated {} '{}' ({}).", object_type, shown[0], changed.join(", "))
        } else {
            format!(
                "Updated {} {} ({}): {}.",
                shown.len(),
                object_type.plural(),
                changed.join(", "),
                shown.join(", ")
            )
        };
        Ok(HandlerReply::done(message).with_data(json!({"updated": updated})))
    }
}

// ============================================================================
// delete
// ============================================================================

pub struct DeleteHandler;

impl DeleteHandler {
    /// Objects a bulk delete applies to.
    async fn bulk_targets(
        op: &Operation,
        object_type: ObjectType,
        services: &Services,
        session: &SessionContext,
    ) -> Result<(Vec<StoredObject>, Vec<String>)> {
        if op.params.names.is_empty() {
            let items = services
                .store
                .list_objects(object_type, services.default_container.as_deref())
                .await?;
            return Ok((items, Vec::new()));
        }

        let listed = session
            .last_list
            .as_ref()
            .filter(|l| l.object_type == object_type);
        let mut targets = Vec::new();
        let mut missing = Vec::new();
        for name in &op.params.names {
            if let Some(item) = listed.and_then(|l| l.items.iter().find(|o| o.name == *name)) {
                targets.push(item.clone());
                continue;
            }
            match services
                .fetch(&ObjectReference::named(object_type, name.clone()), session)
                .await
            {
                Ok(object) => targets.push(object),
                Err(EngineError::NotFound { .. }) => missing.push(name.clone()),
                Err(e) => return Err(e),
            }
        }
        Ok((targets, missing))
    }
}

#[async_trait]
impl OperationHandler for DeleteHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Delete
    }

    fn description(&self) -> &'static str {
        "Delete one object, or every listed object of a type"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let object_type = require_type(op)?;
        let (targets, missing) = if op.params.bulk {
            Self::bulk_targets(op, object_type, services, session).await?
        } else {
            let name = require_name(op, object_type)?;
            let object = services
                .fetch(&ObjectReference::named(object_type, name), session)
                .await?;
            (vec![object], Vec::new())
        };

        if targets.is_empty() {
            return Ok(HandlerReply::done(format!("There are no {} to delete.", object_type.plural())));
        }

        let mut deleted = Vec::new();
        for object in &targets {
            let container_id = object.container_id.clone().unwrap_or_default();
            services
                .store
                .delete_object(object_type, &container_id, &object.id)
                .await?;
            session.created.remove_id(&object.id);
            deleted.push(object.name.clone());
        }
        if let Some(list) = session.last_list.as_mut() {
            list.items.retain(|o| !targets.iter().any(|t| t.id == o.id));
        }
        info!(%object_type, count = deleted.len(), "Objects deleted");

        let mut message = if deleted.len() == 1 {
            format!("Deleted {} '{}'.", object_type, deleted[0])
        } else {
            format!("Deleted {} {}: {}.", deleted.len(), object_type.plural(), deleted.join(", "))
        };
        if !missing.is_empty() {
            message.push_str(&format!(" Not found: {}.", missing.join(", ")));
        }
        Ok(HandlerReply::done(message).with_data(json!({"deleted": deleted, "missing": missing})))
    }
}

// ============================================================================
// link / unlink
// ============================================================================

/// Adds (or removes) the source id in the target's `parts` field. When
/// exactly one side is a scope, the scope is the container and becomes
/// the target.
pub struct LinkHandler {
    unlink: bool,
}

fn sides(op: &Operation) -> Result<(ObjectReference, ObjectReference)> {
    match (&op.params.source, &op.params.target) {
        (Some(s), Some(t)) => Ok((s.clone(), t.clone())),
        _ => Err(EngineError::validation(format!(
            "Which two objects should I {}? For example '{} asset Desktop to scope Alpha'.",
            op.kind, op.kind
        ))),
    }
}

#[async_trait]
impl OperationHandler for LinkHandler {
    fn kind(&self) -> OperationKind {
        if self.unlink {
            OperationKind::Unlink
        } else {
            OperationKind::Link
        }
    }

    fn description(&self) -> &'static str {
        if self.unlink {
            "Remove the link between two objects"
        } else {
            "Link a source object into a target object (a scope contains its assets, persons and so on)"
        }
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let (mut source, mut target) = sides(op)?;
        if source.object_type == ObjectType::Scope && target.object_type != ObjectType::Scope {
            std::mem::swap(&mut source, &mut target);
        }

        let source_obj = services.fetch(&source, session).await?;
        let target_obj = services.fetch(&target, session).await?;
        if source_obj.id == target_obj.id {
            return Err(EngineError::validation("An object can't be linked to itself."));
        }

        let mut parts = target_obj.part_ids();
        let present = parts.contains(&source_obj.id);
        let verb = if self.unlink { "Unlinked" } else { "Linked" };
        let preposition = if self.unlink { "from" } else { "to" };
        let description = format!(
            "{} '{}' {} {} '{}'",
            source.object_type, source_obj.name, preposition, target.object_type, target_obj.name
        );

        match (self.unlink, present) {
            (false, true) => {
                return Ok(HandlerReply::done(format!("{} is already linked.", capitalize_first(&description))));
            }
            (true, false) => {
                return Ok(HandlerReply::done(format!(
                    "{} '{}' is not linked to {} '{}'.",
                    capitalized(source.object_type),
                    source_obj.name,
                    target.object_type,
                    target_obj.name
                )));
            }
            (false, false) => parts.push(source_obj.id.clone()),
            (true, true) => parts.retain(|id| *id != source_obj.id),
        }

        let mut fields = ObjectFields::new();
        fields.insert(
            PARTS_FIELD.to_string(),
            Value::Array(parts.iter().cloned().map(Value::String).collect()),
        );
        let container_id = target_obj.container_id.clone().unwrap_or_default();
        services
            .store
            .update_object(target.object_type, &container_id, &target_obj.id, &fields)
            .await?;
        info!(source = %source_obj.id, target = %target_obj.id, unlink = self.unlink, "Link updated");
        Ok(HandlerReply::done(format!("{} {}.", verb, description)).with_data(json!({
            "source": source_obj.id,
            "target": target_obj.id,
            "parts": parts,
        })))
    }
}

// ============================================================================
// compare
// ============================================================================

pub struct CompareHandler;

fn comparable_fields(object: &StoredObject) -> Vec<(String, String)> {
    let mut out = vec![
        ("subtype".to_string(), object.subtype.clone().unwrap_or_default()),
        ("description".to_string(), object.description.clone().unwrap_or_default()),
        ("abbreviation".to_string(), object.abbreviation.clone().unwrap_or_default()),
        ("linked objects".to_string(), object.part_ids().len().to_string()),
    ];
    for (key, value) in object.fields.iter().filter(|(k, _)| k.as_str() != PARTS_FIELD) {
        out.push((key.clone(), value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())));
    }
    out
}

#[async_trait]
impl OperationHandler for CompareHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Compare
    }

    fn description(&self) -> &'static str {
        "Compare the fields of two objects"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let (left, right) = sides(op)?;
        let a = services.fetch(&left, session).await?;
        let b = services.fetch(&right, session).await?;

        let a_fields = comparable_fields(&a);
        let b_fields = comparable_fields(&b);
        let mut keys: Vec<&String> = a_fields.iter().map(|(k, _)| k).collect();
        for (k, _) in &b_fields {
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        let lookup = |fields: &[(String, String)], key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let mut differences = Vec::new();
        for key in keys {
            let (va, vb) = (lookup(&a_fields, key), lookup(&b_fields, key));
            if va != vb {
                differences.push(json!({"field": key, "left": va, "right": vb}));
            }
        }

        let header = format!(
            "{} '{}' vs {} '{}'",
            capitalized(left.object_type),
            a.name,
            right.object_type,
            b.name
        );
        let message = if differences.is_empty() {
            format!("{}: no differences.", header)
        } else {
            let lines = differences
                .iter()
                .map(|d| {
                    let field = d["field"].as_str().unwrap_or_default();
                    // only subtype values are platform labels; the rest is user text
                    let show = |v: &Value| match v.as_str() {
                        Some("") | None => "(empty)".to_string(),
                        Some(s) if field == "subtype" => display_label(s),
                        Some(s) => s.to_string(),
                    };
                    format!("- {}: {} / {}", field, show(&d["left"]), show(&d["right"]))
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{}:\n{}", header, lines)
        };
        Ok(HandlerReply::done(message).with_data(json!({"differences": differences})))
    }
}

// ============================================================================
// analyze
// ============================================================================

pub struct AnalyzeHandler;

#[async_trait]
impl OperationHandler for AnalyzeHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::Analyze
    }

    fn description(&self) -> &'static str {
        "Summarize one object and point out missing information"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let object_type = require_type(op)?;
        let name = require_name(op, object_type)?;
        let object = services
            .fetch(&ObjectReference::named(object_type, name), session)
            .await?;

        let parts = object.part_ids().len();
        let mut facts = vec![match &object.subtype {
            Some(s) => format!("Subtype: {}", display_label(s)),
            None => "Subtype: none".to_string(),
        }];
        facts.push(format!("Linked objects: {}", parts));
        let extra = object.fields.keys().filter(|k| k.as_str() != PARTS_FIELD).count();
        if extra > 0 {
            facts.push(format!("Additional fields: {}", extra));
        }

        let mut findings = Vec::new();
        if object.subtype.is_none() {
            findings.push(format!("No subtype is assigned to this {}.", object_type));
        }
        if object.description.as_deref().is_none_or(|d| d.trim().is_empty()) {
            findings.push("The description is empty.".to_string());
        }
        if object_type == ObjectType::Scope && parts == 0 {
            findings.push("Nothing is linked to this scope yet.".to_string());
        }

        let mut message = format!(
            "Analysis of {} '{}':\n{}",
            object_type,
            object.name,
            facts.iter().map(|f| format!("- {}", f)).collect::<Vec<_>>().join("\n")
        );
        if findings.is_empty() {
            message.push_str("\nNo gaps found.");
        } else {
            message.push_str("\nGaps:\n");
            message.push_str(&findings.iter().map(|f| format!("- {}", f)).collect::<Vec<_>>().join("\n"));
        }
        Ok(HandlerReply::done(message).with_data(json!({
            "object": object_data(&object),
            "findings": findings,
        })))
    }
}

// ============================================================================
// generate_report
// ============================================================================

pub struct ReportHandler;

impl ReportHandler {
    fn subject(report_type: ReportType) -> ObjectType {
        match report_type {
            ReportType::InventoryOfAssets => ObjectType::Asset,
            ReportType::RiskAssessment => ObjectType::Scenario,
            ReportType::StatementOfApplicability => ObjectType::Control,
        }
    }

    /// Render a report for a resolved scope.
    pub async fn generate(
        services: &Services,
        report_type: ReportType,
        scope: &StoredObject,
    ) -> Result<HandlerReply> {
        let subject = Self::subject(report_type);
        let container = scope.container_id.as_deref();
        let candidates = services.store.list_objects(subject, container).await?;
        let parts = scope.part_ids();
        // a scope without links covers its whole container
        let entries: Vec<&StoredObject> = if parts.is_empty() {
            candidates.iter().collect()
        } else {
            candidates.iter().filter(|o| parts.contains(&o.id)).collect()
        };

        let mut message = format!(
            "{} for scope '{}': {} {}.",
            report_type.title(),
            scope.name,
            entries.len(),
            subject.plural()
        );
        for entry in &entries {
            message.push('\n');
            message.push_str(&summary_line(entry));
        }
        info!(report = %report_type, scope = %scope.id, entries = entries.len(), "Report generated");
        Ok(HandlerReply::done(message).with_data(json!({
            "report_type": report_type.slug(),
            "scope": {"id": scope.id, "name": scope.name},
            "entries": entries.iter().map(|e| object_data(e)).collect::<Vec<_>>(),
        })))
    }
}

#[async_trait]
impl OperationHandler for ReportHandler {
    fn kind(&self) -> OperationKind {
        OperationKind::GenerateReport
    }

    fn description(&self) -> &'static str {
        "Generate an inventory-of-assets, risk-assessment or statement-of-applicability report for a scope"
    }

    async fn handle(
        &self,
        op: &Operation,
        services: &Services,
        session: &mut SessionContext,
    ) -> Result<HandlerReply> {
        let report_type = op.params.report_type.ok_or_else(|| {
            EngineError::validation(
                "Which report do you need: inventory of assets, risk assessment or statement of applicability?",
            )
        })?;

        if let Some(target) = &op.params.target {
            let scope = services.fetch(target, session).await?;
            return Self::generate(services, report_type, &scope).await;
        }

        let scopes = services
            .store
            .list_objects(ObjectType::Scope, services.default_container.as_deref())
            .await?;
        match scopes.as_slice() {
            [] => Err(EngineError::validation(
                "There are no scopes yet. Create a scope first, then generate the report for it.",
            )),
            [only] => Self::generate(services, report_type, only).await,
            many => {
                let options: Vec<(String, String)> =
                    many.iter().map(|s| (s.id.clone(), s.name.clone())).collect();
                let names: Vec<String> = options.iter().map(|(_, n)| n.clone()).collect();
                let question = format!(
                    "Which scope should the {} cover?\n{}",
                    report_type.title(),
                    numbered(&names)
                );
                session.begin_selection(PendingSelection::ReportScope { report_type, options })?;
                Ok(HandlerReply::ask(question))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, NewObject, ObjectStore};

    fn services(store: Arc<InMemoryStore>) -> Services {
        Services::new(store, SubtypeMatcher::new(), &ResolverConfig::default())
    }

    fn store() -> Arc<InMemoryStore> {
        Arc::new(
            InMemoryStore::new()
                .with_container("dom-1", "ISMS")
                .with_subtypes("dom-1", ObjectType::Asset, &["AST_IT-System", "AST_Application"])
                .with_subtypes("dom-1", ObjectType::Scope, &["SCP_Scope"]),
        )
    }

    #[tokio::test]
    async fn test_create_auto_selects_single_subtype_and_caches() {
        let store = store();
        let services = services(store.clone());
        let mut session = SessionContext::new();
        let op = Operation::on(OperationKind::Create, ObjectType::Scope).with_name("Project Phoenix");
        let reply = HandlerTable::standard()
            .dispatch(&op, &services, &mut session)
            .await
            .unwrap();
        assert!(!reply.needs_input);
        let cached = session.created.get(ObjectType::Scope, "project phoenix").unwrap();
        let stored = store.find_by_name(ObjectType::Scope, "Project Phoenix").unwrap();
        assert_eq!(cached.canonical_id, stored.id);
        assert_eq!(stored.subtype.as_deref(), Some("SCP_Scope"));
    }

    #[tokio::test]
    async fn test_create_asks_when_ambiguous() {
        let services = services(store());
        let mut session = SessionContext::new();
        let op = Operation::on(OperationKind::Create, ObjectType::Asset).with_name("Desktop");
        let reply = CreateHandler.handle(&op, &services, &mut session).await.unwrap();
        assert!(reply.needs_input);
        assert!(reply.message.contains("1. IT-System"));
        assert!(matches!(session.pending(), Some(PendingSelection::Subtype { .. })));
    }

    #[tokio::test]
    async fn test_counted_create_generates_names() {
        let store = store();
        let services = services(store.clone());
        let mut session = SessionContext::new();
        let mut op = Operation::on(OperationKind::Create, ObjectType::Scope);
        op.params.count = Some(3);
        op.params.names = vec!["A".into()];
        CreateHandler.handle(&op, &services, &mut session).await.unwrap();
        assert!(store.find_by_name(ObjectType::Scope, "A").is_some());
        assert!(store.find_by_name(ObjectType::Scope, "Scope 3").is_some());
        assert_eq!(session.created.len(), 3);
    }

    #[tokio::test]
    async fn test_subtype_change_is_refused() {
        let store = store();
        store.seed("dom-1", ObjectType::Asset, "Desktop", Some("AST_IT-System"));
        let services = services(store);
        let mut session = SessionContext::new();
        let op = Operation::on(OperationKind::Update, ObjectType::Asset)
            .with_name("Desktop")
            .with_subtype("Application");
        let err = UpdateHandler.handle(&op, &services, &mut session).await.unwrap_err();
        assert!(matches!(err, EngineError::SubtypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_link_puts_source_into_scope_parts() {
        let store = store();
        let desktop = store.seed("dom-1", ObjectType::Asset, "Desktop", None);
        store.seed("dom-1", ObjectType::Scope, "SCOPE1", None);
        let services = services(store.clone());
        let mut session = SessionContext::new();
        // scope named first still ends up as the container
        let op = Operation::new(OperationKind::Link, Some(ObjectType::Scope))
            .with_source(ObjectReference::named(ObjectType::Scope, "SCOPE1"))
            .with_target(ObjectReference::named(ObjectType::Asset, "Desktop"));
        let reply = LinkHandler { unlink: false }
            .handle(&op, &services, &mut session)
            .await
            .unwrap();
        assert!(reply.message.starts_with("Linked asset 'Desktop' to scope 'SCOPE1'"));
        let scope = store.find_by_name(ObjectType::Scope, "SCOPE1").unwrap();
        assert_eq!(scope.part_ids(), vec![desktop]);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found_and_offline_is_connection() {
        let store = store();
        let services = services(store.clone());
        let mut session = SessionContext::new();
        let op = Operation::on(OperationKind::Get, ObjectType::Asset).with_name("Ghost");
        let err = GetHandler.handle(&op, &services, &mut session).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));

        store.set_offline(true);
        let err = GetHandler.handle(&op, &services, &mut session).await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[tokio::test]
    async fn test_report_asks_for_scope_when_several() {
        let store = store();
        store.seed("dom-1", ObjectType::Scope, "Alpha", None);
        store.seed("dom-1", ObjectType::Scope, "Beta", None);
        let services = services(store);
        let mut session = SessionContext::new();
        let mut op = Operation::on(OperationKind::GenerateReport, ObjectType::Scope);
        op.params.report_type = Some(ReportType::InventoryOfAssets);
        let reply = ReportHandler.handle(&op, &services, &mut session).await.unwrap();
        assert!(reply.needs_input);
        assert_eq!(
            session.pending().unwrap().option_labels(),
            vec!["Alpha".to_string(), "Beta".to_string()]
        );
    }

    #[tokio::test]
    async fn test_compare_keeps_free_text_verbatim() {
        let store = store();
        for (name, subtype, description) in [
            ("Desktop", "AST_IT-System", "Office_PC for HR-team"),
            ("CRM", "AST_Application", "Customer data"),
        ] {
            store
                .create_object(&NewObject {
                    object_type: ObjectType::Asset,
                    container_id: "dom-1".into(),
                    unit_id: None,
                    name: name.into(),
                    subtype: Some(subtype.into()),
                    description: Some(description.into()),
                    abbreviation: None,
                })
                .await
                .unwrap();
        }
        let services = services(store);
        let mut session = SessionContext::new();
        let op = Operation::new(OperationKind::Compare, Some(ObjectType::Asset))
            .with_source(ObjectReference::named(ObjectType::Asset, "Desktop"))
            .with_target(ObjectReference::named(ObjectType::Asset, "CRM"));
        let reply = CompareHandler.handle(&op, &services, &mut session).await.unwrap();
        assert!(reply.message.contains("- description: Office_PC for HR-team / Customer data"), "{}", reply.message);
        assert!(reply.message.contains("- subtype: It System / Application"), "{}", reply.message);
    }
}
