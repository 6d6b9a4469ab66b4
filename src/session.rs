//! Per-session state.
//!
//! `SessionContext` is the only channel for cross-turn memory. It is owned
//! by the request pipeline and passed by `&mut` into each component. At most
//! one request may own a session at a time; callers with concurrent
//! sessions serialize access per session key.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::resolution::names::normalize_name;
use crate::router::safety::SafetyAssessment;
use crate::store::StoredObject;
use crate::types::{ObjectType, Operation, ReportType};

// ============================================================================
// Created-object cache
// ============================================================================

/// `(object type, normalized name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub object_type: ObjectType,
    pub name: String,
}

impl CacheKey {
    pub fn new(object_type: ObjectType, name: &str) -> Self {
        Self {
            object_type,
            name: normalize_name(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedObject {
    pub canonical_id: String,
    pub container_id: String,
    /// Name as the user typed it at creation time.
    pub display_name: String,
}

/// Objects created during this session, by normalized name.
///
/// At most one entry per key; the newest write wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatedObjectCache {
    entries: HashMap<CacheKey, CachedObject>,
}

impl CreatedObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created object. Returns the entry it replaced, if any.
    pub fn insert(
        &mut self,
        object_type: ObjectType,
        name: &str,
        canonical_id: impl Into<String>,
        container_id: impl Into<String>,
    ) -> Option<CachedObject> {
        self.entries.insert(
            CacheKey::new(object_type, name),
            CachedObject {
                canonical_id: canonical_id.into(),
                container_id: container_id.into(),
                display_name: name.trim().to_string(),
            },
        )
    }

    pub fn get(&self, object_type: ObjectType, name: &str) -> Option<&CachedObject> {
        self.entries.get(&CacheKey::new(object_type, name))
    }

    /// Move an entry to a new name after a rename. No-op when absent.
    pub fn rekey(&mut self, object_type: ObjectType, old_name: &str, new_name: &str) -> bool {
        match self.entries.remove(&CacheKey::new(object_type, old_name)) {
            Some(mut entry) => {
                entry.display_name = new_name.trim().to_string();
                self.entries.insert(CacheKey::new(object_type, new_name), entry);
                true
            }
            None => false,
        }
    }

    /// Drop every entry pointing at `canonical_id`.
    pub fn remove_id(&mut self, canonical_id: &str) {
        self.entries.retain(|_, v| v.canonical_id != canonical_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &CachedObject)> {
        self.entries.iter()
    }
}

// ============================================================================
// Pending selection
// ============================================================================

/// The one outstanding "which one?" question of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingSelection {
    /// Which subtype should the operation use?
    Subtype {
        operation: Operation,
        options: Vec<String>,
    },
    /// Which scope should the report cover? Options are `(id, name)`.
    ReportScope {
        report_type: ReportType,
        options: Vec<(String, String)>,
    },
    /// Confirm dangerous operations (yes/no).
    Confirmation {
        operations: Vec<Operation>,
        assessment: SafetyAssessment,
    },
}

impl PendingSelection {
    /// Human-readable option labels, in the order they were offered.
    pub fn option_labels(&self) -> Vec<String> {
        match self {
            PendingSelection::Subtype { options, .. } => options.clone(),
            PendingSelection::ReportScope { options, .. } => {
                options.iter().map(|(_, name)| name.clone()).collect()
            }
            PendingSelection::Confirmation { .. } => vec!["yes".to_string(), "no".to_string()],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingSelection::Subtype { .. } => "subtype",
            PendingSelection::ReportScope { .. } => "report_scope",
            PendingSelection::Confirmation { .. } => "confirmation",
        }
    }
}

// ============================================================================
// Last list result
// ============================================================================

/// Items shown by the most recent list, for "delete them" follow-ups.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot {
    pub object_type: ObjectType,
    pub items: Vec<StoredObject>,
}

// ============================================================================
// Routing log
// ============================================================================

/// One shadow-comparison record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message_preview: String,
    pub legacy_route: String,
    /// Route tag of the new router, or `error` when it failed.
    pub new_route: String,
    pub new_handler: Option<String>,
    pub new_confidence: Option<f32>,
    pub agreement: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Bounded FIFO of routing-log entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingLog {
    capacity: usize,
    entries: VecDeque<RoutingLogEntry>,
}

impl Default for RoutingLog {
    fn default() -> Self {
        Self::with_capacity(100)
    }
}

impl RoutingLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: RoutingLogEntry) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &RoutingLogEntry> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&RoutingLogEntry> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Fraction of entries where both routers agreed; `None` when empty.
    pub fn agreement_rate(&self) -> Option<f32> {
        if self.entries.is_empty() {
            return None;
        }
        let agreed = self.entries.iter().filter(|e| e.agreement).count();
        Some(agreed as f32 / self.entries.len() as f32)
    }
}

// ============================================================================
// Session context
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub created: CreatedObjectCache,
    pending: Option<PendingSelection>,
    pub last_list: Option<ListSnapshot>,
    pub routing_log: RoutingLog,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            routing_log: RoutingLog::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn pending(&self) -> Option<&PendingSelection> {
        self.pending.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Open a disambiguation question. Fails while another is outstanding.
    pub fn begin_selection(&mut self, selection: PendingSelection) -> Result<()> {
        if self.pending.is_some() {
            return Err(EngineError::PendingSelectionActive);
        }
        self.pending = Some(selection);
        Ok(())
    }

    /// Take the pending selection to resolve it.
    pub fn take_selection(&mut self) -> Option<PendingSelection> {
        self.pending.take()
    }

    /// Drop the pending selection without resolving it.
    pub fn abandon_selection(&mut self) -> Option<PendingSelection> {
        let abandoned = self.pending.take();
        if let Some(selection) = &abandoned {
            tracing::debug!(kind = selection.kind(), "Pending selection abandoned");
        }
        abandoned
    }

    pub fn record_list(&mut self, object_type: ObjectType, items: Vec<StoredObject>) {
        self.last_list = Some(ListSnapshot { object_type, items });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OperationKind;

    fn entry(agreement: bool) -> RoutingLogEntry {
        RoutingLogEntry {
            timestamp: Utc::now(),
            message_preview: "list scopes".to_string(),
            legacy_route: "operation".to_string(),
            new_route: "operation".to_string(),
            new_handler: Some("operation".to_string()),
            new_confidence: Some(0.9),
            agreement,
            error: None,
        }
    }

    #[test]
    fn test_cache_newest_write_wins() {
        let mut cache = CreatedObjectCache::new();
        cache.insert(ObjectType::Person, "DPO-1", "id-1", "dom-1");
        let previous = cache.insert(ObjectType::Person, "dpo-1", "id-2", "dom-1");
        assert_eq!(previous.map(|p| p.canonical_id).as_deref(), Some("id-1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(ObjectType::Person, "DPO 1").unwrap().canonical_id, "id-2");
    }

    #[test]
    fn test_cache_key_is_normalized() {
        let key = CacheKey::new(ObjectType::Scope, "'Project Phoenix'");
        assert_eq!(key.name, "project phoenix");
    }

    #[test]
    fn test_cache_rekey_on_rename() {
        let mut cache = CreatedObjectCache::new();
        cache.insert(ObjectType::Asset, "Desktop", "id-1", "dom-1");
        assert!(cache.rekey(ObjectType::Asset, "desktop", "Laptop"));
        assert!(cache.get(ObjectType::Asset, "Desktop").is_none());
        assert_eq!(cache.get(ObjectType::Asset, "laptop").unwrap().display_name, "Laptop");
        assert!(!cache.rekey(ObjectType::Asset, "Desktop", "Tablet"));
    }

    #[test]
    fn test_single_pending_selection() {
        let mut session = SessionContext::new();
        let pending = PendingSelection::Subtype {
            operation: Operation::on(OperationKind::Create, ObjectType::Asset),
            options: vec!["AST_IT-System".to_string()],
        };
        session.begin_selection(pending.clone()).unwrap();
        assert!(matches!(
            session.begin_selection(pending.clone()),
            Err(EngineError::PendingSelectionActive)
        ));
        assert!(session.abandon_selection().is_some());
        session.begin_selection(pending).unwrap();
        assert!(session.take_selection().is_some());
        assert!(!session.has_pending());
    }

    #[test]
    fn test_routing_log_evicts_oldest() {
        let mut log = RoutingLog::with_capacity(2);
        log.push(entry(true));
        log.push(entry(false));
        log.push(entry(false));
        assert_eq!(log.len(), 2);
        assert_eq!(log.agreement_rate(), Some(0.0));
    }
}
