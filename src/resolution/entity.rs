//! Entity resolver.
//!
//! Turns a name, phrase or literal id into `(canonical id, container id)`.
//! Steps short-circuit on the first success:
//!
//! 1. canonical-id literal
//! 2. candidate-name extraction (`resolve_utterance` only)
//! 3. session cache (no store call)
//! 4. default container
//! 5. every other container in listing order
//!
//! Store failures are logged and treated as "not found here"; the resolver
//! itself never fails.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::names::{
    best_match, clean_reference, extract_name, find_canonical_id, is_canonical_id, strip_quotes,
    NameMatchTier,
};
use crate::session::SessionContext;
use crate::store::{ObjectStore, StoredObject};
use crate::types::ObjectType;

/// Where a resolution was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Literal,
    Cache,
    DefaultContainer,
    ContainerScan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedObject {
    pub canonical_id: String,
    pub container_id: String,
    pub display_name: String,
    pub source: ResolutionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<NameMatchTier>,
}

#[derive(Clone)]
pub struct EntityResolver {
    store: Arc<dyn ObjectStore>,
    overlap_threshold: f32,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            overlap_threshold: 0.8,
        }
    }

    pub fn with_overlap_threshold(mut self, threshold: f32) -> Self {
        self.overlap_threshold = threshold;
        self
    }

    pub fn overlap_threshold(&self) -> f32 {
        self.overlap_threshold
    }

    /// Resolve a bare name or literal id of `object_type`.
    ///
    /// The name is used as given: a name that happens to contain a type
    /// word ("Asset Register") is never cut down to a shorter one. Only when
    /// the name as given finds nothing is the trailing-type-word form
    /// ("Desktop asset" to "Desktop") tried.
    pub async fn resolve(
        &self,
        object_type: ObjectType,
        name: &str,
        default_container: Option<&str>,
        session: &SessionContext,
    ) -> Option<ResolvedObject> {
        let name = strip_quotes(name.trim().trim_end_matches(['.', ',', ';', ':', '!', '?']));
        if name.is_empty() {
            return None;
        }
        if is_canonical_id(name) {
            let id = find_canonical_id(name)?;
            return self.locate_id(object_type, &id, default_container).await;
        }

        if let Some(hit) = self
            .resolve_exact_name(object_type, name, default_container, session)
            .await
        {
            return Some(hit);
        }
        let cleaned = clean_reference(name);
        if cleaned.is_empty() || cleaned == name {
            return None;
        }
        self.resolve_exact_name(object_type, &cleaned, default_container, session)
            .await
    }

    /// Resolve a reference embedded in free text ("show me the asset
    /// Desktop", "delete scope 'Alpha'").
    ///
    /// Extracts the candidate name first, then resolves it with
    /// [`EntityResolver::resolve`].
    pub async fn resolve_utterance(
        &self,
        object_type: ObjectType,
        utterance: &str,
        default_container: Option<&str>,
        session: &SessionContext,
    ) -> Option<ResolvedObject> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return None;
        }
        if is_canonical_id(utterance) {
            let id = find_canonical_id(utterance)?;
            return self.locate_id(object_type, &id, default_container).await;
        }
        let name = extract_name(utterance, Some(object_type))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| clean_reference(utterance));
        self.resolve(object_type, &name, default_container, session)
            .await
    }

    /// Cache, then default container, then every other container.
    async fn resolve_exact_name(
        &self,
        object_type: ObjectType,
        name: &str,
        default_container: Option<&str>,
        session: &SessionContext,
    ) -> Option<ResolvedObject> {
        if let Some(hit) = session.created.get(object_type, name) {
            debug!(%object_type, name, id = %hit.canonical_id, "Resolved from session cache");
            return Some(ResolvedObject {
                canonical_id: hit.canonical_id.clone(),
                container_id: hit.container_id.clone(),
                display_name: hit.display_name.clone(),
                source: ResolutionSource::Cache,
                tier: Some(NameMatchTier::Exact),
            });
        }

        if let Some(container) = default_container {
            if let Some(hit) = self.search_container(object_type, name, container).await {
                return Some(ResolvedObject {
                    source: ResolutionSource::DefaultContainer,
                    ..hit
                });
            }
        }

        let containers = match self.store.list_containers().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Container listing failed during resolution");
                return None;
            }
        };
        for container in containers
            .iter()
            .filter(|c| Some(c.id.as_str()) != default_container)
        {
            if let Some(hit) = self.search_container(object_type, name, &container.id).await {
                return Some(ResolvedObject {
                    source: ResolutionSource::ContainerScan,
                    ..hit
                });
            }
        }

        debug!(%object_type, name, "Reference not resolved");
        None
    }

    /// Best match for `name` among one container's objects.
    async fn search_container(
        &self,
        object_type: ObjectType,
        name: &str,
        container_id: &str,
    ) -> Option<ResolvedObject> {
        let items = match self.store.list_objects(object_type, Some(container_id)).await {
            Ok(items) => items,
            Err(e) => {
                warn!(container = container_id, error = %e, "Object listing failed");
                return None;
            }
        };
        let (object, tier) = best_match(
            name,
            items.as_slice(),
            |o| o.name.as_str(),
            self.overlap_threshold,
        )?;
        debug!(%object_type, name, container = container_id, ?tier, "Name matched");
        Some(ResolvedObject {
            canonical_id: object.id.clone(),
            container_id: object
                .container_id
                .clone()
                .unwrap_or_else(|| container_id.to_string()),
            display_name: object.name.clone(),
            source: ResolutionSource::DefaultContainer,
            tier: Some(tier),
        })
    }

    /// Pair a literal id with its container.
    async fn locate_id(
        &self,
        object_type: ObjectType,
        id: &str,
        default_container: Option<&str>,
    ) -> Option<ResolvedObject> {
        if let Some(container) = default_container {
            return Some(ResolvedObject {
                canonical_id: id.to_string(),
                container_id: container.to_string(),
                display_name: id.to_string(),
                source: ResolutionSource::Literal,
                tier: None,
            });
        }

        let containers = match self.store.list_containers().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Container listing failed during id lookup");
                return None;
            }
        };
        for container in containers {
            if let Ok(object) = self.store.get_object(object_type, &container.id, id).await {
                return Some(ResolvedObject {
                    canonical_id: object.id,
                    container_id: container.id,
                    display_name: object.name,
                    source: ResolutionSource::Literal,
                    tier: None,
                });
            }
        }
        None
    }

    /// Resolve to the full stored object.
    pub async fn fetch(
        &self,
        object_type: ObjectType,
        reference: &str,
        default_container: Option<&str>,
        session: &SessionContext,
    ) -> Option<StoredObject> {
        let resolved = self
            .resolve(object_type, reference, default_container, session)
            .await?;
        match self
            .store
            .get_object(object_type, &resolved.container_id, &resolved.canonical_id)
            .await
        {
            Ok(object) => Some(object),
            Err(e) => {
                warn!(id = %resolved.canonical_id, error = %e, "Resolved object could not be fetched");
                None
            }
        }
    }
}
