//! Object-store collaborator.
//!
//! The remote compliance platform is reached only through [`ObjectStore`].
//! Network calls, authentication refresh and payload shaping belong to the
//! implementation; the engine never retries a call.

mod memory;

pub use memory::{CallCounts, InMemoryStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ObjectType;

/// Free-form field updates passed to `update_object`.
pub type ObjectFields = serde_json::Map<String, serde_json::Value>;

/// Field holding the ids of linked objects.
pub const PARTS_FIELD: &str = "parts";

/// An object as returned by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    pub name: String,
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub fields: ObjectFields,
}

impl StoredObject {
    /// Ids in the `parts` field.
    pub fn part_ids(&self) -> Vec<String> {
        self.fields
            .get(PARTS_FIELD)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Top-level grouping that scopes uniqueness and subtype catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
}

/// Arguments of `create_object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObject {
    pub object_type: ObjectType,
    pub container_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abbreviation: Option<String>,
}

/// Failure reported by the object store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("object store unreachable: {0}")]
    Unreachable(String),

    #[error("object store rejected credentials")]
    Unauthorized,

    #[error("{object_type} {id} does not exist")]
    NotFound { object_type: ObjectType, id: String },

    #[error("object store rejected the request: {0}")]
    Rejected(String),
}

/// Remote object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects of a type, optionally restricted to one container.
    async fn list_objects(
        &self,
        object_type: ObjectType,
        container_id: Option<&str>,
    ) -> Result<Vec<StoredObject>, StoreError>;

    async fn get_object(
        &self,
        object_type: ObjectType,
        container_id: &str,
        id: &str,
    ) -> Result<StoredObject, StoreError>;

    /// Returns the new object's canonical id.
    async fn create_object(&self, request: &NewObject) -> Result<String, StoreError>;

    async fn update_object(
        &self,
        object_type: ObjectType,
        container_id: &str,
        id: &str,
        fields: &ObjectFields,
    ) -> Result<(), StoreError>;

    async fn delete_object(
        &self,
        object_type: ObjectType,
        container_id: &str,
        id: &str,
    ) -> Result<(), StoreError>;

    /// Canonical subtype labels for a type within a container.
    async fn get_subtypes(
        &self,
        container_id: &str,
        object_type: ObjectType,
    ) -> Result<Vec<String>, StoreError>;

    /// Containers in the platform's listing order.
    async fn list_containers(&self) -> Result<Vec<Container>, StoreError>;
}
