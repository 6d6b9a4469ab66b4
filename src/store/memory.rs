//! In-memory object store.
//!
//! Deterministic stand-in for the remote platform. Listing order is
//! insertion order, ids are v4 UUIDs, and every call is counted so callers
//! can assert that a path did (or did not) hit the store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Container, NewObject, ObjectFields, ObjectStore, StoreError, StoredObject};
use crate::types::ObjectType;

/// Number of calls per store operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_objects: usize,
    pub get_object: usize,
    pub create_object: usize,
    pub update_object: usize,
    pub delete_object: usize,
    pub get_subtypes: usize,
    pub list_containers: usize,
}

impl CallCounts {
    /// Calls that search for objects (list + get + container listing).
    pub fn searches(&self) -> usize {
        self.list_objects + self.get_object + self.list_containers
    }
}

#[derive(Default)]
struct Inner {
    containers: Vec<Container>,
    objects: Vec<StoredObject>,
    subtypes: HashMap<(String, ObjectType), Vec<String>>,
    calls: CallCounts,
    offline: bool,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, id: &str, name: &str) -> Self {
        self.lock().containers.push(Container {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn with_subtypes(self, container_id: &str, object_type: ObjectType, labels: &[&str]) -> Self {
        self.lock().subtypes.insert(
            (container_id.to_string(), object_type),
            labels.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Insert an object directly, bypassing call counting. Returns its id.
    pub fn seed(
        &self,
        container_id: &str,
        object_type: ObjectType,
        name: &str,
        subtype: Option<&str>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().objects.push(StoredObject {
            id: id.clone(),
            name: name.to_string(),
            object_type,
            subtype: subtype.map(str::to_string),
            container_id: Some(container_id.to_string()),
            description: None,
            abbreviation: None,
            fields: ObjectFields::new(),
        });
        id
    }

    /// Make every call fail with `Unreachable`.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Snapshot of every stored object.
    pub fn objects(&self) -> Vec<StoredObject> {
        self.lock().objects.clone()
    }

    pub fn find_by_name(&self, object_type: ObjectType, name: &str) -> Option<StoredObject> {
        self.lock()
            .objects
            .iter()
            .find(|o| o.object_type == object_type && o.name == name)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::Unreachable("in-memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn position(&self, object_type: ObjectType, container_id: &str, id: &str) -> Option<usize> {
        self.objects.iter().position(|o| {
            o.object_type == object_type
                && o.id == id
                && o.container_id.as_deref() == Some(container_id)
        })
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_objects(
        &self,
        object_type: ObjectType,
        container_id: Option<&str>,
    ) -> Result<Vec<StoredObject>, StoreError> {
        let mut inner = self.lock();
        inner.calls.list_objects += 1;
        inner.check_online()?;
        Ok(inner
            .objects
            .iter()
            .filter(|o| o.object_type == object_type)
            .filter(|o| match container_id {
                Some(c) => o.container_id.as_deref() == Some(c),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_object(
        &self,
        object_type: ObjectType,
        container_id: &str,
        id: &str,
    ) -> Result<StoredObject, StoreError> {
        let mut inner = self.lock();
        inner.calls.get_object += 1;
        inner.check_online()?;
        inner
            .position(object_type, container_id, id)
            .map(|i| inner.objects[i].clone())
            .ok_or_else(|| StoreError::NotFound {
                object_type,
                id: id.to_string(),
            })
    }

    async fn create_object(&self, request: &NewObject) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.calls.create_object += 1;
        inner.check_online()?;
        if !inner.containers.iter().any(|c| c.id == request.container_id) {
            return Err(StoreError::Rejected(format!(
                "unknown container {}",
                request.container_id
            )));
        }
        let id = Uuid::new_v4().to_string();
        inner.objects.push(StoredObject {
            id: id.clone(),
            name: request.name.clone(),
            object_type: request.object_type,
            subtype: request.subtype.clone(),
            container_id: Some(request.container_id.clone()),
            description: request.description.clone(),
            abbreviation: request.abbreviation.clone(),
            fields: ObjectFields::new(),
        });
        Ok(id)
    }

    async fn update_object(
        &self,
        object_type: ObjectType,
        container_id: &str,
        id: &str,
        fields: &ObjectFields,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.update_object += 1;
        inner.check_online()?;
        let idx = inner
            .position(object_type, container_id, id)
            .ok_or_else(|| StoreError::NotFound {
                object_type,
                id: id.to_string(),
            })?;
        let object = &mut inner.objects[idx];
        for (key, value) in fields {
            match key.as_str() {
                "name" => {
                    if let Some(name) = value.as_str() {
                        object.name = name.to_string();
                    }
                }
                "subtype" => object.subtype = value.as_str().map(str::to_string),
                "description" => object.description = value.as_str().map(str::to_string),
                "abbreviation" => object.abbreviation = value.as_str().map(str::to_string),
                _ => {
                    object.fields.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete_object(
        &self,
        object_type: ObjectType,
        container_id: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.delete_object += 1;
        inner.check_online()?;
        let idx = inner
            .position(object_type, container_id, id)
            .ok_or_else(|| StoreError::NotFound {
                object_type,
                id: id.to_string(),
            })?;
        inner.objects.remove(idx);
        Ok(())
    }

    async fn get_subtypes(
        &self,
        container_id: &str,
        object_type: ObjectType,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.lock();
        inner.calls.get_subtypes += 1;
        inner.check_online()?;
        Ok(inner
            .subtypes
            .get(&(container_id.to_string(), object_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_containers(&self) -> Result<Vec<Container>, StoreError> {
        let mut inner = self.lock();
        inner.calls.list_containers += 1;
        inner.check_online()?;
        Ok(inner.containers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with_container("dom-1", "ISMS")
            .with_subtypes("dom-1", ObjectType::Asset, &["AST_IT-System", "AST_Datatype"])
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let store = store();
        let id = store
            .create_object(&NewObject {
                object_type: ObjectType::Scope,
                container_id: "dom-1".to_string(),
                unit_id: None,
                name: "Alpha".to_string(),
                subtype: None,
                description: None,
                abbreviation: None,
            })
            .await
            .unwrap();

        let items = store.list_objects(ObjectType::Scope, Some("dom-1")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(store.calls().create_object, 1);
        assert_eq!(store.calls().list_objects, 1);
    }

    #[tokio::test]
    async fn test_create_in_unknown_container_rejected() {
        let store = store();
        let result = store
            .create_object(&NewObject {
                object_type: ObjectType::Scope,
                container_id: "nope".to_string(),
                unit_id: None,
                name: "Alpha".to_string(),
                subtype: None,
                description: None,
                abbreviation: None,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_update_renames_and_stores_extra_fields() {
        let store = store();
        let id = store.seed("dom-1", ObjectType::Asset, "Desktop", None);
        let mut fields = ObjectFields::new();
        fields.insert("name".into(), "Laptop".into());
        fields.insert("status".into(), "active".into());
        store
            .update_object(ObjectType::Asset, "dom-1", &id, &fields)
            .await
            .unwrap();

        let obj = store.get_object(ObjectType::Asset, "dom-1", &id).await.unwrap();
        assert_eq!(obj.name, "Laptop");
        assert_eq!(obj.fields["status"], "active");
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = store();
        store.set_offline(true);
        let result = store.list_containers().await;
        assert!(matches!(result, Err(StoreError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_subtypes_per_container() {
        let store = store();
        let labels = store.get_subtypes("dom-1", ObjectType::Asset).await.unwrap();
        assert_eq!(labels, vec!["AST_IT-System", "AST_Datatype"]);
        let none = store.get_subtypes("dom-1", ObjectType::Scope).await.unwrap();
        assert!(none.is_empty());
    }
}
