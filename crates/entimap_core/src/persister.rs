//! Per-mapping document persistence.
//!
//! A [`Persister`] turns entity objects of one mapped type into batch
//! commands and loads their documents back. Sessions keep one per registered
//! type and hand it to every link of that type.

use crate::batch::Batch;
use crate::config::Config;
use crate::entity::{instantiate, Entity, EntityMapping, EntityObject, Identifier};
use crate::error::{CoreError, CoreResult};
use crate::store::{Criteria, DocumentStore, Update};
use crate::types::ChangeTracking;
use entimap_codec::Value;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

type Instantiate = fn(&Value, Identifier) -> CoreResult<Arc<dyn EntityObject>>;

pub(crate) struct Persister {
    mapping: EntityMapping,
    entity_type: TypeId,
    type_name: &'static str,
    identifier_field: String,
    version_field: String,
    instantiate: Instantiate,
}

impl Persister {
    pub fn new<T: Entity>(config: &Config) -> Self {
        Self {
            mapping: T::MAPPING,
            entity_type: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            identifier_field: config.identifier_field.clone(),
            version_field: config.version_field.clone(),
            instantiate: instantiate::<T>,
        }
    }

    pub fn entity_type(&self) -> TypeId {
        self.entity_type
    }

    pub fn collection(&self) -> &'static str {
        self.mapping.collection
    }

    pub fn change_tracking(&self, default: ChangeTracking) -> ChangeTracking {
        self.mapping.change_tracking.unwrap_or(default)
    }

    fn document(
        &self,
        object: &dyn EntityObject,
        id: Identifier,
        version: Option<i64>,
    ) -> CoreResult<Value> {
        let mut doc = object.to_document()?;
        if !doc.is_map() {
            return Err(CoreError::mapping(format!(
                "{} did not write a document",
                self.type_name
            )));
        }
        doc.set(self.identifier_field.as_str(), id.to_value());
        if let Some(version) = version {
            doc.set(self.version_field.as_str(), Value::Integer(version));
        }
        Ok(doc)
    }

    /// Queues an insert and returns the inserted document.
    pub fn add_insert(
        &self,
        batch: &mut Batch,
        object: &dyn EntityObject,
        id: Identifier,
    ) -> CoreResult<Value> {
        let version = self.mapping.versioned.then_some(1);
        let doc = self.document(object, id, version)?;
        batch.bulk(&self.mapping).add_insert(id, doc.clone());
        Ok(doc)
    }

    pub fn add_remove(&self, batch: &mut Batch, id: Identifier) {
        batch.bulk(&self.mapping).add_remove(id);
    }

    /// Compares the entity with its original document and queues a write if
    /// they differ.
    ///
    /// Returns the document the store will hold afterwards, or `None` when
    /// nothing changed.
    pub fn dirty_check(
        &self,
        batch: &mut Batch,
        object: &dyn EntityObject,
        id: Identifier,
        original: &Value,
    ) -> CoreResult<Option<Value>> {
        if self.mapping.versioned {
            let version = original
                .get(&self.version_field)
                .and_then(Value::as_integer);
            let current = self.document(object, id, version)?;
            if current == *original {
                return Ok(None);
            }
            let next = self.document(object, id, Some(version.map_or(1, |v| v + 1)))?;
            batch
                .bulk(&self.mapping)
                .add_replace(id, version, next.clone());
            Ok(Some(next))
        } else {
            let current = self.document(object, id, None)?;
            match Update::diff(original, &current) {
                Some(update) => {
                    batch.bulk(&self.mapping).add_update(id, update);
                    Ok(Some(current))
                }
                None => Ok(None),
            }
        }
    }

    pub async fn find_by_id(
        &self,
        store: &dyn DocumentStore,
        id: Identifier,
    ) -> CoreResult<Option<Value>> {
        let criteria = Criteria::by_id(&self.identifier_field, id);
        store.find_one(self.collection(), &criteria).await
    }

    /// Reloads the stored document of a managed entity.
    pub async fn refresh(&self, store: &dyn DocumentStore, id: Identifier) -> CoreResult<Value> {
        self.find_by_id(store, id)
            .await?
            .ok_or_else(|| CoreError::not_found(self.collection(), id))
    }

    pub fn identifier_of(&self, doc: &Value) -> CoreResult<Identifier> {
        doc.get(&self.identifier_field)
            .and_then(Identifier::from_value)
            .ok_or_else(|| {
                CoreError::mapping(format!(
                    "document in {} has no valid {} field",
                    self.collection(),
                    self.identifier_field
                ))
            })
    }

    pub fn instantiate(&self, doc: &Value, id: Identifier) -> CoreResult<Arc<dyn EntityObject>> {
        (self.instantiate)(doc, id)
    }
}

impl fmt::Debug for Persister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persister")
            .field("type", &self.type_name)
            .field("mapping", &self.mapping)
            .finish_non_exhaustive()
    }
}
