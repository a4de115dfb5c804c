//! In-memory document store.

use super::{BulkWriteResult, Criteria, DocumentStore, WriteOp};
use crate::entity::Identifier;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use entimap_codec::{from_cbor, to_canonical_cbor, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

type Collection = BTreeMap<Identifier, Vec<u8>>;

/// A [`DocumentStore`] keeping canonical CBOR documents in memory.
///
/// Useful for tests and embedding. Documents iterate in identifier order.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    version_field: String,
}

impl MemoryStore {
    /// Creates an empty store using the default version field.
    pub fn new() -> Self {
        Self::with_version_field("_v")
    }

    /// Creates an empty store that checks guarded replaces against `field`.
    pub fn with_version_field(field: impl Into<String>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            version_field: field.into(),
        }
    }

    /// Returns the stored document, if any.
    pub fn document(&self, collection: &str, id: Identifier) -> CoreResult<Option<Value>> {
        let collections = self.collections.read();
        match collections.get(collection).and_then(|c| c.get(&id)) {
            Some(bytes) => Ok(Some(from_cbor(bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if `collection` holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn matching(&self, collection: &str, criteria: &Criteria) -> CoreResult<Vec<(Identifier, Value)>> {
        let collections = self.collections.read();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for (id, bytes) in docs {
            let doc = from_cbor(bytes)?;
            if criteria.matches(&doc) {
                found.push((*id, doc));
            }
        }
        Ok(found)
    }

    fn apply(&self, docs: &mut Collection, op: WriteOp, result: &mut BulkWriteResult) -> CoreResult<()> {
        match op {
            WriteOp::Insert { id, document } => {
                if docs.contains_key(&id) {
                    return Err(CoreError::store(format!("duplicate key {id}")));
                }
                docs.insert(id, to_canonical_cbor(&document)?);
                result.inserted += 1;
            }
            WriteOp::Replace {
                id,
                expected_version,
                document,
            } => {
                let Some(stored) = docs.get(&id) else {
                    return Ok(());
                };
                if let Some(expected) = expected_version {
                    let stored = from_cbor(stored)?;
                    let version = stored.get(&self.version_field).and_then(Value::as_integer);
                    if version != Some(expected) {
                        return Ok(());
                    }
                }
                docs.insert(id, to_canonical_cbor(&document)?);
                result.modified += 1;
            }
            WriteOp::Update { id, update } => {
                let Some(stored) = docs.get_mut(&id) else {
                    return Ok(());
                };
                let mut doc = from_cbor(stored)?;
                update.apply(&mut doc);
                *stored = to_canonical_cbor(&doc)?;
                result.modified += 1;
            }
            WriteOp::Remove { id } => {
                if docs.remove(&id).is_some() {
                    result.removed += 1;
                }
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, collection: &str, criteria: &Criteria) -> CoreResult<Option<Value>> {
        Ok(self
            .matching(collection, criteria)?
            .into_iter()
            .next()
            .map(|(_, doc)| doc))
    }

    async fn find(&self, collection: &str, criteria: &Criteria) -> CoreResult<Vec<Value>> {
        Ok(self
            .matching(collection, criteria)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect())
    }

    async fn count(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64> {
        Ok(self.matching(collection, criteria)?.len() as u64)
    }

    async fn delete_many(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64> {
        let ids: Vec<Identifier> = self
            .matching(collection, criteria)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let mut collections = self.collections.write();
        let mut deleted = 0;
        if let Some(docs) = collections.get_mut(collection) {
            for id in ids {
                if docs.remove(&id).is_some() {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> CoreResult<BulkWriteResult> {
        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        let mut result = BulkWriteResult::default();
        for op in ops {
            self.apply(docs, op, &mut result)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Update;

    fn insert(id: Identifier, name: &str) -> WriteOp {
        WriteOp::Insert {
            id,
            document: Value::document()
                .with("_id", id.to_value())
                .with("name", name)
                .with("_v", 1),
        }
    }

    #[tokio::test]
    async fn insert_find_and_count() {
        let store = MemoryStore::new();
        let (a, b) = (Identifier::new(), Identifier::new());
        let result = store
            .bulk_write("people", vec![insert(a, "Ada"), insert(b, "Bob")])
            .await
            .unwrap();
        assert_eq!(result.inserted, 2);

        let criteria = Criteria::new().eq("name", "Ada");
        let found = store.find_one("people", &criteria).await.unwrap().unwrap();
        assert_eq!(found.get("_id"), Some(&a.to_value()));
        assert_eq!(store.count("people", &Criteria::new()).await.unwrap(), 2);
        assert_eq!(store.find("missing", &Criteria::new()).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn duplicate_insert_stops_the_bulk() {
        let store = MemoryStore::new();
        let (a, b) = (Identifier::new(), Identifier::new());
        let err = store
            .bulk_write("people", vec![insert(a, "Ada"), insert(a, "Ada"), insert(b, "Bob")])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Store { .. }));
        assert_eq!(store.len("people"), 1);
    }

    #[tokio::test]
    async fn guarded_replace_checks_version() {
        let store = MemoryStore::new();
        let id = Identifier::new();
        store.bulk_write("people", vec![insert(id, "Ada")]).await.unwrap();

        let stale = WriteOp::Replace {
            id,
            expected_version: Some(7),
            document: Value::document().with("name", "Eve").with("_v", 8),
        };
        let result = store.bulk_write("people", vec![stale]).await.unwrap();
        assert_eq!(result.modified, 0);

        let fresh = WriteOp::Replace {
            id,
            expected_version: Some(1),
            document: Value::document().with("name", "Eve").with("_v", 2),
        };
        let result = store.bulk_write("people", vec![fresh]).await.unwrap();
        assert_eq!(result.modified, 1);
        let stored = store.document("people", id).unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&Value::from("Eve")));
    }

    #[tokio::test]
    async fn update_and_remove_report_missing_targets() {
        let store = MemoryStore::new();
        let id = Identifier::new();
        let update = WriteOp::Update {
            id,
            update: Update {
                set: vec![("name".into(), "Eve".into())],
                unset: vec![],
            },
        };
        let result = store
            .bulk_write("people", vec![update, WriteOp::Remove { id }])
            .await
            .unwrap();
        assert_eq!(result, BulkWriteResult::default());
    }

    #[tokio::test]
    async fn delete_many_by_criteria() {
        let store = MemoryStore::new();
        store
            .bulk_write(
                "people",
                vec![
                    insert(Identifier::new(), "Ada"),
                    insert(Identifier::new(), "Ada"),
                    insert(Identifier::new(), "Bob"),
                ],
            )
            .await
            .unwrap();
        let deleted = store
            .delete_many("people", &Criteria::new().eq("name", "Ada"))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.len("people"), 1);
    }
}
