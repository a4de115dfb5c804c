//! Per-collection bulk write command.

use super::Command;
use crate::entity::{EntityMapping, Identifier};
use crate::error::{CoreError, CoreResult};
use crate::store::{BulkWriteResult, DocumentStore, Update, WriteOp};
use crate::types::Priority;
use async_trait::async_trait;
use entimap_codec::Value;
use std::sync::Arc;
use tracing::debug;

/// Aggregates the writes of one flush for a single collection.
///
/// Every added operation raises an expected counter; after the store answers,
/// the reported counts must match exactly. A mismatch means some write was
/// silently not applied (for example a guarded replace lost a version race).
pub struct BulkCommand {
    store: Arc<dyn DocumentStore>,
    collection: &'static str,
    priority: Priority,
    ops: Vec<WriteOp>,
    expected: BulkWriteResult,
}

impl BulkCommand {
    /// Creates an empty command for `mapping`'s collection.
    pub fn new(store: Arc<dyn DocumentStore>, mapping: &EntityMapping) -> Self {
        Self {
            store,
            collection: mapping.collection,
            priority: mapping.priority,
            ops: Vec::new(),
            expected: BulkWriteResult::default(),
        }
    }

    /// Target collection.
    pub fn collection(&self) -> &'static str {
        self.collection
    }

    /// Queues an insert.
    pub fn add_insert(&mut self, id: Identifier, document: Value) {
        self.ops.push(WriteOp::Insert { id, document });
        self.expected.inserted += 1;
    }

    /// Queues a whole-document replace, optionally guarded by a version.
    pub fn add_replace(&mut self, id: Identifier, expected_version: Option<i64>, document: Value) {
        self.ops.push(WriteOp::Replace {
            id,
            expected_version,
            document,
        });
        self.expected.modified += 1;
    }

    /// Queues a field-level update.
    pub fn add_update(&mut self, id: Identifier, update: Update) {
        self.ops.push(WriteOp::Update { id, update });
        self.expected.modified += 1;
    }

    /// Queues a removal.
    pub fn add_remove(&mut self, id: Identifier) {
        self.ops.push(WriteOp::Remove { id });
        self.expected.removed += 1;
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Counts this command expects the store to report.
    pub fn expected(&self) -> BulkWriteResult {
        self.expected
    }

    fn check(&self, actual: BulkWriteResult) -> CoreResult<()> {
        let expected = self.expected;
        let mut problems = Vec::new();
        if actual.inserted != expected.inserted {
            problems.push(format!(
                "expected {} inserted, store reported {}",
                expected.inserted, actual.inserted
            ));
        }
        if actual.modified != expected.modified {
            problems.push(format!(
                "expected {} modified, store reported {}",
                expected.modified, actual.modified
            ));
        }
        if actual.removed != expected.removed {
            problems.push(format!(
                "expected {} removed, store reported {}",
                expected.removed, actual.removed
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::BulkWriteMismatch {
                collection: self.collection.to_string(),
                message: problems.join("; "),
            })
        }
    }
}

#[async_trait]
impl Command for BulkCommand {
    fn priority(&self) -> Priority {
        self.priority
    }

    async fn execute(&mut self) -> CoreResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.ops);
        debug!(
            collection = self.collection,
            ops = ops.len(),
            "submitting bulk write"
        );
        let actual = self.store.bulk_write(self.collection, ops).await?;
        self.check(actual)
    }
}

impl std::fmt::Debug for BulkCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkCommand")
            .field("collection", &self.collection)
            .field("priority", &self.priority)
            .field("ops", &self.ops.len())
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const PEOPLE: EntityMapping = EntityMapping::new("people");

    #[tokio::test]
    async fn counts_match() {
        let store = Arc::new(MemoryStore::new());
        let mut bulk = BulkCommand::new(store.clone(), &PEOPLE);
        let id = Identifier::new();
        bulk.add_insert(id, Value::document().with("_id", id.to_value()));
        assert_eq!(bulk.expected().inserted, 1);
        bulk.execute().await.unwrap();
        assert_eq!(store.len("people"), 1);
    }

    #[tokio::test]
    async fn missing_target_is_a_mismatch() {
        let store = Arc::new(MemoryStore::new());
        let mut bulk = BulkCommand::new(store, &PEOPLE);
        bulk.add_remove(Identifier::new());
        let err = bulk.execute().await.unwrap_err();
        match err {
            CoreError::BulkWriteMismatch { collection, message } => {
                assert_eq!(collection, "people");
                assert!(message.contains("expected 1 removed, store reported 0"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_command_skips_the_store() {
        let store = Arc::new(MemoryStore::new());
        let mut bulk = BulkCommand::new(store, &PEOPLE);
        assert!(bulk.is_empty());
        bulk.execute().await.unwrap();
    }
}
