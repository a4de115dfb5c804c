//! Document store boundary.
//!
//! Sessions talk to the database only through [`DocumentStore`]. The wire
//! driver, query translation and collection provisioning live behind it.

mod memory;

pub use memory::MemoryStore;

use crate::entity::Identifier;
use crate::error::CoreResult;
use async_trait::async_trait;
use entimap_codec::Value;

/// Asynchronous document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the first document matching `criteria`.
    async fn find_one(&self, collection: &str, criteria: &Criteria) -> CoreResult<Option<Value>>;

    /// Returns every document matching `criteria`.
    async fn find(&self, collection: &str, criteria: &Criteria) -> CoreResult<Vec<Value>>;

    /// Counts documents matching `criteria`.
    async fn count(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64>;

    /// Deletes documents matching `criteria`, returning how many were deleted.
    async fn delete_many(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64>;

    /// Applies `ops` in order as one request.
    ///
    /// Application stops at the first failing operation; the error is
    /// returned and earlier operations stay applied.
    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> CoreResult<BulkWriteResult>;
}

/// One operation of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a new document.
    Insert {
        /// Identifier of the new document.
        id: Identifier,
        /// Full document, identifier field included.
        document: Value,
    },
    /// Replace a whole document.
    Replace {
        /// Target document.
        id: Identifier,
        /// When set, only a stored document carrying this version is replaced.
        expected_version: Option<i64>,
        /// Replacement document.
        document: Value,
    },
    /// Apply a field-level update.
    Update {
        /// Target document.
        id: Identifier,
        /// Changes to apply.
        update: Update,
    },
    /// Delete a document.
    Remove {
        /// Target document.
        id: Identifier,
    },
}

/// Counts reported by a bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkWriteResult {
    /// Documents inserted.
    pub inserted: u64,
    /// Documents replaced or updated.
    pub modified: u64,
    /// Documents removed.
    pub removed: u64,
}

/// Top-level field changes between two documents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Update {
    /// Fields to set.
    pub set: Vec<(String, Value)>,
    /// Fields to remove.
    pub unset: Vec<String>,
}

impl Update {
    /// Computes the changes turning `original` into `current`.
    ///
    /// Returns `None` when the documents are equal.
    pub fn diff(original: &Value, current: &Value) -> Option<Update> {
        let mut update = Update::default();
        for (key, value) in current.fields() {
            if original.get(key) != Some(value) {
                update.set.push((key.to_string(), value.clone()));
            }
        }
        for (key, _) in original.fields() {
            if current.get(key).is_none() {
                update.unset.push(key.to_string());
            }
        }
        (!update.is_empty()).then_some(update)
    }

    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Applies the changes to `document`.
    pub fn apply(&self, document: &mut Value) {
        for (key, value) in &self.set {
            document.set(key.clone(), value.clone());
        }
        for key in &self.unset {
            document.remove(key);
        }
    }
}

/// Conjunction of top-level field equalities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Criteria {
    fields: Vec<(String, Value)>,
}

impl Criteria {
    /// Matches every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `field` to equal `value`.
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    /// Matches the document stored under `id`.
    #[must_use]
    pub fn by_id(identifier_field: &str, id: Identifier) -> Self {
        Self::new().eq(identifier_field, id.to_value())
    }

    /// The required equalities.
    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Returns true if `document` satisfies every equality.
    pub fn matches(&self, document: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, value)| document.get(field) == Some(value))
    }
}
