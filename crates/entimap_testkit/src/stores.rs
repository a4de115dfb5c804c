//! Document stores for exercising failure and batching behaviour.

use async_trait::async_trait;
use entimap_codec::Value;
use entimap_core::{
    BulkWriteResult, CoreError, CoreResult, Criteria, DocumentStore, MemoryStore, WriteOp,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A [`MemoryStore`] that fails reads or writes on demand.
///
/// Reads can also be slowed down, so a failing read completes while others
/// are still in flight.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_next_write: AtomicBool,
    failing_collections: Mutex<Vec<String>>,
    read_delay: Option<Duration>,
}

impl FaultyStore {
    /// Creates a store that does not fail yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every bulk write fail while `fail` is set.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next bulk write fail.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Makes every read fail while `fail` is set.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every read of `collection` fail without the read delay.
    pub fn fail_reads_of(&self, collection: &str) {
        self.failing_collections.lock().push(collection.to_string());
    }

    /// Delays every read that does not fail by `delay`.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// The wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    async fn check_read(&self, collection: &str) -> CoreResult<()> {
        let failing = self.fail_reads.load(Ordering::SeqCst)
            || self
                .failing_collections
                .lock()
                .iter()
                .any(|name| name == collection);
        if failing {
            // lets concurrent reads start before this one fails
            tokio::task::yield_now().await;
            return Err(CoreError::store("injected read failure"));
        }
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn check_write(&self) -> CoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) || self.fail_next_write.swap(false, Ordering::SeqCst)
        {
            return Err(CoreError::store("injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn find_one(&self, collection: &str, criteria: &Criteria) -> CoreResult<Option<Value>> {
        self.check_read(collection).await?;
        self.inner.find_one(collection, criteria).await
    }

    async fn find(&self, collection: &str, criteria: &Criteria) -> CoreResult<Vec<Value>> {
        self.check_read(collection).await?;
        self.inner.find(collection, criteria).await
    }

    async fn count(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64> {
        self.check_read(collection).await?;
        self.inner.count(collection, criteria).await
    }

    async fn delete_many(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64> {
        self.check_write()?;
        self.inner.delete_many(collection, criteria).await
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> CoreResult<BulkWriteResult> {
        self.check_write()?;
        self.inner.bulk_write(collection, ops).await
    }
}

/// One bulk write seen by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    /// Target collection.
    pub collection: String,
    /// Operations in submission order.
    pub ops: Vec<WriteOp>,
}

/// A [`MemoryStore`] that records every bulk write and counts reads.
///
/// Reads can be slowed down so concurrent loads overlap.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<RecordedWrite>>,
    reads: AtomicUsize,
    read_delay: Option<Duration>,
}

impl RecordingStore {
    /// Creates an empty recording store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every read by `delay`.
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Bulk writes in the order they started.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Collections written to, in order.
    pub fn written_collections(&self) -> Vec<String> {
        self.writes
            .lock()
            .iter()
            .map(|w| w.collection.clone())
            .collect()
    }

    /// Total number of write operations recorded.
    pub fn op_count(&self) -> usize {
        self.writes.lock().iter().map(|w| w.ops.len()).sum()
    }

    /// Number of reads served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Forgets the recorded writes and reads.
    pub fn reset(&self) {
        self.writes.lock().clear();
        self.reads.store(0, Ordering::SeqCst);
    }

    /// The wrapped store.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    async fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn find_one(&self, collection: &str, criteria: &Criteria) -> CoreResult<Option<Value>> {
        self.read().await;
        self.inner.find_one(collection, criteria).await
    }

    async fn find(&self, collection: &str, criteria: &Criteria) -> CoreResult<Vec<Value>> {
        self.read().await;
        self.inner.find(collection, criteria).await
    }

    async fn count(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64> {
        self.read().await;
        self.inner.count(collection, criteria).await
    }

    async fn delete_many(&self, collection: &str, criteria: &Criteria) -> CoreResult<u64> {
        self.inner.delete_many(collection, criteria).await
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> CoreResult<BulkWriteResult> {
        self.writes.lock().push(RecordedWrite {
            collection: collection.to_string(),
            ops: ops.clone(),
        });
        self.inner.bulk_write(collection, ops).await
    }
}
