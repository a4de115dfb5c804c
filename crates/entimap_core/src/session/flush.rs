//! Flushing the schedule list into a batch.

use super::Shared;
use crate::batch::Batch;
use crate::entity::{EntityObject, Identifier};
use crate::error::{CoreError, CoreResult};
use crate::persister::Persister;
use crate::types::{EntityState, LinkFlags, LinkId, ScheduledOperation};
use entimap_codec::Value;
use std::sync::Arc;
use tracing::debug;

/// Snapshot of one scheduled link, taken under the map lock.
struct FlushEntry {
    link_id: LinkId,
    operation: ScheduledOperation,
    id: Identifier,
    object: Arc<dyn EntityObject>,
    persister: Arc<Persister>,
    original: Option<Value>,
}

impl FlushEntry {
    /// Adds this entry's write to `batch`. Returns the document the store
    /// holds once the batch succeeds, if it changes.
    fn add_to(&self, batch: &mut Batch, skipped: &mut u64) -> CoreResult<Option<Value>> {
        match self.operation {
            ScheduledOperation::Insert => self
                .persister
                .add_insert(batch, &*self.object, self.id)
                .map(Some),
            ScheduledOperation::Delete => {
                self.persister.add_remove(batch, self.id);
                Ok(None)
            }
            ScheduledOperation::DirtyCheck => {
                let original = self.original.as_ref().ok_or_else(|| {
                    CoreError::invariant(format!(
                        "{} scheduled for a dirty check before it was stored",
                        self.id
                    ))
                })?;
                let written = self
                    .persister
                    .dirty_check(batch, &*self.object, self.id, original)?;
                if written.is_none() {
                    *skipped += 1;
                }
                Ok(written)
            }
            ScheduledOperation::None => Ok(None),
        }
    }
}

impl Shared {
    /// Takes the schedule list and writes it as one batch.
    ///
    /// Links scheduled while the flush runs land on a fresh list and wait
    /// for the next flush.
    pub(super) async fn flush(self: &Arc<Self>) -> CoreResult<()> {
        let schedule = self.map.lock().take_schedule();
        let mut batch = Batch::new(Arc::clone(&self.store));
        let mut written = Vec::with_capacity(schedule.len());
        let mut skipped = 0u64;

        for (turn, chunk) in schedule
            .chunks(self.config.flush_chunk_size.max(1))
            .enumerate()
        {
            if turn > 0 {
                tokio::task::yield_now().await;
            }
            let entries: Vec<FlushEntry> = {
                let map = self.map.lock();
                chunk
                    .iter()
                    .filter_map(|&(link_id, operation)| {
                        map.get(link_id).map(|link| FlushEntry {
                            link_id,
                            operation,
                            id: link.id,
                            object: Arc::clone(&link.object),
                            persister: Arc::clone(&link.persister),
                            original: link.original.clone(),
                        })
                    })
                    .collect()
            };
            for entry in &entries {
                let document = entry.add_to(&mut batch, &mut skipped)?;
                written.push((entry.link_id, document));
            }
        }

        let expected = batch.expected();
        let commands = batch.len();
        batch.execute().await?;
        self.stats.record_flush(expected, skipped);
        self.finish_flush(written)?;
        debug!(
            links = schedule.len(),
            commands,
            inserted = expected.inserted,
            modified = expected.modified,
            removed = expected.removed,
            skipped,
            "flush complete"
        );
        Ok(())
    }

    /// Settles the links of a successful flush: removed entities are
    /// unlinked and lose their identifier, managed ones adopt the written
    /// document and resume tracking.
    fn finish_flush(self: &Arc<Self>, written: Vec<(LinkId, Option<Value>)>) -> CoreResult<()> {
        let mut unlinked = Vec::new();
        let settled = {
            let mut map = self.map.lock();
            let mut settled = Ok(());
            for (link_id, document) in written {
                let Some(link) = map.get_mut(link_id) else {
                    continue;
                };
                match link.state {
                    EntityState::Removed => {
                        if let Some(link) = map.remove(link_id) {
                            unlinked.push(link.object);
                        }
                    }
                    EntityState::Managed => {
                        if let Some(document) = document {
                            link.original = Some(document);
                        }
                        if link.scheduled == ScheduledOperation::None {
                            link.flags -= LinkFlags::DIRTY;
                        }
                        let key = link.object.key();
                        self.tracker.track(&mut map, link_id, || self.observer(key));
                    }
                    state => {
                        settled = Err(CoreError::invariant(format!(
                            "{link_id} flushed in state {state:?}"
                        )));
                        break;
                    }
                }
            }
            settled
        };

        for object in unlinked {
            object.set_identifier(None);
        }
        settled
    }
}
