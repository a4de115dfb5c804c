//! Deduplication of concurrent loads by identifier.

use crate::entity::{EntityObject, Identifier};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) type Loaded = CoreResult<Option<Arc<dyn EntityObject>>>;

/// Outcome of joining the load of an identifier.
pub(crate) enum Join<'a> {
    /// No load was in flight; the caller performs it and hands the result
    /// to [`Lead::resolve`].
    Leader(Lead<'a>),
    /// Another load is in flight; its result arrives on the receiver.
    Follower(oneshot::Receiver<Loaded>),
}

/// The leader role for one identifier.
///
/// Dropping it unresolved, as happens when the loading future is cancelled,
/// releases the waiters with [`CoreError::TaskAbandoned`] and frees the slot.
pub(crate) struct Lead<'a> {
    queue: &'a Mutex<FindQueue>,
    id: Identifier,
    resolved: bool,
}

impl Lead<'_> {
    pub fn resolve(mut self, result: &Loaded) {
        self.resolved = true;
        self.queue.lock().resolve(self.id, result);
    }
}

impl Drop for Lead<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.queue
                .lock()
                .resolve(self.id, &Err(CoreError::TaskAbandoned));
        }
    }
}

#[derive(Default)]
pub(crate) struct FindQueue {
    pending: HashMap<Identifier, Vec<oneshot::Sender<Loaded>>>,
}

impl FindQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(queue: &Mutex<Self>, id: Identifier) -> Join<'_> {
        let mut this = queue.lock();
        match this.pending.get_mut(&id) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Join::Follower(rx)
            }
            None => {
                this.pending.insert(id, Vec::new());
                Join::Leader(Lead {
                    queue,
                    id,
                    resolved: false,
                })
            }
        }
    }

    /// Hands the leader's result to every waiter of `id`.
    fn resolve(&mut self, id: Identifier, result: &Loaded) {
        for waiter in self.pending.remove(&id).unwrap_or_default() {
            let _ = waiter.send(result.clone());
        }
    }

    /// Forgets every load in flight. Their waiters see a closed channel.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }
}
