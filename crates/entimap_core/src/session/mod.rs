//! Unit-of-work sessions.
//!
//! A [`Session`] tracks the entities it manages in an identity map, records
//! their pending writes on a schedule list and turns that list into a single
//! [`Batch`](crate::Batch) on [`Session::flush`].
//!
//! Every public operation is queued on the session's task queue when it is
//! called and runs on the tokio runtime, overlapping with operations it does
//! not conflict with. The returned [`Pending`] resolves with the result.
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = factory.create_session();
//!
//! let person = Handle::new(Person::new("Ada"));
//! session.save(&person).await?;
//! session.flush().await?;
//!
//! person.write().name = "Ada Lovelace".into();
//! session.flush().await?;
//! ```

mod cascade;
mod factory;
mod find_queue;
mod flush;
mod lifecycle;
mod link;
mod task_queue;
mod tracker;

pub use factory::SessionFactory;
pub use task_queue::Operation;

use crate::config::Config;
use crate::entity::{Entity, EntityObject, Handle, IdentityGenerator, Identifier, Reference};
use crate::error::{CoreError, CoreResult};
use crate::error_feed::{ErrorFeed, SessionError};
use crate::stats::{SessionStats, StatsSnapshot};
use crate::store::{Criteria, DocumentStore};
use crate::types::EntityState;
use factory::Registry;
use find_queue::FindQueue;
use link::IdentityMap;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use task_queue::{Callback, Completion, Job, TaskQueue};
use tokio::sync::oneshot;
use tracing::error;
use tracker::ChangeTracker;

/// State shared by a session and its running tasks.
pub(crate) struct Shared {
    store: Arc<dyn DocumentStore>,
    config: Arc<Config>,
    generator: Arc<dyn IdentityGenerator>,
    registry: Registry,
    tracker: ChangeTracker,
    map: Mutex<IdentityMap>,
    finds: Mutex<FindQueue>,
    queue: TaskQueue,
    stats: Arc<SessionStats>,
    errors: Arc<ErrorFeed>,
}

/// A unit of work over a document store.
///
/// Cloning a session yields another handle to the same unit of work.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        config: Arc<Config>,
        generator: Arc<dyn IdentityGenerator>,
        registry: Registry,
    ) -> Self {
        let stats = Arc::new(SessionStats::new());
        let errors = Arc::new(ErrorFeed::new());
        Self {
            shared: Arc::new(Shared {
                store,
                tracker: ChangeTracker::new(config.default_change_tracking),
                config,
                generator,
                registry,
                map: Mutex::new(IdentityMap::new()),
                finds: Mutex::new(FindQueue::new()),
                queue: TaskQueue::new(Arc::clone(&errors), Arc::clone(&stats)),
                stats,
                errors,
            }),
        }
    }

    /// Queues `body` as an `operation` task.
    fn enqueue<R, F, Fut>(&self, operation: Operation, body: F) -> Pending<R>
    where
        R: Send + 'static,
        F: FnOnce(Arc<Shared>) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<R>> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let output = Arc::clone(&slot);
        let shared = Arc::clone(&self.shared);
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let value = body(shared).await?;
                *output.lock() = Some(value);
                Ok(())
            })
        });

        let (tx, rx) = oneshot::channel();
        let callback: Callback = Box::new(Reply {
            operation,
            tx,
            errors: Arc::clone(&self.shared.errors),
        });
        self.shared
            .queue
            .add(operation, operation.wait_mask(), job, Some(callback));
        Pending::queued(rx, slot)
    }

    /// Fails when a root entity cannot be saved or removed by this session.
    fn check_root(&self, object: &dyn EntityObject) -> CoreResult<()> {
        let persister = self.shared.registry.for_object(object)?;
        let linked = self.shared.map.lock().find_by_object(object.key()).is_some();
        if !linked && object.identifier().is_some() {
            return Err(CoreError::detached(persister.collection()));
        }
        Ok(())
    }

    /// Saves `handle` and everything reachable through `SAVE` cascades.
    ///
    /// New entities receive an identifier and are inserted on the next
    /// flush. Saving an entity removed in this session cancels the removal.
    pub fn save<T: Entity>(&self, handle: &Handle<T>) -> Pending<()> {
        let root = handle.object();
        if let Err(err) = self.check_root(&*root) {
            return Pending::rejected(err);
        }
        self.enqueue(Operation::SAVE, move |shared| async move {
            shared.save(root).await
        })
    }

    /// Removes `handle` and everything reachable through `REMOVE` cascades.
    ///
    /// Entities that were never flushed are dropped from the session without
    /// touching the store and lose their identifier.
    pub fn remove<T: Entity>(&self, handle: &Handle<T>) -> Pending<()> {
        let root = handle.object();
        if let Err(err) = self.check_root(&*root) {
            return Pending::rejected(err);
        }
        self.enqueue(Operation::REMOVE, move |shared| async move {
            shared.remove(root).await
        })
    }

    /// Stops managing `handle` and its `DETACH` cascades. Pending writes are
    /// dropped; identifiers are kept.
    pub fn detach<T: Entity>(&self, handle: &Handle<T>) -> Pending<()> {
        let root = handle.object();
        self.enqueue(Operation::DETACH, move |shared| async move {
            shared.detach(root).await
        })
    }

    /// Reloads `handle` and its `REFRESH` cascades from the store,
    /// discarding unflushed changes.
    pub fn refresh<T: Entity>(&self, handle: &Handle<T>) -> Pending<()> {
        let root = handle.object();
        self.enqueue(Operation::REFRESH, move |shared| async move {
            shared.refresh(root).await
        })
    }

    /// Forgets every managed entity and makes an invalidated session usable
    /// again. Nothing is written.
    pub fn clear(&self) -> Pending<()> {
        self.shared.queue.clear_error();
        self.enqueue(Operation::CLEAR, |shared| async move {
            shared.clear();
            Ok(())
        })
    }

    /// Writes every pending insert, change and removal in one batch.
    pub fn flush(&self) -> Pending<()> {
        self.enqueue(Operation::FLUSH, |shared| async move { shared.flush().await })
    }

    /// Flushes, clears and closes the session once every operation submitted
    /// before it has completed. Later operations fail with
    /// [`CoreError::SessionClosed`].
    pub fn close(&self) -> Pending<()> {
        self.enqueue(Operation::CLOSE, |shared| async move {
            shared.queue.close();
            let flushed = shared.flush().await;
            shared.clear();
            flushed
        })
    }

    /// Resolves once every operation submitted before it has completed.
    pub fn wait(&self) -> Pending<()> {
        self.enqueue(Operation::WAIT, |_| async { Ok(()) })
    }

    /// Loads the entity stored under `id`.
    ///
    /// Returns the managed instance when the session already has one, so
    /// repeated finds yield the same handle. Concurrent finds of one
    /// identifier share a single store read.
    pub fn find<T: Entity>(&self, id: Identifier) -> Pending<Option<Handle<T>>> {
        let persister = match self.shared.registry.of::<T>() {
            Ok(persister) => persister,
            Err(err) => return Pending::rejected(err),
        };
        self.enqueue(Operation::FETCH, move |shared| async move {
            shared
                .load(&persister, id)
                .await?
                .map(typed::<T>)
                .transpose()
        })
    }

    /// Resolves every unresolved reference held directly by a managed
    /// entity, loading the targets into the session.
    pub fn fetch<T: Entity>(&self, handle: &Handle<T>) -> Pending<()> {
        let root = handle.object();
        self.enqueue(Operation::FETCH, move |shared| async move {
            shared.fetch(root).await
        })
    }

    /// Loads every stored `T` matching `criteria`.
    ///
    /// Entities the session already manages are returned as their managed
    /// instances; entities removed in this session are left out.
    pub fn query<T: Entity>(&self, criteria: Criteria) -> Pending<Vec<Handle<T>>> {
        let persister = match self.shared.registry.of::<T>() {
            Ok(persister) => persister,
            Err(err) => return Pending::rejected(err),
        };
        self.enqueue(Operation::FIND_QUERY, move |shared| async move {
            let objects = shared.query(&persister, &criteria).await?;
            objects.into_iter().map(typed::<T>).collect()
        })
    }

    /// Counts the stored `T` matching `criteria`.
    pub fn count<T: Entity>(&self, criteria: Criteria) -> Pending<u64> {
        let persister = match self.shared.registry.of::<T>() {
            Ok(persister) => persister,
            Err(err) => return Pending::rejected(err),
        };
        self.enqueue(Operation::FIND_QUERY, move |shared| async move {
            shared.store.count(persister.collection(), &criteria).await
        })
    }

    /// Deletes every stored `T` matching `criteria` directly in the store.
    ///
    /// No cascade runs and managed instances keep their session state.
    pub fn remove_all<T: Entity>(&self, criteria: Criteria) -> Pending<u64> {
        let persister = match self.shared.registry.of::<T>() {
            Ok(persister) => persister,
            Err(err) => return Pending::rejected(err),
        };
        self.enqueue(Operation::MODIFY_QUERY, move |shared| async move {
            let removed = shared
                .store
                .delete_many(persister.collection(), &criteria)
                .await?;
            shared.stats.record_removes(removed);
            Ok(removed)
        })
    }

    /// Returns a reference to the entity stored under `id`, resolved when
    /// the session manages that entity.
    pub fn get_reference<T: Entity>(&self, id: Identifier) -> Reference<T> {
        let managed = {
            let map = self.shared.map.lock();
            map.find_by_id(id)
                .and_then(|link_id| map.get(link_id))
                .filter(|link| link.state == EntityState::Managed)
                .map(|link| Arc::clone(&link.object))
        };
        match managed.and_then(Handle::<T>::from_object) {
            Some(handle) => Reference::to(&handle),
            None => Reference::unresolved(id),
        }
    }

    /// Returns true if the session manages `handle` (and it is not removed).
    pub fn contains<T: Entity>(&self, handle: &Handle<T>) -> bool {
        self.state_of(handle) == EntityState::Managed
    }

    /// Returns the identifier the session knows `handle` by.
    pub fn get_id<T: Entity>(&self, handle: &Handle<T>) -> Option<Identifier> {
        let map = self.shared.map.lock();
        map.find_by_object(handle.key())
            .and_then(|link_id| map.get(link_id))
            .map(|link| link.id)
    }

    /// Returns the lifecycle state of `handle` relative to this session.
    pub fn state_of<T: Entity>(&self, handle: &Handle<T>) -> EntityState {
        let linked = {
            let map = self.shared.map.lock();
            map.find_by_object(handle.key())
                .and_then(|link_id| map.get(link_id))
                .map(|link| link.state)
        };
        match linked {
            Some(state) => state,
            None if handle.read().identifier().is_some() => EntityState::Detached,
            None => EntityState::New,
        }
    }

    /// Number of entities with a pending write.
    pub fn pending(&self) -> usize {
        self.shared.map.lock().scheduled_len()
    }

    /// Number of linked entities.
    pub fn len(&self) -> usize {
        self.shared.map.lock().len()
    }

    /// Returns true if the session links no entity.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns false after an operational error until [`Session::clear`].
    pub fn is_valid(&self) -> bool {
        !self.shared.queue.is_invalid()
    }

    /// Returns true once [`Session::close`] has started.
    pub fn is_closed(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Subscribes to errors no caller observed.
    pub fn subscribe_errors(&self) -> Receiver<SessionError> {
        self.shared.errors.subscribe()
    }

    /// Returns the session counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (linked, scheduled) = {
            let map = self.shared.map.lock();
            (map.len(), map.scheduled_len())
        };
        f.debug_struct("Session")
            .field("linked", &linked)
            .field("scheduled", &scheduled)
            .field("queue", &self.shared.queue)
            .finish_non_exhaustive()
    }
}

fn typed<T: Entity>(object: Arc<dyn EntityObject>) -> CoreResult<Handle<T>> {
    let type_name = object.type_name();
    Handle::from_object(object).ok_or_else(|| {
        CoreError::invalid_operation(format!(
            "entity is a {type_name}, not a {}",
            std::any::type_name::<T>()
        ))
    })
}

/// Hands the outcome of a queued task to its [`Pending`].
struct Reply {
    operation: Operation,
    tx: oneshot::Sender<CoreResult<()>>,
    errors: Arc<ErrorFeed>,
}

impl Completion for Reply {
    fn is_observed(&self) -> bool {
        !self.tx.is_closed()
    }

    fn complete(self: Box<Self>, result: CoreResult<()>) {
        let Reply {
            operation,
            tx,
            errors,
        } = *self;
        if let Err(Err(err)) = tx.send(result) {
            error!(?operation, error = %err, "unobserved session error");
            errors.emit(operation, err);
        }
    }
}

/// Result of a queued session operation.
///
/// The operation runs whether or not this future is awaited. Dropping it
/// detaches the caller. A failure nobody observes is handed to the next
/// queued operation somebody awaits, or else published on the session's
/// error feed.
pub struct Pending<R> {
    state: PendingState<R>,
}

enum PendingState<R> {
    Rejected(Option<CoreError>),
    Queued {
        rx: oneshot::Receiver<CoreResult<()>>,
        slot: Arc<Mutex<Option<R>>>,
    },
}

impl<R> Pending<R> {
    fn rejected(err: CoreError) -> Self {
        Self {
            state: PendingState::Rejected(Some(err)),
        }
    }

    fn queued(rx: oneshot::Receiver<CoreResult<()>>, slot: Arc<Mutex<Option<R>>>) -> Self {
        Self {
            state: PendingState::Queued { rx, slot },
        }
    }

    /// Drops the result. See [`Pending`] for where a failure goes.
    pub fn detach(self) {}
}

impl<R> Future for Pending<R> {
    type Output = CoreResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            PendingState::Rejected(err) => {
                Poll::Ready(Err(err.take().unwrap_or(CoreError::TaskAbandoned)))
            }
            PendingState::Queued { rx, slot } => {
                let result = ready!(Pin::new(rx).poll(cx));
                Poll::Ready(match result {
                    Err(_) => Err(CoreError::TaskAbandoned),
                    Ok(Err(err)) => Err(err),
                    Ok(Ok(())) => slot.lock().take().ok_or_else(|| {
                        CoreError::invariant("operation completed without a result")
                    }),
                })
            }
        }
    }
}

impl<R> fmt::Debug for Pending<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            PendingState::Rejected(_) => "rejected",
            PendingState::Queued { .. } => "queued",
        };
        f.debug_struct("Pending")
            .field("state", &state)
            .finish()
    }
}
