//! FIFO scheduler of session operations.
//!
//! Each task declares the operation kinds that must not be active while it
//! runs. The head of the queue is admitted as soon as none of those kinds is
//! active; a blocked head blocks everything behind it, so conflicting
//! operations always run in submission order.

use crate::error::{CoreError, CoreResult};
use crate::error_feed::ErrorFeed;
use crate::stats::SessionStats;
use bitflags::bitflags;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

bitflags! {
    /// Kinds of session operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Operation: u32 {
        /// `Session::save`.
        const SAVE = 1 << 0;
        /// `Session::remove`.
        const REMOVE = 1 << 1;
        /// `Session::detach`.
        const DETACH = 1 << 2;
        /// `Session::refresh`.
        const REFRESH = 1 << 3;
        /// `Session::clear`.
        const CLEAR = 1 << 4;
        /// `Session::flush`.
        const FLUSH = 1 << 5;
        /// `Session::find` and `Session::fetch`.
        const FETCH = 1 << 6;
        /// `Session::wait`.
        const WAIT = 1 << 7;
        /// `Session::query` and `Session::count`.
        const FIND_QUERY = 1 << 8;
        /// `Session::remove_all`.
        const MODIFY_QUERY = 1 << 9;
        /// `Session::close`.
        const CLOSE = 1 << 10;
    }
}

const OPERATION_KINDS: usize = 11;

impl Operation {
    /// Operation kinds that must be inactive before this one may start.
    pub fn wait_mask(self) -> Operation {
        let reads = Operation::SAVE
            | Operation::REMOVE
            | Operation::DETACH
            | Operation::CLEAR
            | Operation::FLUSH
            | Operation::MODIFY_QUERY
            | Operation::CLOSE;
        match self {
            Operation::SAVE | Operation::REMOVE | Operation::DETACH => Operation::all() - self,
            Operation::REFRESH => {
                Operation::all() - (Operation::REFRESH | Operation::FETCH | Operation::FIND_QUERY)
            }
            Operation::FETCH | Operation::FIND_QUERY => reads,
            _ => Operation::all(),
        }
    }

    fn slot(self) -> usize {
        self.bits().trailing_zeros() as usize
    }
}

/// Deferred body of a task.
pub(crate) type Job = Box<dyn FnOnce() -> BoxFuture<'static, CoreResult<()>> + Send>;

/// Completion continuation of a task. Completed exactly once, or never when
/// the task is abandoned.
pub(crate) trait Completion: Send {
    /// False once nobody waits for the outcome any more.
    fn is_observed(&self) -> bool;

    fn complete(self: Box<Self>, result: CoreResult<()>);
}

pub(crate) type Callback = Box<dyn Completion>;

struct Task {
    operation: Operation,
    wait: Operation,
    job: Job,
    callback: Option<Callback>,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    active: Operation,
    counts: [usize; OPERATION_KINDS],
    error: Option<CoreError>,
    closed: bool,
    scheduled: bool,
}

impl Default for Operation {
    fn default() -> Self {
        Operation::empty()
    }
}

impl QueueState {
    fn activate(&mut self, operation: Operation) {
        self.counts[operation.slot()] += 1;
        self.active |= operation;
    }

    fn deactivate(&mut self, operation: Operation) -> CoreResult<()> {
        let count = &mut self.counts[operation.slot()];
        if *count == 0 {
            return Err(CoreError::invariant(format!(
                "completion of {operation:?}, which was not active"
            )));
        }
        *count -= 1;
        if *count == 0 {
            self.active -= operation;
        }
        Ok(())
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    errors: Arc<ErrorFeed>,
    stats: Arc<SessionStats>,
}

/// Scheduler handle; clones share one queue.
#[derive(Clone)]
pub(crate) struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new(errors: Arc<ErrorFeed>, stats: Arc<SessionStats>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                errors,
                stats,
            }),
        }
    }

    /// Enqueues a task.
    ///
    /// Processing of a previously empty queue starts on a later scheduler
    /// turn, never inside this call. A closed or invalid queue rejects the
    /// task through its callback (or the error feed when it has none).
    pub fn add(&self, operation: Operation, wait: Operation, job: Job, callback: Option<Callback>) {
        let mut state = self.inner.state.lock();
        let rejection = if state.closed {
            Some(CoreError::SessionClosed)
        } else {
            state.error.as_ref().map(CoreError::invalid_session)
        };
        if let Some(err) = rejection {
            drop(state);
            self.report(operation, callback, err);
            return;
        }

        let was_empty = state.tasks.is_empty();
        state.tasks.push_back(Task {
            operation,
            wait,
            job,
            callback,
        });
        trace!(?operation, queued = state.tasks.len(), "task queued");
        if was_empty && !state.scheduled {
            state.scheduled = true;
            drop(state);
            let queue = self.clone();
            tokio::spawn(async move { queue.process() });
        }
    }

    fn process(&self) {
        let mut admitted = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.scheduled = false;
            while state
                .tasks
                .front()
                .is_some_and(|head| !head.wait.intersects(state.active))
            {
                let Some(task) = state.tasks.pop_front() else {
                    break;
                };
                state.activate(task.operation);
                admitted.push(task);
            }
        }

        for task in admitted {
            let queue = self.clone();
            tokio::spawn(async move {
                let Task {
                    operation,
                    job,
                    callback,
                    ..
                } = task;
                debug!(?operation, "operation started");
                let result = job().await;
                queue.complete(operation, callback, result);
            });
        }
    }

    fn complete(&self, operation: Operation, callback: Option<Callback>, result: CoreResult<()>) {
        let mut state = self.inner.state.lock();
        let result = state.deactivate(operation).and(result);

        let err = match result {
            Ok(()) => {
                drop(state);
                debug!(?operation, "operation finished");
                if let Some(callback) = callback {
                    callback.complete(Ok(()));
                }
                self.process();
                return;
            }
            Err(err) if err.is_usage() => {
                drop(state);
                debug!(?operation, error = %err, "operation rejected");
                self.report(operation, callback, err);
                self.process();
                return;
            }
            Err(err) => err,
        };

        state.error = Some(err.clone());
        let mut abandoned = std::mem::take(&mut state.tasks);
        drop(state);
        self.inner.stats.record_task_error();
        debug!(
            ?operation,
            error = %err,
            abandoned = abandoned.len(),
            "operation failed, session invalidated"
        );

        // the nearest task somebody still waits for hears about it
        let target = callback.filter(|callback| callback.is_observed()).or_else(|| {
            abandoned
                .iter_mut()
                .filter_map(|task| task.callback.take())
                .find(|callback| callback.is_observed())
        });
        self.report(operation, target, err);
    }

    fn report(&self, operation: Operation, callback: Option<Callback>, err: CoreError) {
        match callback {
            Some(callback) => callback.complete(Err(err)),
            None => {
                error!(?operation, error = %err, "unhandled session error");
                self.inner.errors.emit(operation, err);
            }
        }
    }

    /// Makes an invalidated queue accept tasks again.
    pub fn clear_error(&self) {
        self.inner.state.lock().error = None;
    }

    /// Rejects all further tasks and drops the queued ones. Running tasks
    /// still complete.
    pub fn close(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.tasks)
        };
        debug!(dropped = dropped.len(), "task queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn is_invalid(&self) -> bool {
        self.inner.state.lock().error.is_some()
    }

    #[cfg(test)]
    fn active(&self) -> Operation {
        self.inner.state.lock().active
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TaskQueue")
            .field("queued", &state.tasks.len())
            .field("active", &state.active)
            .field("closed", &state.closed)
            .field("invalid", &state.error.is_some())
            .finish_non_exhaustive()
    }
}
