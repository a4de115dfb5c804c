//! Feed of unhandled session errors.
//!
//! An operational error that reaches neither its own operation's caller nor
//! a later queued caller is published here, so no failure goes unnoticed.
//!
//! # Usage
//!
//! ```rust,ignore
//! let errors = session.subscribe_errors();
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = errors.recv() {
//!         eprintln!("session error during {:?}: {}", event.operation, event.error);
//!     }
//! });
//! ```

use crate::error::CoreError;
use crate::session::Operation;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// An unhandled error published by a session.
#[derive(Debug, Clone)]
pub struct SessionError {
    /// Position of this event in the feed, starting at 1.
    pub sequence: u64,
    /// Operation whose execution failed.
    pub operation: Operation,
    /// The failure.
    pub error: CoreError,
}

/// Distributes unhandled errors to subscribers.
pub struct ErrorFeed {
    subscribers: RwLock<Vec<Sender<SessionError>>>,
    history: RwLock<Vec<SessionError>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl ErrorFeed {
    /// Creates a new error feed.
    pub fn new() -> Self {
        Self::with_max_history(64)
    }

    /// Creates an error feed keeping at most `max_history` past events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to future errors.
    pub fn subscribe(&self) -> Receiver<SessionError> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Publishes an error to every live subscriber.
    pub fn emit(&self, operation: Operation, error: CoreError) {
        let event = SessionError {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            operation,
            error,
        };
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> Vec<SessionError> {
        self.history.read().clone()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ErrorFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ErrorFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn emit_and_receive() {
        let feed = ErrorFeed::new();
        let rx = feed.subscribe();
        feed.emit(Operation::FLUSH, CoreError::store("down"));

        let event = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.operation, Operation::FLUSH);
    }

    #[test]
    fn subscriber_cleanup() {
        let feed = ErrorFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);
        drop(rx);
        feed.emit(Operation::SAVE, CoreError::store("down"));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[test]
    fn history_truncation() {
        let feed = ErrorFeed::with_max_history(3);
        for _ in 0..5 {
            feed.emit(Operation::FLUSH, CoreError::store("down"));
        }
        let history = feed.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sequence, 3);
    }
}
