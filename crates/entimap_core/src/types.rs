//! Core type definitions for entimap.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot identifier of an entity link inside a session's identity map.
///
/// Link IDs are monotonically increasing and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId(pub u64);

impl LinkId {
    /// Creates a new link ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link:{}", self.0)
    }
}

/// Lifecycle state of an entity relative to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Never saved, carries no identifier.
    New,
    /// Linked to the session and mirrored against the store.
    Managed,
    /// Carries an identifier but is not linked to the session.
    Detached,
    /// Linked and scheduled for (or awaiting) deletion.
    Removed,
}

/// Write intent recorded on an entity link.
///
/// A link is in the pending schedule list exactly when this is not `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScheduledOperation {
    /// No pending write.
    #[default]
    None,
    /// Insert the entity on the next flush.
    Insert,
    /// Delete the entity on the next flush.
    Delete,
    /// Compare against the original document on the next flush.
    DirtyCheck,
}

bitflags! {
    /// Per-link bookkeeping flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LinkFlags: u8 {
        /// The entity may differ from its original document.
        const DIRTY = 0b0000_0001;
    }
}

/// How a session detects mutations of managed entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTracking {
    /// Every managed entity is dirty-checked on every flush.
    #[default]
    DeferredImplicit,
    /// Only entities passed to `save` again are dirty-checked.
    DeferredExplicit,
    /// The first `Handle::write` marks the entity dirty.
    Observe,
}

/// Execution priority of a batch command. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs after everything else.
    pub const LOW: Priority = Priority(-100);
    /// Default priority.
    pub const MEDIUM: Priority = Priority(0);
    /// Runs before everything else.
    pub const HIGH: Priority = Priority(100);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "priority:{}", self.0)
    }
}
