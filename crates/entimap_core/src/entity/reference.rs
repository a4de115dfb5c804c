//! References between entities.

use crate::entity::handle::{EntityObject, Handle};
use crate::entity::mapping::Entity;
use crate::entity::Identifier;
use crate::error::{CoreError, CoreResult};
use entimap_codec::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub(crate) enum Target<T> {
    Resolved(Handle<T>),
    Unresolved(Identifier),
}

/// A mapped property pointing at another entity.
///
/// Stored as the target's identifier. A reference read from the store starts
/// unresolved and is resolved in place by a dereferencing cascade or by
/// `Session::fetch`.
pub struct Reference<T> {
    target: Arc<Mutex<Target<T>>>,
}

impl<T: Entity> Reference<T> {
    /// Creates a reference to a loaded entity.
    pub fn to(handle: &Handle<T>) -> Self {
        Self::with_target(Target::Resolved(handle.clone()))
    }

    /// Creates a reference holding only the target identifier.
    pub fn unresolved(id: Identifier) -> Self {
        Self::with_target(Target::Unresolved(id))
    }

    fn with_target(target: Target<T>) -> Self {
        Self {
            target: Arc::new(Mutex::new(target)),
        }
    }

    /// Returns the target identifier, if known.
    ///
    /// A resolved reference to an entity that was never saved has none.
    pub fn id(&self) -> Option<Identifier> {
        match &*self.target.lock() {
            Target::Resolved(handle) => handle.peek_identifier(),
            Target::Unresolved(id) => Some(*id),
        }
    }

    /// Returns the target handle once resolved.
    pub fn get(&self) -> Option<Handle<T>> {
        match &*self.target.lock() {
            Target::Resolved(handle) => Some(handle.clone()),
            Target::Unresolved(_) => None,
        }
    }

    /// Returns true once the target is loaded.
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.target.lock(), Target::Resolved(_))
    }

    /// Document form: the target identifier.
    pub fn to_value(&self) -> CoreResult<Value> {
        self.id().map(|id| id.to_value()).ok_or_else(|| {
            CoreError::mapping(format!(
                "reference into {} targets an entity without identifier",
                T::MAPPING.collection
            ))
        })
    }

    /// Reads an unresolved reference from its document form.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        Identifier::from_value(value)
            .map(Self::unresolved)
            .ok_or_else(|| {
                CoreError::mapping(format!(
                    "malformed reference into {}",
                    T::MAPPING.collection
                ))
            })
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&Target<T>) -> R) -> R {
        f(&self.target.lock())
    }

    pub(crate) fn slot(&self) -> Arc<dyn ReferenceSlot> {
        self.target.clone()
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        let copy = match &*self.target.lock() {
            Target::Resolved(handle) => Target::Resolved(handle.clone()),
            Target::Unresolved(id) => Target::Unresolved(*id),
        };
        Self {
            target: Arc::new(Mutex::new(copy)),
        }
    }
}

impl<T: Entity> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("collection", &T::MAPPING.collection)
            .field("id", &self.id())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Type-erased, resolvable reference slot collected by a cascade walk.
pub(crate) trait ReferenceSlot: Send + Sync {
    /// Points the slot at `object`. Returns false on a type mismatch.
    fn resolve(&self, object: Arc<dyn EntityObject>) -> bool;
}

impl<T: Entity> ReferenceSlot for Mutex<Target<T>> {
    fn resolve(&self, object: Arc<dyn EntityObject>) -> bool {
        match Handle::<T>::from_object(object) {
            Some(handle) => {
                *self.lock() = Target::Resolved(handle);
                true
            }
            None => false,
        }
    }
}
