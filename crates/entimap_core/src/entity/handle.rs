//! Shared entity handles.

use crate::entity::mapping::{Entity, EntityMapping};
use crate::entity::walk::Walker;
use crate::entity::Identifier;
use crate::error::CoreResult;
use entimap_codec::Value;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// One-shot mutation callback installed by a session.
pub(crate) type Observer = Box<dyn FnOnce() + Send>;

/// Identity of an entity object: the address of its shared allocation.
///
/// Stable for as long as any handle (or session link) keeps the object alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ObjectKey(usize);

pub(crate) struct HandleInner<T> {
    value: RwLock<T>,
    observer: Mutex<Option<Observer>>,
}

impl<T> HandleInner<T> {
    fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            observer: Mutex::new(None),
        }
    }

    fn key(&self) -> ObjectKey {
        ObjectKey(self as *const Self as *const () as usize)
    }
}

/// Caller-owned handle to an entity instance.
///
/// Cloning a handle yields another reference to the same object; sessions
/// identify entities by handle identity, never by value.
///
/// Mutations go through [`Handle::write`], which notifies an observing
/// session before the first change.
pub struct Handle<T> {
    inner: Arc<HandleInner<T>>,
}

impl<T: Entity> Handle<T> {
    /// Wraps a new entity instance.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(HandleInner::new(value)),
        }
    }

    /// Locks the entity for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read()
    }

    /// Locks the entity for writing.
    ///
    /// Fires the session observer, if one is attached, before the lock is
    /// taken. The observer detaches itself after firing.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let observer = self.inner.observer.lock().take();
        if let Some(notify) = observer {
            notify();
        }
        self.inner.value.write()
    }

    /// Returns true if both handles refer to the same object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn key(&self) -> ObjectKey {
        self.inner.key()
    }

    /// Reads the identifier, tolerating a read lock already held by the
    /// caller (self-references serialise while their owner is locked).
    pub(crate) fn peek_identifier(&self) -> Option<Identifier> {
        self.inner.value.read_recursive().identifier()
    }

    pub(crate) fn object(&self) -> Arc<dyn EntityObject> {
        self.inner.clone()
    }

    pub(crate) fn from_object(object: Arc<dyn EntityObject>) -> Option<Self> {
        object
            .into_any()
            .downcast::<HandleInner<T>>()
            .ok()
            .map(|inner| Self { inner })
    }

    #[cfg(test)]
    pub(crate) fn is_observed(&self) -> bool {
        self.inner.observer.lock().is_some()
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.inner.value.try_read().and_then(|v| v.identifier());
        f.debug_struct("Handle")
            .field("collection", &T::MAPPING.collection)
            .field("id", &id)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of an entity object used by session bookkeeping.
///
/// Session code never holds its own state lock while calling the methods
/// that lock the entity value.
pub(crate) trait EntityObject: Send + Sync {
    fn mapping(&self) -> EntityMapping;

    fn entity_type(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    fn key(&self) -> ObjectKey;

    fn identifier(&self) -> Option<Identifier>;

    /// Untracked write of the identifier.
    fn set_identifier(&self, id: Option<Identifier>);

    fn to_document(&self) -> CoreResult<Value>;

    /// Untracked replacement of the entity state from a stored document.
    fn load_document(&self, doc: &Value, id: Identifier) -> CoreResult<()>;

    fn walk(&self, walker: &mut Walker<'_>);

    fn set_observer(&self, observer: Option<Observer>);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Entity> EntityObject for HandleInner<T> {
    fn mapping(&self) -> EntityMapping {
        T::MAPPING
    }

    fn entity_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn key(&self) -> ObjectKey {
        HandleInner::key(self)
    }

    fn identifier(&self) -> Option<Identifier> {
        self.value.read().identifier()
    }

    fn set_identifier(&self, id: Option<Identifier>) {
        self.value.write().set_identifier(id);
    }

    fn to_document(&self) -> CoreResult<Value> {
        self.value.read().to_document()
    }

    fn load_document(&self, doc: &Value, id: Identifier) -> CoreResult<()> {
        let mut loaded = T::from_document(doc)?;
        loaded.set_identifier(Some(id));
        *self.value.write() = loaded;
        Ok(())
    }

    fn walk(&self, walker: &mut Walker<'_>) {
        self.value.read().walk(walker);
    }

    fn set_observer(&self, observer: Option<Observer>) {
        *self.observer.lock() = observer;
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Builds a managed-ready object from a stored document.
pub(crate) fn instantiate<T: Entity>(
    doc: &Value,
    id: Identifier,
) -> CoreResult<Arc<dyn EntityObject>> {
    let mut value = T::from_document(doc)?;
    value.set_identifier(Some(id));
    Ok(Arc::new(HandleInner::new(value)))
}
