//! Cascade graph walking.

use crate::entity::handle::{EntityObject, Handle, ObjectKey};
use crate::entity::mapping::{Entity, PropertyFlags};
use crate::entity::reference::{Reference, ReferenceSlot, Target};
use crate::entity::Identifier;
use std::any::TypeId;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Embedded values that may carry entity references.
pub trait Walk {
    /// Reports this value's references and nested values to the walker.
    fn walk(&self, walker: &mut Walker<'_>);
}

impl<W: Walk> Walk for Option<W> {
    fn walk(&self, walker: &mut Walker<'_>) {
        if let Some(inner) = self {
            inner.walk(walker);
        }
    }
}

impl<W: Walk> Walk for Vec<W> {
    fn walk(&self, walker: &mut Walker<'_>) {
        for item in self {
            item.walk(walker);
        }
    }
}

/// Collects the entities reachable from a walked entity.
///
/// Handed to [`Entity::walk`](crate::Entity::walk) and [`Walk::walk`].
/// Properties are followed when their cascade flags intersect the running
/// operation's mask; embedded values are always descended into.
pub struct Walker<'a> {
    cascade: PropertyFlags,
    shallow: bool,
    visited: &'a mut HashSet<ObjectKey>,
    pending: &'a mut VecDeque<Arc<dyn EntityObject>>,
    unresolved: &'a mut Vec<UnresolvedRef>,
}

impl Walker<'_> {
    fn follows(&self, flags: PropertyFlags) -> bool {
        self.shallow || flags.intersects(self.cascade & PropertyFlags::ALL)
    }

    fn push(&mut self, object: Arc<dyn EntityObject>) {
        if !self.shallow && self.visited.insert(object.key()) {
            self.pending.push_back(object);
        }
    }

    /// Reports a property holding a loaded entity.
    pub fn entity<T: Entity>(&mut self, flags: PropertyFlags, handle: &Handle<T>) {
        if self.follows(flags) {
            self.push(handle.object());
        }
    }

    /// Reports a reference property.
    pub fn reference<T: Entity>(&mut self, flags: PropertyFlags, reference: &Reference<T>) {
        if !self.follows(flags) {
            return;
        }
        let dereference = self.cascade.contains(PropertyFlags::DEREFERENCE);
        let found = reference.with_state(|target| match target {
            Target::Resolved(handle) => Some(Ok(handle.object())),
            Target::Unresolved(id) if dereference => Some(Err(*id)),
            Target::Unresolved(_) => None,
        });
        match found {
            Some(Ok(object)) => self.push(object),
            Some(Err(id)) => self.unresolved.push(UnresolvedRef {
                id,
                entity_type: TypeId::of::<T>(),
                collection: T::MAPPING.collection,
                slot: reference.slot(),
            }),
            None => {}
        }
    }

    /// Reports each reference of a collection property.
    pub fn references<'r, T: Entity>(
        &mut self,
        flags: PropertyFlags,
        references: impl IntoIterator<Item = &'r Reference<T>>,
    ) {
        for reference in references {
            self.reference(flags, reference);
        }
    }

    /// Descends into an embedded value.
    pub fn embedded<W: Walk + ?Sized>(&mut self, value: &W) {
        value.walk(self);
    }
}

/// A reference the walk could not follow without loading its target.
pub(crate) struct UnresolvedRef {
    pub id: Identifier,
    pub entity_type: TypeId,
    pub collection: &'static str,
    pub slot: Arc<dyn ReferenceSlot>,
}

/// Breadth-first cascade over an entity graph.
///
/// Walking is synchronous; references needing a load are handed back through
/// [`Cascade::take_unresolved`] so the caller can fetch them concurrently and
/// [`Cascade::admit`] the results.
pub(crate) struct Cascade {
    cascade: PropertyFlags,
    shallow: bool,
    visited: HashSet<ObjectKey>,
    pending: VecDeque<Arc<dyn EntityObject>>,
    unresolved: Vec<UnresolvedRef>,
    order: Vec<Arc<dyn EntityObject>>,
}

impl Cascade {
    /// Starts a walk at `root`. A shallow walk only looks at the root's own
    /// properties, following every one of them regardless of flags.
    pub fn new(root: Arc<dyn EntityObject>, cascade: PropertyFlags, shallow: bool) -> Self {
        let mut visited = HashSet::new();
        visited.insert(root.key());
        Self {
            cascade,
            shallow,
            visited,
            pending: VecDeque::from([root]),
            unresolved: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Walks every pending entity.
    pub fn drain(&mut self) {
        while let Some(object) = self.pending.pop_front() {
            let mut walker = Walker {
                cascade: self.cascade,
                shallow: self.shallow,
                visited: &mut self.visited,
                pending: &mut self.pending,
                unresolved: &mut self.unresolved,
            };
            object.walk(&mut walker);
            self.order.push(object);
        }
    }

    pub fn take_unresolved(&mut self) -> Vec<UnresolvedRef> {
        std::mem::take(&mut self.unresolved)
    }

    /// Queues the target of a dereferenced reference.
    pub fn admit(&mut self, object: Arc<dyn EntityObject>) {
        if !self.shallow && self.visited.insert(object.key()) {
            self.pending.push_back(object);
        }
    }

    /// Entities in visiting order, root first.
    pub fn into_order(self) -> Vec<Arc<dyn EntityObject>> {
        self.order
    }
}
