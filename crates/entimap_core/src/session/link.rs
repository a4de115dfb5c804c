//! Identity map and pending schedule list.
//!
//! Links live in a table keyed by monotonically increasing [`LinkId`]s. The
//! pending schedule list threads through the links as explicit `prev`/`next`
//! slot ids; a link is on the list exactly when its scheduled operation is
//! not `None`.

use crate::entity::{EntityObject, Identifier, ObjectKey};
use crate::error::{CoreError, CoreResult};
use crate::persister::Persister;
use crate::types::{EntityState, LinkFlags, LinkId, ScheduledOperation};
use entimap_codec::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Session record of one managed entity.
pub(crate) struct EntityLink {
    pub id: Identifier,
    pub state: EntityState,
    pub scheduled: ScheduledOperation,
    pub flags: LinkFlags,
    pub object: Arc<dyn EntityObject>,
    /// Last document known to be stored. `None` until the insert is flushed.
    pub original: Option<Value>,
    pub persister: Arc<Persister>,
    prev: Option<LinkId>,
    next: Option<LinkId>,
}

#[derive(Default)]
pub(crate) struct IdentityMap {
    links: HashMap<LinkId, EntityLink>,
    next_link: u64,
    by_id: HashMap<Identifier, LinkId>,
    by_object: HashMap<ObjectKey, LinkId>,
    head: Option<LinkId>,
    tail: Option<LinkId>,
    scheduled: usize,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled
    }

    /// Creates a link. Fails if the identifier or the object is already
    /// linked.
    pub fn insert(
        &mut self,
        object: Arc<dyn EntityObject>,
        id: Identifier,
        persister: Arc<Persister>,
        state: EntityState,
        original: Option<Value>,
    ) -> CoreResult<LinkId> {
        if self.by_id.contains_key(&id) {
            return Err(CoreError::invariant(format!(
                "identifier {id} is already linked"
            )));
        }
        let key = object.key();
        if self.by_object.contains_key(&key) {
            return Err(CoreError::invariant(format!(
                "entity {id} is already linked under another identifier"
            )));
        }
        self.next_link += 1;
        let link_id = LinkId::new(self.next_link);
        self.by_id.insert(id, link_id);
        self.by_object.insert(key, link_id);
        self.links.insert(
            link_id,
            EntityLink {
                id,
                state,
                scheduled: ScheduledOperation::None,
                flags: LinkFlags::empty(),
                object,
                original,
                persister,
                prev: None,
                next: None,
            },
        );
        trace!(%link_id, %id, ?state, "entity linked");
        Ok(link_id)
    }

    pub fn get(&self, link_id: LinkId) -> Option<&EntityLink> {
        self.links.get(&link_id)
    }

    pub fn get_mut(&mut self, link_id: LinkId) -> Option<&mut EntityLink> {
        self.links.get_mut(&link_id)
    }

    pub fn find_by_id(&self, id: Identifier) -> Option<LinkId> {
        self.by_id.get(&id).copied()
    }

    pub fn find_by_object(&self, key: ObjectKey) -> Option<LinkId> {
        self.by_object.get(&key).copied()
    }

    pub fn set_state(&mut self, link_id: LinkId, state: EntityState) {
        if let Some(link) = self.links.get_mut(&link_id) {
            trace!(%link_id, from = ?link.state, to = ?state, "link state changed");
            link.state = state;
        }
    }

    /// Removes a link, taking it off the schedule list first.
    pub fn remove(&mut self, link_id: LinkId) -> Option<EntityLink> {
        self.unschedule(link_id);
        let link = self.links.remove(&link_id)?;
        self.by_id.remove(&link.id);
        self.by_object.remove(&link.object.key());
        trace!(%link_id, id = %link.id, "entity unlinked");
        Some(link)
    }

    /// Records a write intent, appending the link to the schedule list if it
    /// had none. An existing intent is replaced in place.
    pub fn schedule(&mut self, link_id: LinkId, operation: ScheduledOperation) {
        if operation == ScheduledOperation::None {
            self.unschedule(link_id);
            return;
        }
        let tail = self.tail;
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        let was_listed = link.scheduled != ScheduledOperation::None;
        link.scheduled = operation;
        trace!(%link_id, ?operation, "operation scheduled");
        if was_listed {
            return;
        }
        link.prev = tail;
        link.next = None;
        match tail.and_then(|t| self.links.get_mut(&t)) {
            Some(previous) => previous.next = Some(link_id),
            None => self.head = Some(link_id),
        }
        self.tail = Some(link_id);
        self.scheduled += 1;
    }

    /// Drops the write intent and takes the link off the schedule list.
    pub fn unschedule(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        if link.scheduled == ScheduledOperation::None {
            return;
        }
        link.scheduled = ScheduledOperation::None;
        let (prev, next) = (link.prev.take(), link.next.take());
        match prev.and_then(|p| self.links.get_mut(&p)) {
            Some(previous) => previous.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.links.get_mut(&n)) {
            Some(following) => following.prev = prev,
            None => self.tail = prev,
        }
        self.scheduled -= 1;
    }

    /// Marks the link dirty and schedules a dirty check unless another
    /// operation is already pending.
    pub fn make_dirty(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        link.flags |= LinkFlags::DIRTY;
        if link.scheduled == ScheduledOperation::None {
            self.schedule(link_id, ScheduledOperation::DirtyCheck);
        }
    }

    /// Clears the dirty flag and cancels a pending dirty check.
    pub fn clear_dirty(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get_mut(&link_id) else {
            return;
        };
        link.flags -= LinkFlags::DIRTY;
        if link.scheduled == ScheduledOperation::DirtyCheck {
            self.unschedule(link_id);
        }
    }

    /// Takes the whole schedule list in order, leaving it empty.
    ///
    /// The returned intents are cleared on the links, so anything scheduled
    /// afterwards lands on a fresh list.
    pub fn take_schedule(&mut self) -> Vec<(LinkId, ScheduledOperation)> {
        let mut taken = Vec::with_capacity(self.scheduled);
        let mut cursor = self.head.take();
        while let Some(link_id) = cursor {
            let Some(link) = self.links.get_mut(&link_id) else {
                break;
            };
            taken.push((link_id, link.scheduled));
            link.scheduled = ScheduledOperation::None;
            link.prev = None;
            cursor = link.next.take();
        }
        self.tail = None;
        self.scheduled = 0;
        taken
    }

    /// Removes every link.
    pub fn drain(&mut self) -> Vec<EntityLink> {
        self.head = None;
        self.tail = None;
        self.scheduled = 0;
        self.by_id.clear();
        self.by_object.clear();
        self.links.drain().map(|(_, link)| link).collect()
    }

    #[cfg(test)]
    pub fn check_invariants(&self) {
        let mut listed = Vec::new();
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(link_id) = cursor {
            let link = &self.links[&link_id];
            assert_eq!(link.prev, prev, "broken prev pointer at {link_id}");
            assert_ne!(link.scheduled, ScheduledOperation::None);
            listed.push(link_id);
            prev = Some(link_id);
            cursor = link.next;
        }
        assert_eq!(self.tail, prev);
        assert_eq!(listed.len(), self.scheduled);
        let scheduled = self
            .links
            .values()
            .filter(|l| l.scheduled != ScheduledOperation::None)
            .count();
        assert_eq!(scheduled, self.scheduled);
        assert_eq!(self.by_id.len(), self.links.len());
        assert_eq!(self.by_object.len(), self.links.len());
        for (link_id, link) in &self.links {
            assert_eq!(self.by_id[&link.id], *link_id);
            assert_eq!(self.by_object[&link.object.key()], *link_id);
        }
    }
}
