//! Cascade resolution and loading of entities into the identity map.

use super::find_queue::{FindQueue, Join, Loaded};
use super::Shared;
use crate::entity::{Cascade, EntityObject, Identifier, ObjectKey, Observer, PropertyFlags};
use crate::error::{CoreError, CoreResult};
use crate::persister::Persister;
use crate::store::Criteria;
use crate::types::EntityState;
use entimap_codec::Value;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{trace, warn};

/// An entity reached by a cascade, with what the session needs to link it.
pub(super) struct Prepared {
    pub object: Arc<dyn EntityObject>,
    pub persister: Arc<Persister>,
    pub id: Option<Identifier>,
}

impl Shared {
    /// Collects the entities reachable from `root` through properties
    /// carrying `flags`, root first.
    ///
    /// With `DEREFERENCE` set, unresolved references on followed properties
    /// are resolved to the instances this session already links. Only a
    /// shallow walk loads the remaining targets from the store.
    pub(super) async fn cascade(
        self: &Arc<Self>,
        root: Arc<dyn EntityObject>,
        flags: PropertyFlags,
        shallow: bool,
    ) -> CoreResult<Vec<Arc<dyn EntityObject>>> {
        let mut cascade = Cascade::new(root, flags, shallow);
        loop {
            cascade.drain();
            let unresolved = cascade.take_unresolved();
            if unresolved.is_empty() {
                break;
            }
            let mut missing = Vec::new();
            for reference in unresolved {
                let persister = self.registry.get(reference.entity_type, reference.collection)?;
                match self.lookup(&persister, reference.id)? {
                    Some(Some(object)) => {
                        reference.slot.resolve(Arc::clone(&object));
                        cascade.admit(object);
                    }
                    Some(None) => {}
                    None if shallow => missing.push((reference, persister)),
                    None => trace!(
                        collection = reference.collection,
                        id = %reference.id,
                        "leaving reference unloaded"
                    ),
                }
            }
            if missing.is_empty() {
                continue;
            }
            trace!(count = missing.len(), "dereferencing");
            let loaded = try_join_all(
                missing
                    .iter()
                    .map(|(reference, persister)| self.load(persister, reference.id)),
            )
            .await?;
            for ((reference, _), object) in missing.into_iter().zip(loaded) {
                match object {
                    Some(object) => {
                        reference.slot.resolve(Arc::clone(&object));
                        cascade.admit(object);
                    }
                    None => warn!(
                        collection = reference.collection,
                        id = %reference.id,
                        "skipping dangling reference"
                    ),
                }
            }
        }
        Ok(cascade.into_order())
    }

    /// Pairs each entity with its persister and current identifier.
    pub(super) fn prepare(&self, entities: Vec<Arc<dyn EntityObject>>) -> CoreResult<Vec<Prepared>> {
        entities
            .into_iter()
            .map(|object| {
                let persister = self.registry.for_object(&*object)?;
                let id = object.identifier();
                Ok(Prepared {
                    object,
                    persister,
                    id,
                })
            })
            .collect()
    }

    /// Returns the managed entity stored under `id`, loading it on a miss.
    ///
    /// `None` means the document does not exist or the entity was removed in
    /// this session.
    pub(super) async fn load(self: &Arc<Self>, persister: &Arc<Persister>, id: Identifier) -> Loaded {
        if let Some(linked) = self.lookup(persister, id)? {
            return Ok(linked);
        }
        let loaded = match FindQueue::join(&self.finds, id) {
            Join::Follower(rx) => rx.await.map_err(|_| CoreError::TaskAbandoned)??,
            Join::Leader(lead) => {
                let result = self.load_document(persister, id).await;
                lead.resolve(&result);
                result?
            }
        };
        match loaded {
            Some(object) if object.entity_type() != persister.entity_type() => {
                Err(CoreError::invalid_operation(format!(
                    "identifier {id} does not belong to {}",
                    persister.collection()
                )))
            }
            loaded => Ok(loaded),
        }
    }

    /// Looks `id` up in the identity map.
    ///
    /// `Some(None)` marks an entity removed in this session.
    pub(super) fn lookup(
        &self,
        persister: &Persister,
        id: Identifier,
    ) -> CoreResult<Option<Option<Arc<dyn EntityObject>>>> {
        let map = self.map.lock();
        let Some(link) = map.find_by_id(id).and_then(|link_id| map.get(link_id)) else {
            return Ok(None);
        };
        if link.persister.entity_type() != persister.entity_type() {
            return Err(CoreError::invalid_operation(format!(
                "identifier {id} belongs to {}, not {}",
                link.persister.collection(),
                persister.collection()
            )));
        }
        Ok(Some(match link.state {
            EntityState::Removed => None,
            _ => Some(Arc::clone(&link.object)),
        }))
    }

    async fn load_document(self: &Arc<Self>, persister: &Arc<Persister>, id: Identifier) -> Loaded {
        let Some(doc) = persister.find_by_id(self.store.as_ref(), id).await? else {
            return Ok(None);
        };
        self.stats.record_load();
        let object = persister.instantiate(&doc, id)?;
        self.adopt(persister, object, id, doc).map(Some)
    }

    /// Links a freshly loaded entity as managed and starts tracking it.
    ///
    /// If the identifier was linked while the document was in flight, the
    /// linked instance wins.
    pub(super) fn adopt(
        self: &Arc<Self>,
        persister: &Arc<Persister>,
        object: Arc<dyn EntityObject>,
        id: Identifier,
        doc: Value,
    ) -> CoreResult<Arc<dyn EntityObject>> {
        let mut map = self.map.lock();
        if let Some(link_id) = map.find_by_id(id) {
            return map
                .get(link_id)
                .map(|link| Arc::clone(&link.object))
                .ok_or_else(|| CoreError::invariant(format!("dangling index entry for {id}")));
        }
        let link_id = map.insert(
            Arc::clone(&object),
            id,
            Arc::clone(persister),
            EntityState::Managed,
            Some(doc),
        )?;
        let key = object.key();
        self.tracker.track(&mut map, link_id, || self.observer(key));
        Ok(object)
    }

    /// Builds the one-shot observer that marks the entity behind `key`
    /// dirty.
    pub(super) fn observer(self: &Arc<Self>, key: ObjectKey) -> Observer {
        let shared = Arc::downgrade(self);
        Box::new(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut map = shared.map.lock();
            let Some(link_id) = map.find_by_object(key) else {
                return;
            };
            if map
                .get(link_id)
                .is_some_and(|link| link.state == EntityState::Managed)
            {
                trace!(%link_id, "mutation observed");
                map.make_dirty(link_id);
            }
        })
    }

    /// Loads every document matching `criteria`, preferring linked
    /// instances.
    pub(super) async fn query(
        self: &Arc<Self>,
        persister: &Arc<Persister>,
        criteria: &Criteria,
    ) -> CoreResult<Vec<Arc<dyn EntityObject>>> {
        let docs = self.store.find(persister.collection(), criteria).await?;
        let mut objects = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = persister.identifier_of(&doc)?;
            match self.lookup(persister, id)? {
                Some(Some(object)) => objects.push(object),
                Some(None) => {}
                None => {
                    self.stats.record_load();
                    let object = persister.instantiate(&doc, id)?;
                    objects.push(self.adopt(persister, object, id, doc)?);
                }
            }
        }
        Ok(objects)
    }
}
