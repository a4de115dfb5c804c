//! Save, remove, detach, refresh and clear handlers.

use super::cascade::Prepared;
use super::link::IdentityMap;
use super::Shared;
use crate::entity::{EntityObject, Identifier, PropertyFlags};
use crate::error::{CoreError, CoreResult};
use crate::persister::Persister;
use crate::types::{ChangeTracking, EntityState, LinkId, ScheduledOperation};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, trace};

/// Fails if any cascaded entity carries an identifier without being linked.
fn reject_detached(map: &IdentityMap, prepared: &[Prepared]) -> CoreResult<()> {
    match prepared
        .iter()
        .find(|entry| entry.id.is_some() && map.find_by_object(entry.object.key()).is_none())
    {
        Some(entry) => Err(CoreError::detached(entry.persister.collection())),
        None => Ok(()),
    }
}

impl Shared {
    pub(super) async fn save(self: &Arc<Self>, root: Arc<dyn EntityObject>) -> CoreResult<()> {
        let entities = self.cascade(root, PropertyFlags::SAVE, false).await?;
        let prepared = self.prepare(entities)?;

        let mut assigned = Vec::new();
        {
            let mut map = self.map.lock();
            reject_detached(&map, &prepared)?;
            for entry in prepared {
                match map.find_by_object(entry.object.key()) {
                    Some(link_id) => self.resave(&mut map, link_id),
                    None => {
                        let id = self.generator.generate();
                        let link_id = map.insert(
                            Arc::clone(&entry.object),
                            id,
                            entry.persister,
                            EntityState::Managed,
                            None,
                        )?;
                        map.schedule(link_id, ScheduledOperation::Insert);
                        assigned.push((entry.object, id));
                    }
                }
            }
        }

        debug!(inserted = assigned.len(), "save applied");
        for (object, id) in assigned {
            object.set_identifier(Some(id));
        }
        Ok(())
    }

    /// Applies a save to an entity that is already linked.
    fn resave(self: &Arc<Self>, map: &mut IdentityMap, link_id: LinkId) {
        let Some(link) = map.get(link_id) else {
            return;
        };
        let (state, scheduled, key) = (link.state, link.scheduled, link.object.key());
        let explicit = self.tracker.policy(&link.persister) == ChangeTracking::DeferredExplicit;

        match (state, scheduled) {
            (EntityState::Removed, ScheduledOperation::Delete) => {
                trace!(%link_id, "pending delete cancelled");
                map.unschedule(link_id);
                map.set_state(link_id, EntityState::Managed);
                self.tracker.track(map, link_id, || self.observer(key));
                if explicit {
                    map.make_dirty(link_id);
                }
            }
            (EntityState::Removed, _) => {
                map.set_state(link_id, EntityState::Managed);
                map.schedule(link_id, ScheduledOperation::Insert);
            }
            _ if explicit => map.make_dirty(link_id),
            _ => {}
        }
    }

    pub(super) async fn remove(self: &Arc<Self>, root: Arc<dyn EntityObject>) -> CoreResult<()> {
        let flags = PropertyFlags::REMOVE | PropertyFlags::DEREFERENCE;
        let entities = self.cascade(root, flags, false).await?;
        let prepared = self.prepare(entities)?;

        let mut unlinked = Vec::new();
        let mut removed = 0usize;
        {
            let mut map = self.map.lock();
            reject_detached(&map, &prepared)?;
            for entry in &prepared {
                let Some(link_id) = map.find_by_object(entry.object.key()) else {
                    continue;
                };
                let Some(link) = map.get(link_id) else {
                    continue;
                };
                if link.state != EntityState::Managed {
                    continue;
                }
                let pending_insert = link.scheduled == ScheduledOperation::Insert;
                self.tracker.stop(&mut map, link_id);
                if pending_insert {
                    map.remove(link_id);
                    unlinked.push(Arc::clone(&entry.object));
                } else {
                    map.set_state(link_id, EntityState::Removed);
                    map.schedule(link_id, ScheduledOperation::Delete);
                    removed += 1;
                }
            }
        }

        debug!(removed, unlinked = unlinked.len(), "remove applied");
        for object in unlinked {
            object.set_identifier(None);
        }
        Ok(())
    }

    pub(super) async fn detach(self: &Arc<Self>, root: Arc<dyn EntityObject>) -> CoreResult<()> {
        let entities = self.cascade(root, PropertyFlags::DETACH, false).await?;
        let mut map = self.map.lock();
        let mut detached = 0usize;
        for object in &entities {
            if let Some(link_id) = map.find_by_object(object.key()) {
                self.tracker.stop(&mut map, link_id);
                map.remove(link_id);
                detached += 1;
            }
        }
        debug!(detached, "detach applied");
        Ok(())
    }

    pub(super) async fn refresh(self: &Arc<Self>, root: Arc<dyn EntityObject>) -> CoreResult<()> {
        self.check_managed(&*root)?;
        let entities = self.cascade(root, PropertyFlags::REFRESH, false).await?;
        let targets = self.stop_for_refresh(&entities)?;

        let docs = try_join_all(
            targets
                .iter()
                .map(|(_, _, persister, id)| persister.refresh(self.store.as_ref(), *id)),
        )
        .await?;
        for ((_, object, _, id), doc) in targets.iter().zip(&docs) {
            object.load_document(doc, *id)?;
            self.stats.record_load();
        }

        let refreshed = targets.len();
        let mut map = self.map.lock();
        for ((link_id, object, ..), doc) in targets.into_iter().zip(docs) {
            if let Some(link) = map.get_mut(link_id) {
                link.original = Some(doc);
            }
            map.clear_dirty(link_id);
            let key = object.key();
            self.tracker.track(&mut map, link_id, || self.observer(key));
        }
        debug!(refreshed, "refresh applied");
        Ok(())
    }

    /// Resolves the references `root` holds directly, loading targets the
    /// session does not link yet.
    pub(super) async fn fetch(self: &Arc<Self>, root: Arc<dyn EntityObject>) -> CoreResult<()> {
        self.check_managed(&*root)?;
        self.cascade(root, PropertyFlags::DEREFERENCE, true)
            .await
            .map(|_| ())
    }

    /// Fails unless `object` is managed and already stored.
    fn check_managed(&self, object: &dyn EntityObject) -> CoreResult<()> {
        let map = self.map.lock();
        let stored = map
            .find_by_object(object.key())
            .and_then(|link_id| map.get(link_id))
            .is_some_and(|link| {
                link.state == EntityState::Managed && link.scheduled != ScheduledOperation::Insert
            });
        if stored {
            Ok(())
        } else {
            Err(CoreError::not_managed(object.mapping().collection))
        }
    }

    /// Validates that every entity is managed and persisted, then suspends
    /// its tracking.
    fn stop_for_refresh(
        &self,
        entities: &[Arc<dyn EntityObject>],
    ) -> CoreResult<Vec<(LinkId, Arc<dyn EntityObject>, Arc<Persister>, Identifier)>> {
        let mut map = self.map.lock();
        let mut targets = Vec::with_capacity(entities.len());
        for object in entities {
            let link = map
                .find_by_object(object.key())
                .and_then(|link_id| map.get(link_id).map(|link| (link_id, link)));
            match link {
                Some((link_id, link))
                    if link.state == EntityState::Managed
                        && link.scheduled != ScheduledOperation::Insert =>
                {
                    targets.push((
                        link_id,
                        Arc::clone(&link.object),
                        Arc::clone(&link.persister),
                        link.id,
                    ));
                }
                _ => return Err(CoreError::not_managed(object.mapping().collection)),
            }
        }
        for (link_id, ..) in &targets {
            self.tracker.stop(&mut map, *link_id);
        }
        Ok(targets)
    }

    /// Unlinks every entity. Identifiers are kept.
    pub(super) fn clear(&self) {
        self.finds.lock().clear();
        let links = self.map.lock().drain();
        for link in &links {
            link.object.set_observer(None);
        }
        debug!(unlinked = links.len(), "session cleared");
    }
}
