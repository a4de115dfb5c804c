//! Change tracking policies.

use crate::entity::Observer;
use crate::persister::Persister;
use crate::session::link::IdentityMap;
use crate::types::{ChangeTracking, LinkId};
use tracing::trace;

/// Decides how a managed entity's mutations reach the schedule list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChangeTracker {
    default: ChangeTracking,
}

impl ChangeTracker {
    pub fn new(default: ChangeTracking) -> Self {
        Self { default }
    }

    pub fn policy(&self, persister: &Persister) -> ChangeTracking {
        persister.change_tracking(self.default)
    }

    /// Starts (or resumes) tracking a managed link.
    ///
    /// `observer` is only called for the `Observe` policy.
    pub fn track(
        &self,
        map: &mut IdentityMap,
        link_id: LinkId,
        observer: impl FnOnce() -> Observer,
    ) {
        let Some(link) = map.get(link_id) else {
            return;
        };
        let policy = self.policy(&link.persister);
        trace!(%link_id, ?policy, "tracking resumed");
        match policy {
            ChangeTracking::DeferredImplicit => map.make_dirty(link_id),
            ChangeTracking::DeferredExplicit => {}
            ChangeTracking::Observe => link.object.set_observer(Some(observer())),
        }
    }

    /// Stops tracking: drops the dirty mark, a pending dirty check and any
    /// attached observer.
    pub fn stop(&self, map: &mut IdentityMap, link_id: LinkId) {
        map.clear_dirty(link_id);
        if let Some(link) = map.get(link_id) {
            link.object.set_observer(None);
        }
    }
}
