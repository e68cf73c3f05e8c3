//! `LockHolder`: the transaction-level actor. Tracks what one holder
//! currently holds and waits on; the admission decision itself
//! (`try_acquire`) is a pure function of a `LockedResource` and is exposed
//! as an associated function so the orchestrating loop — which also needs
//! the resource table, the wait-for graph, and the event bridge — lives in
//! [`crate::manager`] rather than here.

use std::collections::HashSet;

use crate::common::{HolderId, ResourceId};
use crate::error::{LockError, LockResult};
use crate::resource::LockedResource;
use crate::ticket::LockMode;

/// Outcome of one `try_acquire` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Blocked,
}

/// Bookkeeping for one transaction-level actor: what it holds, and the
/// single resource (if any) it is currently waiting on.
pub struct LockHolder {
    id: HolderId,
    held: HashSet<ResourceId>,
    waiting_on: Option<ResourceId>,
}

impl LockHolder {
    pub fn new(id: HolderId) -> Self {
        Self { id, held: HashSet::new(), waiting_on: None }
    }

    pub fn id(&self) -> HolderId {
        self.id
    }

    pub fn held(&self) -> &HashSet<ResourceId> {
        &self.held
    }

    pub fn is_holding(&self, resource: &ResourceId) -> bool {
        self.held.contains(resource)
    }

    pub fn waiting_on(&self) -> Option<&ResourceId> {
        self.waiting_on.as_ref()
    }

    /// Records that this holder is about to block on `resource`. Fails if
    /// it is already waiting on something else — the actor model assumes
    /// one outstanding acquire per holder.
    pub fn begin_wait(&mut self, resource: ResourceId) -> LockResult<()> {
        if let Some(existing) = &self.waiting_on {
            if existing != &resource {
                return Err(LockError::double_acquire(self.id, resource, existing.clone()));
            }
            return Ok(());
        }
        self.waiting_on = Some(resource);
        Ok(())
    }

    pub fn end_wait(&mut self) -> Option<ResourceId> {
        self.waiting_on.take()
    }

    pub fn mark_held(&mut self, resource: ResourceId) {
        self.held.insert(resource);
    }

    pub fn forget_held(&mut self, resource: &ResourceId) {
        self.held.remove(resource);
    }

    /// Clears and returns every resource this holder holds, for
    /// `release_all`.
    pub fn take_all_held(&mut self) -> HashSet<ResourceId> {
        std::mem::take(&mut self.held)
    }

    /// The admission decision, applied to a single resource this holder's
    /// ticket (or existing hold) concerns. Pure with respect
    /// to anything outside `resource` — callers own enqueueing the ticket,
    /// recording `waiting_on`, and the wait-for graph edge.
    pub fn try_acquire(resource: &mut LockedResource, holder: HolderId, mode: LockMode) -> Admission {
        if resource.is_front(holder) {
            if let Some(exclusive) = resource.exclusive_holder() {
                if exclusive == holder {
                    // Idempotent re-entry: we already hold this resource
                    // exclusively; just clear the stale ticket.
                    resource.discard_front_ticket(holder);
                    return Admission::Admitted;
                }
                return Admission::Blocked;
            }

            if resource.holders().is_empty() {
                resource.pop_front_into_holder(mode);
                return Admission::Admitted;
            }

            // Only shared holders at this point (exclusive_holder is none
            // and holders is non-empty).
            if mode.is_shared() {
                resource.pop_front_into_holder(LockMode::Shared);
                return Admission::Admitted;
            }
            if resource.holders().len() == 1 && resource.is_holder(holder) {
                resource.discard_front_ticket(holder);
                resource.set_exclusive_in_place(holder);
                return Admission::Admitted;
            }
            return Admission::Blocked;
        }

        // Not at the front: the one unfair fast path. A sole shared
        // holder whose exclusive ticket sits behind someone else in the
        // queue skips ahead rather than risk a hidden deadlock with the
        // holder it would otherwise wait behind.
        if mode.is_exclusive() && resource.holders().len() == 1 && resource.is_holder(holder) {
            resource.upgrade_in_place(holder);
            return Admission::Admitted;
        }

        Admission::Blocked
    }

    /// Clears `exclusive_holder`/membership for `resource` and forgets it
    /// locally. The caller still owns calling `holders_to_notify` on the
    /// now-updated resource.
    pub fn release(&mut self, resource: &mut LockedResource, resource_id: &ResourceId) -> LockResult<()> {
        if !self.held.contains(resource_id) {
            return Err(LockError::not_held(self.id, resource_id.clone()));
        }
        resource.release(self.id);
        self.held.remove(resource_id);
        Ok(())
    }
}
