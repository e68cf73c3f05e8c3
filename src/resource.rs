//! Per-resource lock state: the transaction-level `LockedResource`.
//!
//! Holds a set of current holders (plural only in `Shared` mode), at most
//! one `exclusive_holder`, and the `TicketQueue` of pending acquisitions.
//! The admission *decision* (whether a given holder's ticket can be granted
//! right now) lives in [`crate::holder`] — this type only stores state and
//! answers the pure wake-up query `holders_to_notify`.

use std::collections::{HashMap, HashSet};

use crate::common::{HolderId, ResourceId};
use crate::ticket::{LockMode, Ticket, TicketId, TicketQueue};

/// The per-resource lock table entry.
///
/// # Invariants
///
/// - `exclusive_holder.is_some()` implies `holders == {exclusive_holder}`.
/// - A holder appears in at most one of (`holders`, `waiting`) at a time,
///   except transiently during an upgrade where it appears in both.
pub struct LockedResource {
    id: ResourceId,
    queue: TicketQueue,
    holders: HashSet<HolderId>,
    exclusive_holder: Option<HolderId>,
    waiting: HashMap<HolderId, TicketId>,
}

impl LockedResource {
    pub fn new(id: impl Into<ResourceId>) -> Self {
        Self {
            id: id.into(),
            queue: TicketQueue::new(),
            holders: HashSet::new(),
            exclusive_holder: None,
            waiting: HashMap::new(),
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn holders(&self) -> &HashSet<HolderId> {
        &self.holders
    }

    pub fn is_holder(&self, holder: HolderId) -> bool {
        self.holders.contains(&holder)
    }

    pub fn exclusive_holder(&self) -> Option<HolderId> {
        self.exclusive_holder
    }

    pub fn is_idle(&mut self) -> bool {
        self.holders.is_empty() && self.queue.is_empty()
    }

    /// Enqueues an acquisition ticket for `holder` and records it in
    /// `waiting` for O(1) cancellation later.
    pub fn enqueue(&mut self, holder: HolderId, mode: LockMode) -> Ticket {
        let ticket = self.queue.enqueue(holder, mode);
        self.waiting.insert(holder, ticket.id);
        ticket
    }

    /// Cancels `holder`'s queued ticket, wherever it sits in the queue.
    /// No-op if the holder has no queued ticket.
    pub fn cancel(&mut self, holder: HolderId) {
        if let Some(ticket_id) = self.waiting.remove(&holder) {
            self.queue.cancel(ticket_id);
        }
    }

    pub fn front_ticket(&mut self) -> Option<Ticket> {
        self.queue.peek()
    }

    pub fn is_front(&mut self, holder: HolderId) -> bool {
        match self.waiting.get(&holder) {
            Some(&ticket_id) => self.queue.is_front(ticket_id),
            None => false,
        }
    }

    /// Pops `holder`'s ticket (it must currently be the front) and records
    /// it as a holder. Used once admission has been decided.
    pub fn pop_front_into_holder(&mut self, mode: LockMode) {
        let ticket = self.queue.dequeue();
        debug_assert!(ticket.is_some(), "pop_front_into_holder called with empty queue");
        if let Some(ticket) = ticket {
            self.waiting.remove(&ticket.holder);
            self.holders.insert(ticket.holder);
            if mode.is_exclusive() {
                self.exclusive_holder = Some(ticket.holder);
            }
        }
    }

    /// Admits `holder` directly without consulting the queue (used for the
    /// empty-resource fast path in `LockHolder::try_acquire`).
    pub fn admit_directly(&mut self, holder: HolderId, mode: LockMode) {
        self.holders.insert(holder);
        if mode.is_exclusive() {
            self.exclusive_holder = Some(holder);
        }
    }

    /// Dequeues `holder`'s front ticket without touching the holder set.
    /// Used for the idempotent-re-entry and in-place-upgrade branches of
    /// `try_acquire`, where the holder set is already correct and only the
    /// stale ticket needs clearing.
    pub fn discard_front_ticket(&mut self, holder: HolderId) {
        let ticket = self.queue.dequeue();
        debug_assert!(
            ticket.map(|t| t.holder == holder).unwrap_or(false),
            "discard_front_ticket called when holder is not the live front"
        );
        self.waiting.remove(&holder);
    }

    /// Marks `holder` (already the sole entry in `holders`) as the
    /// exclusive owner. Used by the front-of-queue upgrade branch, where
    /// `upgrade_in_place`'s cancel-based removal isn't needed because the
    /// ticket is dequeued via `discard_front_ticket` instead.
    pub fn set_exclusive_in_place(&mut self, holder: HolderId) {
        debug_assert!(
            self.holders.len() == 1 && self.holders.contains(&holder),
            "set_exclusive_in_place requires holder to be the sole current holder"
        );
        self.exclusive_holder = Some(holder);
    }

    /// Mid-queue upgrade fast path: a sole shared holder whose exclusive
    /// ticket is not yet at the front skips ahead of the queue.
    /// Removes the ticket (wherever it is) and installs the exclusive hold.
    pub fn upgrade_in_place(&mut self, holder: HolderId) {
        debug_assert!(
            self.holders.len() == 1 && self.holders.contains(&holder),
            "upgrade_in_place requires holder to be the sole current holder"
        );
        self.cancel(holder);
        self.exclusive_holder = Some(holder);
    }

    /// Removes `holder` from the holder set (and clears `exclusive_holder`
    /// if it was the exclusive owner). Returns `true` if it had actually
    /// been a holder.
    pub fn release(&mut self, holder: HolderId) -> bool {
        let was_holder = self.holders.remove(&holder);
        if self.exclusive_holder == Some(holder) {
            self.exclusive_holder = None;
        }
        was_holder
    }

    /// Pure wake-up policy: which holders should be resumed after a
    /// release. Does not mutate any state.
    pub fn holders_to_notify(&mut self) -> Vec<HolderId> {
        if self.holders.is_empty() {
            return match self.queue.peek() {
                None => Vec::new(),
                Some(front) if front.mode.is_exclusive() => vec![front.holder],
                Some(_) => self.queue.shared_prefix_holders(),
            };
        }

        if self.holders.len() == 1 {
            let sole = *self.holders.iter().next().unwrap();
            if let Some(&ticket_id) = self.waiting.get(&sole) {
                if self.queue.live_iter().any(|t| t.id == ticket_id && t.mode.is_exclusive()) {
                    return vec![sole];
                }
            }
        }

        Vec::new()
    }
}
