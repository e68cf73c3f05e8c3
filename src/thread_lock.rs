//! The thread-level `Lock`: a refcounted reader/writer handle on a single
//! cache-entry slot.
//!
//! This is the simplified sibling of the transaction-level lock manager in
//! [`crate::manager`] — one slot instead of a holder set, one shared `Lock`
//! object instead of a per-holder record. It exists for the common case of
//! coordinating cooperative tasks around a single cached object (the
//! `ObjCache` contract in [`crate::cache`] wraps exactly one `Slot` per
//! entry).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::HolderId;
use crate::error::{LockError, LockResult};
use crate::event::EventBridge;
use crate::ticket::{LockMode, TicketQueue};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(0);

/// A held lock on a `Slot`. Shared-mode holds are genuinely shared objects:
/// every caller whose `acquire_shared` coalesces onto an existing hold gets
/// a clone of the same `Arc<Lock>`, and `ref_count` tracks how many callers
/// are sharing it. There is exactly one `Lock` instance per exclusive hold.
pub struct Lock {
    /// Internal identity used only to recognize this handle's own ticket
    /// in the slot's queue during upgrade; not a holder id.
    id: HolderId,
    mode: Mutex<LockMode>,
    ref_count: Mutex<usize>,
    is_upgrading: Mutex<bool>,
}

impl Lock {
    fn new(mode: LockMode) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            mode: Mutex::new(mode),
            ref_count: Mutex::new(1),
            is_upgrading: Mutex::new(false),
        })
    }

    pub fn mode(&self) -> LockMode {
        *self.mode.lock()
    }

    pub fn ref_count(&self) -> usize {
        *self.ref_count.lock()
    }

    pub fn is_upgrading(&self) -> bool {
        *self.is_upgrading.lock()
    }
}

struct SlotInner {
    queue: TicketQueue,
    current: Option<Arc<Lock>>,
}

/// The backing state for one cached object: at most one live `Lock`, plus
/// the FIFO queue of pending acquisitions/upgrades.
pub struct Slot {
    inner: Mutex<SlotInner>,
    bridge: Arc<dyn EventBridge>,
}

impl Slot {
    pub fn new(bridge: Arc<dyn EventBridge>) -> Self {
        Self { inner: Mutex::new(SlotInner { queue: TicketQueue::new(), current: None }), bridge }
    }

    /// Acquires the slot exclusively, blocking the caller (via the event
    /// bridge) until it can be installed.
    pub fn acquire_exclusive(&self) -> Arc<Lock> {
        {
            let mut inner = self.inner.lock();
            if inner.current.is_none() && inner.queue.is_empty() {
                let lock = Lock::new(LockMode::Exclusive);
                inner.current = Some(lock.clone());
                return lock;
            }
        }

        let ticket = {
            let mut inner = self.inner.lock();
            inner.queue.enqueue(0, LockMode::Exclusive)
        };

        loop {
            // The generation is sampled while still holding `inner`, in the
            // same critical section as the failed admission check: a
            // concurrent `release` cannot mutate `inner` (and therefore
            // cannot publish) until this lock is dropped, so a publish can
            // never land in the gap between "not admitted" and "start
            // waiting".
            let gen = {
                let mut inner = self.inner.lock();
                let at_front = inner.queue.peek().map(|t| t.id == ticket.id).unwrap_or(false);
                if at_front && inner.current.is_none() {
                    inner.queue.dequeue();
                    let lock = Lock::new(LockMode::Exclusive);
                    inner.current = Some(lock.clone());
                    return lock;
                }
                self.bridge.current_generation()
            };
            self.bridge.await_lock_released_since(gen);
        }
    }

    /// Acquires the slot in shared mode. If another caller already holds it
    /// shared and no writer is queued ahead, this call *coalesces*: it
    /// returns a clone of the existing `Lock`, bumping its `ref_count`,
    /// rather than minting a new handle.
    pub fn acquire_shared(&self) -> Arc<Lock> {
        {
            let mut inner = self.inner.lock();
            if inner.current.is_none() && inner.queue.is_empty() {
                let lock = Lock::new(LockMode::Shared);
                inner.current = Some(lock.clone());
                return lock;
            }
        }

        let ticket = {
            let mut inner = self.inner.lock();
            inner.queue.enqueue(0, LockMode::Shared)
        };

        loop {
            let gen = {
                let mut inner = self.inner.lock();
                let at_front = inner.queue.peek().map(|t| t.id == ticket.id).unwrap_or(false);
                if at_front {
                    match &inner.current {
                        None => {
                            inner.queue.dequeue();
                            let lock = Lock::new(LockMode::Shared);
                            inner.current = Some(lock.clone());
                            return lock;
                        }
                        Some(cur) if cur.mode() == LockMode::Shared => {
                            let coalesced = cur.clone();
                            *coalesced.ref_count.lock() += 1;
                            inner.queue.dequeue();
                            return coalesced;
                        }
                        Some(_exclusive) => {
                            // Front of queue but slot still held exclusively
                            // by the previous occupant; keep waiting.
                        }
                    }
                }
                self.bridge.current_generation()
            };
            self.bridge.await_lock_released_since(gen);
        }
    }

    /// Releases one reference to `lock`. Pre-decrements `ref_count`; the
    /// slot clears only when it reaches zero. Always publishes
    /// `lock_released`, even if nothing was waiting.
    pub fn release(&self, lock: &Arc<Lock>) {
        let mut inner = self.inner.lock();
        assert!(
            inner.current.as_ref().map(|c| Arc::ptr_eq(c, lock)).unwrap_or(false),
            "release called on a lock not currently installed in this slot (post-release use)"
        );

        let mut ref_count = lock.ref_count.lock();
        *ref_count -= 1;
        let empty = *ref_count == 0;
        drop(ref_count);

        if empty {
            inner.current = None;
        }
        drop(inner);
        self.bridge.publish_lock_released();
    }

    /// Flips an exclusive hold to shared and publishes `lock_released` so
    /// waiting sharers may coalesce on their next wakeup.
    pub fn downgrade(&self, lock: &Arc<Lock>) {
        {
            let inner = self.inner.lock();
            assert!(
                inner.current.as_ref().map(|c| Arc::ptr_eq(c, lock)).unwrap_or(false),
                "downgrade called on a lock not currently installed in this slot"
            );
        }
        *lock.mode.lock() = LockMode::Shared;
        self.bridge.publish_lock_released();
    }

    /// Attempts to upgrade a shared hold to exclusive.
    ///
    /// Trivially succeeds if `lock` is already exclusive. Returns
    /// `Err(LockError::UpgradePending)` immediately (never blocks) if
    /// another upgrade is already pending on this same handle — two
    /// sharers waiting on each other's upgrade is a local, single-handle
    /// deadlock this check prevents without needing the transaction-level
    /// detector. Otherwise blocks until this handle's exclusive ticket
    /// reaches the front of the queue *and* it is the sole remaining
    /// sharer (`ref_count == 1`).
    pub fn try_upgrade(&self, lock: &Arc<Lock>) -> LockResult<bool> {
        if lock.mode() == LockMode::Exclusive {
            return Ok(true);
        }

        {
            let mut upgrading = lock.is_upgrading.lock();
            if *upgrading {
                return Err(LockError::UpgradePending);
            }
            *upgrading = true;
        }

        let ticket = {
            let mut inner = self.inner.lock();
            inner.queue.enqueue(lock.id, LockMode::Exclusive)
        };

        loop {
            let gen = {
                let mut inner = self.inner.lock();
                let at_front = inner.queue.peek().map(|t| t.id == ticket.id).unwrap_or(false);
                if at_front && lock.ref_count() == 1 {
                    inner.queue.dequeue();
                    drop(inner);
                    *lock.mode.lock() = LockMode::Exclusive;
                    *lock.is_upgrading.lock() = false;
                    return Ok(true);
                }
                self.bridge.current_generation()
            };
            self.bridge.await_lock_released_since(gen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CondvarEventBridge;
    use std::thread;
    use std::time::Duration;

    fn slot() -> Slot {
        Slot::new(CondvarEventBridge::new())
    }

    #[test]
    fn exclusive_acquire_on_idle_slot_is_immediate() {
        let slot = slot();
        let lock = slot.acquire_exclusive();
        assert_eq!(lock.mode(), LockMode::Exclusive);
        assert_eq!(lock.ref_count(), 1);
    }

    #[test]
    fn shared_acquires_coalesce_into_one_handle() {
        let slot = slot();
        let a = slot.acquire_shared();
        let b = slot.acquire_shared();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ref_count(), 2);
    }

    #[test]
    fn release_clears_slot_at_zero_refs() {
        // Pins the pre-decrement open question from the design notes:
        // ref_count reaches 0 exactly when the slot should clear.
        let slot = slot();
        let a = slot.acquire_shared();
        let b = slot.acquire_shared();
        assert_eq!(a.ref_count(), 2);

        slot.release(&a);
        assert_eq!(b.ref_count(), 1);

        slot.release(&b);
        // Slot is now empty; a fresh exclusive acquire must succeed
        // immediately rather than queueing.
        let c = slot.acquire_exclusive();
        assert_eq!(c.mode(), LockMode::Exclusive);
    }

    #[test]
    #[should_panic(expected = "post-release use")]
    fn release_after_release_panics() {
        let slot = slot();
        let a = slot.acquire_exclusive();
        slot.release(&a);
        slot.release(&a);
    }

    #[test]
    fn sole_holder_upgrade_succeeds_immediately() {
        let slot = slot();
        let a = slot.acquire_shared();
        assert_eq!(slot.try_upgrade(&a).unwrap(), true);
        assert_eq!(a.mode(), LockMode::Exclusive);
    }

    #[test]
    fn second_upgrade_attempt_on_same_handle_fails_fast() {
        let slot = Arc::new(slot());
        let a = slot.acquire_shared();
        let b = slot.acquire_shared();
        assert!(Arc::ptr_eq(&a, &b));

        let slot_clone = slot.clone();
        let a_clone = a.clone();
        let handle = thread::spawn(move || slot_clone.try_upgrade(&a_clone));

        thread::sleep(Duration::from_millis(20));
        assert!(matches!(slot.try_upgrade(&b), Err(LockError::UpgradePending)));

        slot.release(&b);
        assert_eq!(handle.join().unwrap().unwrap(), true);
    }

    #[test]
    fn downgrade_then_upgrade_round_trips() {
        let slot = slot();
        let a = slot.acquire_exclusive();
        slot.downgrade(&a);
        assert_eq!(a.mode(), LockMode::Shared);
        assert_eq!(slot.try_upgrade(&a).unwrap(), true);
        assert_eq!(a.mode(), LockMode::Exclusive);
    }

    #[test]
    fn writer_blocks_behind_reader_and_is_admitted_on_release() {
        let slot = Arc::new(slot());
        let reader = slot.acquire_shared();

        let slot_clone = slot.clone();
        let handle = thread::spawn(move || slot_clone.acquire_exclusive());

        thread::sleep(Duration::from_millis(20));
        slot.release(&reader);

        let writer = handle.join().unwrap();
        assert_eq!(writer.mode(), LockMode::Exclusive);
    }
}
