//! The scheduler contract the lock core needs: a way to block the current
//! task until a `lock_released` event fires, and a way to publish one.
//!
//! This crate is agnostic to what "the current task" means — a real
//! cooperative scheduler suspends a green task at a yield point; the
//! [`CondvarEventBridge`] shipped here blocks a real OS thread instead, so
//! the crate is independently runnable and testable. Either way the lock
//! core never sleeps while holding information that would let another
//! holder make progress: every place that can admit a new holder publishes
//! before returning control to a waiter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Contract the lock core needs from whatever scheduler it is embedded in.
///
/// `await_lock_released_since`/`_timeout` take an explicit generation rather
/// than sampling "now" internally. A caller must read `current_generation()`
/// while still holding its own state lock — at the same moment it observes
/// the state that makes it decide to wait — and only call
/// `await_lock_released_since(gen)` after releasing that lock. That closes
/// the window between "state checked, nothing to do but wait" and "actually
/// started waiting": a publish landing in that window bumps the generation
/// past `gen`, so the wait returns immediately instead of missing it.
pub trait EventBridge: Send + Sync {
    /// The current publish generation. Sample this before dropping the
    /// state lock that led to the decision to wait.
    fn current_generation(&self) -> u64;

    /// Suspends the caller until the generation advances past `since`.
    /// Returns immediately if a publish already happened between the
    /// caller's `current_generation()` sample and this call.
    fn await_lock_released_since(&self, since: u64);

    /// As `await_lock_released_since`, but gives up after `timeout` and
    /// returns `false`. Used only by the opt-in `*_with_timeout` acquire
    /// variants — the untimed core never calls this.
    fn await_lock_released_since_timeout(&self, since: u64, timeout: Duration) -> bool;

    /// Wakes every task currently suspended in `await_lock_released_since*`.
    /// Publishing with no waiters is a no-op.
    fn publish_lock_released(&self);
}

/// Default [`EventBridge`] backed by a `parking_lot` condition variable,
/// in the style of `transaction::lock_manager::LockManager`'s
/// `wait_condvar`. Good enough to drive real OS threads through the lock
/// core's wait loops for tests and for standalone (non-cooperative) use.
#[derive(Default)]
pub struct CondvarEventBridge {
    gate: Mutex<u64>,
    condvar: Condvar,
}

impl CondvarEventBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { gate: Mutex::new(0), condvar: Condvar::new() })
    }
}

impl EventBridge for CondvarEventBridge {
    fn current_generation(&self) -> u64 {
        *self.gate.lock()
    }

    fn await_lock_released_since(&self, since: u64) {
        let mut generation = self.gate.lock();
        while *generation == since {
            self.condvar.wait(&mut generation);
        }
    }

    fn await_lock_released_since_timeout(&self, since: u64, timeout: Duration) -> bool {
        let mut generation = self.gate.lock();
        if *generation != since {
            return true;
        }
        let result = self.condvar.wait_for(&mut generation, timeout);
        !result.timed_out()
    }

    fn publish_lock_released(&self) {
        let mut generation = self.gate.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }
}
