// Cooperative reader-writer lock manager with deadlock detection.
//
// Two related lock subsystems live here, sharing a common ticket queue and
// shared/exclusive vocabulary:
//
// | Module | Responsibility |
// |--------|----------------|
// | [`ticket`] | FIFO ticket queue with O(1) tombstone cancellation |
// | [`resource`] | Transaction-level per-resource holder set + queue |
// | [`thread_lock`] | Single-slot refcounted lock for one cache entry |
// | [`holder`] | Per-holder bookkeeping and the `try_acquire` admission rule |
// | [`deadlock`] | Wait-for graph and the cycle-detecting sweep |
// | [`manager`] | Orchestrates the above into the public `LockManager` API |
// | [`cache`] | The object-cache contract the lock core is wrapped by |
// | [`event`] | The scheduler contract (`lock_released` wait/publish) |
// | [`error`] | `LockError` / `LockResult` |
//
// # Quick start
//
// ```rust,ignore
// use cooplock::{LockManager, LockManagerConfig};
//
// let mgr = LockManager::new(LockManagerConfig::default());
// mgr.acquire_shared(1, "row:42")?;
// mgr.upgrade(1, "row:42")?;
// mgr.release(1, "row:42")?;
// # Ok::<(), cooplock::LockError>(())
// ```

pub mod cache;
pub mod common;
pub mod deadlock;
pub mod error;
pub mod event;
pub mod holder;
pub mod manager;
pub mod resource;
pub mod thread_lock;
pub mod ticket;

pub use cache::{InMemoryObjCache, ObjCache, ObjCacheEntry};
pub use deadlock::{DeadlockDetector, DeadlockDetectorConfig, DeadlockStats, VictimSelectionPolicy, WaitForGraph};
pub use error::{LockError, LockResult};
pub use event::{CondvarEventBridge, EventBridge};
pub use holder::{Admission, LockHolder};
pub use manager::{LockManager, LockManagerConfig, LockManagerStats};
pub use resource::LockedResource;
pub use thread_lock::{Lock, Slot};
pub use ticket::{LockMode, Ticket, TicketId, TicketQueue};

/// Initializes the `tracing` subscriber from `RUST_LOG` (or `info` if
/// unset). Convenience for binaries/tests embedding this crate; library
/// code should never call this itself.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
