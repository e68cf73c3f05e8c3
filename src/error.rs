//! Error types for the lock core.
//!
//! Structural invariant violations (a resource with two exclusive holders,
//! for instance) are programming bugs and are raised as assertions, not
//! through this enum — see the module-level policy note in `manager`. What
//! lands here are the user-visible policy outcomes: a lock that isn't held,
//! a holder that tried to double-acquire, a pending upgrade, or a detected
//! cycle.

use thiserror::Error;

use crate::common::{HolderId, ResourceId};

/// Result alias for lock-core operations.
pub type LockResult<T> = std::result::Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// Operation attempted on a resource this holder does not hold.
    #[error("holder {holder} does not hold a lock on '{resource}'")]
    NotHeld { holder: HolderId, resource: ResourceId },

    /// A holder tried to start a second acquire while already waiting on
    /// something else. The actor model assumes one outstanding acquire per
    /// holder; this is a caller bug.
    #[error("holder {holder} attempted to acquire '{resource}' while already waiting on '{waiting_on}'")]
    DoubleAcquire {
        holder: HolderId,
        resource: ResourceId,
        waiting_on: ResourceId,
    },

    /// `try_upgrade` was called while another upgrade was already pending on
    /// the same handle. Returned as a value, never blocks.
    #[error("upgrade already pending on this handle")]
    UpgradePending,

    /// The deadlock detector selected this holder as a cycle-breaking
    /// victim. The scheduler is expected to unwind it via `release_all`.
    #[error("holder {holder} aborted: selected as deadlock victim in cycle {cycle:?}")]
    DeadlockVictim { holder: HolderId, cycle: Vec<HolderId> },

    /// Caller-initiated abort of a waiting acquire. Indistinguishable from
    /// `DeadlockVictim` once unwound, kept separate here purely so callers
    /// can tell which path triggered the abort.
    #[error("holder {holder} cancelled its wait on '{resource}'")]
    Cancelled { holder: HolderId, resource: ResourceId },
}

impl LockError {
    pub fn not_held(holder: HolderId, resource: impl Into<ResourceId>) -> Self {
        LockError::NotHeld { holder, resource: resource.into() }
    }

    pub fn double_acquire(
        holder: HolderId,
        resource: impl Into<ResourceId>,
        waiting_on: impl Into<ResourceId>,
    ) -> Self {
        LockError::DoubleAcquire {
            holder,
            resource: resource.into(),
            waiting_on: waiting_on.into(),
        }
    }

    pub fn deadlock_victim(holder: HolderId, cycle: Vec<HolderId>) -> Self {
        LockError::DeadlockVictim { holder, cycle }
    }

    pub fn cancelled(holder: HolderId, resource: impl Into<ResourceId>) -> Self {
        LockError::Cancelled { holder, resource: resource.into() }
    }

    /// True for errors that represent this holder being unwound rather than
    /// a plain failed acquisition attempt.
    pub fn is_abort(&self) -> bool {
        matches!(self, LockError::DeadlockVictim { .. } | LockError::Cancelled { .. })
    }
}
