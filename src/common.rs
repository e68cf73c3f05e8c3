// Shared identifiers and small constants used across the lock core.
//
// Mirrors the role of `transaction::TransactionId` in the wider stack this
// crate was extracted from: a handful of type aliases so call sites read as
// domain types instead of bare integers.

/// Identifies a holder (transaction, worker task) that can acquire locks.
///
/// Holder ids are assigned by the caller (typically a monotonic counter kept
/// by the scheduler) and are never reused while a cycle involving that id
/// could still be traversed by the deadlock detector.
pub type HolderId = u64;

/// Identifies a lockable resource, e.g. a cache key or page id.
///
/// Kept as an opaque string so callers can key resources however fits their
/// object cache (`"table.row1"`, a hashed page id, ...).
pub type ResourceId = String;

/// Default interval between deadlock-detector sweeps.
pub const DEFAULT_DETECTION_INTERVAL_SECS: u64 = 3;

/// Default cap on DFS recursion depth during cycle detection, guarding
/// against a corrupted wait-for graph turning into an unbounded recursion.
pub const DEFAULT_MAX_DETECTION_DEPTH: usize = 1_000;
