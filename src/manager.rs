//! `LockManager`: the transaction-level orchestrator tying together
//! per-resource state ([`LockedResource`]), per-holder bookkeeping
//! ([`LockHolder`]), the wait-for graph, the deadlock detector, and the
//! event bridge.
//!
//! Structural invariant violations (a resource ending up with two
//! exclusive holders, a holder found twice in a resource's holder set)
//! are bugs in this module, not policy outcomes, and are raised with
//! `debug_assert!`/`assert!` rather than [`LockError`]. Everything a caller
//! can legitimately trigger (acquiring an unheld lock, a pending upgrade, a
//! detected cycle) comes back as a `LockResult`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::common::{HolderId, ResourceId};
use crate::deadlock::{DeadlockDetector, DeadlockDetectorConfig, DeadlockStats, VictimSelectionPolicy, WaitForGraph};
use crate::error::{LockError, LockResult};
use crate::event::{CondvarEventBridge, EventBridge};
use crate::holder::{Admission, LockHolder};
use crate::resource::LockedResource;
use crate::ticket::LockMode;

/// Configuration for a [`LockManager`], following the teacher's
/// `DeadlockDetectorConfig`/`LockManagerConfig` split: detector-specific
/// knobs live on [`DeadlockDetectorConfig`], while `enable_deadlock_detection`
/// is the manager-level switch to turn the whole sweep off (as opposed to
/// merely stretching its interval).
#[derive(Debug, Clone, Copy)]
pub struct LockManagerConfig {
    pub enable_deadlock_detection: bool,
    pub detector: DeadlockDetectorConfig,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self { enable_deadlock_detection: true, detector: DeadlockDetectorConfig::default() }
    }
}

impl LockManagerConfig {
    /// Turns the deadlock-detector sweep on or off entirely. When disabled,
    /// `break_deadlocks`/`force_break_deadlocks` are no-ops: waiters can
    /// still be unblocked by `release`/`cancel_wait`, but a true cycle is
    /// never broken on its own.
    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.enable_deadlock_detection = enabled;
        self
    }

    /// Sets the minimum interval between detector sweeps (`break_deadlocks`
    /// still honors the rate limit; `force_break_deadlocks` ignores it).
    pub fn with_detection_interval(mut self, interval: Duration) -> Self {
        self.detector.interval = interval;
        self
    }

    /// Sets the policy used to pick a victim among the holders on a closed
    /// cycle.
    pub fn with_victim_policy(mut self, policy: VictimSelectionPolicy) -> Self {
        self.detector.policy = policy;
        self
    }

    /// Caps the DFS recursion depth during cycle detection.
    pub fn with_max_detection_depth(mut self, depth: usize) -> Self {
        self.detector.max_depth = depth;
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LockManagerStats {
    pub acquires_total: u64,
    pub acquire_waits: u64,
    pub releases_total: u64,
    pub upgrades_total: u64,
    pub deadlock_victims_total: u64,
}

/// Why a blocked `acquire` loop should give up rather than keep retrying.
/// Consumed by the waiting holder's own loop on its next wake, mirroring
/// how `break_deadlocks` nominates victims without itself unwinding them.
enum Abort {
    Deadlock(Vec<HolderId>),
    Cancelled,
}

struct ManagerState {
    resources: HashMap<ResourceId, LockedResource>,
    holders: HashMap<HolderId, LockHolder>,
    graph: WaitForGraph,
    aborted: HashMap<HolderId, Abort>,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            resources: HashMap::new(),
            holders: HashMap::new(),
            graph: WaitForGraph::new(),
            aborted: HashMap::new(),
        }
    }

    fn resource_mut(&mut self, id: &ResourceId) -> &mut LockedResource {
        self.resources.entry(id.clone()).or_insert_with(|| LockedResource::new(id.clone()))
    }

    fn holder_mut(&mut self, id: HolderId) -> &mut LockHolder {
        self.holders.entry(id).or_insert_with(|| LockHolder::new(id))
    }

    fn drop_resource_if_idle(&mut self, id: &ResourceId) {
        if let Some(r) = self.resources.get_mut(id) {
            if r.is_idle() {
                self.resources.remove(id);
            }
        }
    }
}

/// The transaction-level lock manager.
pub struct LockManager {
    state: Mutex<ManagerState>,
    bridge: Arc<dyn EventBridge>,
    detector: DeadlockDetector,
    deadlock_detection_enabled: bool,
    stats: Mutex<LockManagerStats>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        Self {
            state: Mutex::new(ManagerState::new()),
            bridge: CondvarEventBridge::new(),
            detector: DeadlockDetector::new(config.detector),
            deadlock_detection_enabled: config.enable_deadlock_detection,
            stats: Mutex::new(LockManagerStats::default()),
        }
    }

    pub fn with_bridge(config: LockManagerConfig, bridge: Arc<dyn EventBridge>) -> Self {
        Self {
            state: Mutex::new(ManagerState::new()),
            bridge,
            detector: DeadlockDetector::new(config.detector),
            deadlock_detection_enabled: config.enable_deadlock_detection,
            stats: Mutex::new(LockManagerStats::default()),
        }
    }

    pub fn stats(&self) -> LockManagerStats {
        *self.stats.lock()
    }

    pub fn deadlock_stats(&self) -> DeadlockStats {
        self.detector.stats()
    }

    pub fn acquire_exclusive(&self, holder: HolderId, resource: impl Into<ResourceId>) -> LockResult<()> {
        self.acquire(holder, resource.into(), LockMode::Exclusive, None).map(|_| ())
    }

    pub fn acquire_shared(&self, holder: HolderId, resource: impl Into<ResourceId>) -> LockResult<()> {
        self.acquire(holder, resource.into(), LockMode::Shared, None).map(|_| ())
    }

    /// As `acquire_exclusive`, but gives up and cancels the wait after
    /// `timeout` rather than waiting indefinitely for the detector. Opt-in:
    /// the untimed variants never time out on their own.
    pub fn acquire_exclusive_with_timeout(
        &self,
        holder: HolderId,
        resource: impl Into<ResourceId>,
        timeout: Duration,
    ) -> LockResult<bool> {
        self.acquire(holder, resource.into(), LockMode::Exclusive, Some(timeout))
    }

    pub fn acquire_shared_with_timeout(
        &self,
        holder: HolderId,
        resource: impl Into<ResourceId>,
        timeout: Duration,
    ) -> LockResult<bool> {
        self.acquire(holder, resource.into(), LockMode::Shared, Some(timeout))
    }

    fn acquire(
        &self,
        holder_id: HolderId,
        resource_id: ResourceId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> LockResult<bool> {
        {
            let mut state = self.state.lock();
            let already = {
                let r = state.resource_mut(&resource_id);
                match mode {
                    LockMode::Exclusive => r.exclusive_holder() == Some(holder_id),
                    LockMode::Shared => r.is_holder(holder_id),
                }
            };
            if already {
                return Ok(true);
            }
            state.holder_mut(holder_id).begin_wait(resource_id.clone())?;
            state.resource_mut(&resource_id).enqueue(holder_id, mode);
            state.graph.set_waiting(holder_id, resource_id.clone());
        }

        let mut stats = self.stats.lock();
        stats.acquires_total += 1;
        drop(stats);

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut waited = false;

        loop {
            // `gen` is sampled in the same critical section as the failed
            // admission check, before `state` is dropped. A concurrent
            // `release`/`release_all`/`break_deadlocks` needs this same
            // `state` mutex to mutate anything that could admit us, so its
            // publish can only happen after this read — closing the window
            // where a publish between "not admitted" and "start waiting"
            // would otherwise be missed.
            let gen = {
                let mut state = self.state.lock();
                if let Some(reason) = state.aborted.remove(&holder_id) {
                    state.resource_mut(&resource_id).cancel(holder_id);
                    state.holder_mut(holder_id).end_wait();
                    state.graph.clear(holder_id);
                    drop(state);
                    return match reason {
                        Abort::Deadlock(cycle) => {
                            let mut stats = self.stats.lock();
                            stats.deadlock_victims_total += 1;
                            drop(stats);
                            info!(holder_id, resource = %resource_id, ?cycle, "aborted as deadlock victim");
                            Err(LockError::deadlock_victim(holder_id, cycle))
                        }
                        Abort::Cancelled => {
                            debug!(holder_id, resource = %resource_id, "cancelled");
                            Err(LockError::cancelled(holder_id, resource_id))
                        }
                    };
                }

                let admission = LockHolder::try_acquire(state.resource_mut(&resource_id), holder_id, mode);
                if admission == Admission::Admitted {
                    state.holder_mut(holder_id).mark_held(resource_id.clone());
                    state.holder_mut(holder_id).end_wait();
                    state.graph.clear(holder_id);
                    drop(state);
                    self.bridge.publish_lock_released();
                    debug!(holder_id, resource = %resource_id, ?mode, "acquired");
                    if waited {
                        let mut stats = self.stats.lock();
                        stats.acquire_waits += 1;
                    }
                    return Ok(true);
                }

                self.bridge.current_generation()
            };

            waited = true;
            match deadline {
                None => self.bridge.await_lock_released_since(gen),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let mut state = self.state.lock();
                        state.resource_mut(&resource_id).cancel(holder_id);
                        state.holder_mut(holder_id).end_wait();
                        state.graph.clear(holder_id);
                        debug!(holder_id, resource = %resource_id, "acquire timed out");
                        return Ok(false);
                    }
                    self.bridge.await_lock_released_since_timeout(gen, deadline - now);
                }
            }
        }
    }

    /// Releases `holder`'s hold on `resource`. Wakes whichever holders
    /// `holders_to_notify` names.
    pub fn release(&self, holder: HolderId, resource: impl Into<ResourceId>) -> LockResult<()> {
        let resource_id = resource.into();
        let mut state = self.state.lock();
        let holds = state.holders.get(&holder).map(|h| h.is_holding(&resource_id)).unwrap_or(false);
        if !holds {
            return Err(LockError::not_held(holder, resource_id));
        }
        {
            let resource_ref = state.resources.get_mut(&resource_id).expect("held resource exists");
            let holder_ref = state.holders.get_mut(&holder).expect("checked above");
            holder_ref.release(resource_ref, &resource_id)?;
            let notify = resource_ref.holders_to_notify();
            debug!(holder, resource = %resource_id, ?notify, "released, waking candidates");
        }
        state.drop_resource_if_idle(&resource_id);
        drop(state);

        self.bridge.publish_lock_released();
        let mut stats = self.stats.lock();
        stats.releases_total += 1;
        Ok(())
    }

    /// Attempts to upgrade `holder`'s shared hold on `resource` to
    /// exclusive. Blocks until it commits; never called on an already
    /// idempotently-exclusive hold by the wait loop (it would return
    /// immediately via `try_acquire`'s idempotent-re-entry branch).
    pub fn upgrade(&self, holder: HolderId, resource: impl Into<ResourceId>) -> LockResult<()> {
        let resource_id = resource.into();
        self.acquire_exclusive(holder, resource_id).map(|_| {
            let mut stats = self.stats.lock();
            stats.upgrades_total += 1;
        })
    }

    /// Cancels a holder's in-flight acquire without releasing anything it
    /// already holds. The actual ticket/graph cleanup happens on the
    /// blocked `acquire` call's own next wake — marking it here and
    /// touching its ticket from this thread would race the loop that owns
    /// it.
    pub fn cancel_wait(&self, holder: HolderId) {
        let mut state = self.state.lock();
        let is_waiting = state.holders.get(&holder).and_then(|h| h.waiting_on()).is_some();
        if is_waiting {
            state.aborted.entry(holder).or_insert(Abort::Cancelled);
        }
        drop(state);
        self.bridge.publish_lock_released();
    }

    /// Cancels any in-flight wait and releases everything `holder` holds.
    /// Returns the resources that were released, so the caller can wake
    /// successors on each. If `holder` is currently blocked in `acquire`
    /// on another thread, that wait is marked cancelled (see
    /// `cancel_wait`) rather than torn down from here.
    pub fn release_all(&self, holder: HolderId) -> HashSet<ResourceId> {
        let mut state = self.state.lock();

        let is_waiting = state.holders.get(&holder).and_then(|h| h.waiting_on()).is_some();
        if is_waiting {
            state.aborted.entry(holder).or_insert(Abort::Cancelled);
        }

        let held = state.holder_mut(holder).take_all_held();
        for resource_id in &held {
            state.resource_mut(resource_id).release(holder);
            state.drop_resource_if_idle(resource_id);
        }
        drop(state);

        self.bridge.publish_lock_released();
        let mut stats = self.stats.lock();
        stats.releases_total += held.len() as u64;
        held
    }

    /// Runs a deadlock sweep (subject to the detector's interval) and, for
    /// any victims found, marks them so their own wait loop aborts on next
    /// wake and publishes a wakeup to ensure they notice promptly. Returns
    /// the holders nominated. A no-op if `enable_deadlock_detection` is
    /// `false` in this manager's config.
    pub fn break_deadlocks(&self) -> HashSet<HolderId> {
        if !self.deadlock_detection_enabled {
            return HashSet::new();
        }
        self.run_detection(|d, graph, holders_of| d.maybe_detect(graph, holders_of).unwrap_or_default())
    }

    /// As `break_deadlocks`, ignoring the detector's rate limit. Mainly for
    /// tests and explicit scheduler-driven ticks. Still a no-op if
    /// `enable_deadlock_detection` is `false`.
    pub fn force_break_deadlocks(&self) -> HashSet<HolderId> {
        if !self.deadlock_detection_enabled {
            return HashSet::new();
        }
        self.run_detection(|d, graph, holders_of| d.force_detect(graph, holders_of))
    }

    fn run_detection(
        &self,
        run: impl FnOnce(&DeadlockDetector, &WaitForGraph, &dyn Fn(&ResourceId) -> HashSet<HolderId>) -> HashSet<HolderId>,
    ) -> HashSet<HolderId> {
        let state = self.state.lock();
        let graph = &state.graph;
        let resources = &state.resources;
        let holders_of = |id: &ResourceId| resources.get(id).map(|r| r.holders().clone()).unwrap_or_default();
        let victims = run(&self.detector, graph, &holders_of);
        drop(state);

        if victims.is_empty() {
            return victims;
        }

        let cycle: Vec<HolderId> = {
            let mut v: Vec<HolderId> = victims.iter().copied().collect();
            v.sort_unstable();
            v
        };
        warn!(?cycle, "deadlock cycle detected");
        let mut state = self.state.lock();
        for &victim in &victims {
            state.aborted.insert(victim, Abort::Deadlock(cycle.clone()));
        }
        drop(state);
        self.bridge.publish_lock_released();
        victims
    }
}
