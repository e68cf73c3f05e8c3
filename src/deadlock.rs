//! Process-wide wait-for graph and the deadlock detector that sweeps it.
//!
//! Mirrors `transaction::deadlock::DeadlockDetector` in shape — a
//! rate-limited sweep plus an always-run `force_detect` escape hatch, and a
//! pluggable victim-selection policy — with a DFS traversal over explicit
//! `open`/`closed` sets rather than a visited-plus-recursion-stack map.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::common::{HolderId, ResourceId, DEFAULT_DETECTION_INTERVAL_SECS, DEFAULT_MAX_DETECTION_DEPTH};

/// Process-wide `holder -> resource it is waiting on` map. Deliberately
/// thin: the detector needs only this and a way to ask a resource for its
/// current holders (supplied by the caller, since resource storage lives
/// in `manager`).
#[derive(Debug, Default)]
pub struct WaitForGraph {
    waiting_for: HashMap<HolderId, ResourceId>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self { waiting_for: HashMap::new() }
    }

    pub fn set_waiting(&mut self, holder: HolderId, resource: ResourceId) {
        self.waiting_for.insert(holder, resource);
    }

    pub fn clear(&mut self, holder: HolderId) {
        self.waiting_for.remove(&holder);
    }

    pub fn waiting_on(&self, holder: HolderId) -> Option<&ResourceId> {
        self.waiting_for.get(&holder)
    }

    pub fn is_empty(&self) -> bool {
        self.waiting_for.is_empty()
    }

    fn snapshot(&self) -> HashMap<HolderId, ResourceId> {
        self.waiting_for.clone()
    }
}

/// How the detector picks a victim among the holders on a closed cycle.
/// `DfsOrder` (the default) always takes whichever holder the back-edge
/// closed on; the others are a supplemental scoring hook for callers that
/// want a different tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VictimSelectionPolicy {
    DfsOrder,
    Youngest,
    Oldest,
    ByWork,
}

impl Default for VictimSelectionPolicy {
    fn default() -> Self {
        VictimSelectionPolicy::DfsOrder
    }
}

impl VictimSelectionPolicy {
    /// `cycle` is the run of holders from the back-edge target to the
    /// current DFS top; `back_edge_target` is what `DfsOrder` would pick.
    /// `score` ranks holders for `Youngest`/`Oldest`/`ByWork` — higher
    /// scores mean "more recently started" / "more work done" depending on
    /// what the caller passes; absent a scorer every policy degrades to
    /// `DfsOrder`.
    fn choose(
        self,
        cycle: &[HolderId],
        back_edge_target: HolderId,
        score: Option<&dyn Fn(HolderId) -> i64>,
    ) -> HolderId {
        let score = match score {
            Some(f) => f,
            None => return back_edge_target,
        };
        match self {
            VictimSelectionPolicy::DfsOrder => back_edge_target,
            VictimSelectionPolicy::Youngest => {
                cycle.iter().copied().max_by_key(|h| score(*h)).unwrap_or(back_edge_target)
            }
            VictimSelectionPolicy::Oldest => {
                cycle.iter().copied().min_by_key(|h| score(*h)).unwrap_or(back_edge_target)
            }
            VictimSelectionPolicy::ByWork => {
                cycle.iter().copied().min_by_key(|h| score(*h)).unwrap_or(back_edge_target)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeadlockDetectorConfig {
    pub interval: Duration,
    pub max_depth: usize,
    pub policy: VictimSelectionPolicy,
}

impl Default for DeadlockDetectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_DETECTION_INTERVAL_SECS),
            max_depth: DEFAULT_MAX_DETECTION_DEPTH,
            policy: VictimSelectionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlockStats {
    pub sweeps_run: u64,
    pub cycles_found: u64,
    pub victims_selected: u64,
}

/// Sweeps the wait-for graph for cycles on a timer and nominates victims.
pub struct DeadlockDetector {
    config: DeadlockDetectorConfig,
    last_run: Mutex<Option<Instant>>,
    stats: Mutex<DeadlockStats>,
}

impl DeadlockDetector {
    pub fn new(config: DeadlockDetectorConfig) -> Self {
        Self { config, last_run: Mutex::new(None), stats: Mutex::new(DeadlockStats::default()) }
    }

    pub fn stats(&self) -> DeadlockStats {
        *self.stats.lock()
    }

    /// Runs a sweep only if `config.interval` has elapsed since the last
    /// one (or none has run yet). Returns `None` if it skipped.
    pub fn maybe_detect<F>(&self, graph: &WaitForGraph, holders_of: F) -> Option<HashSet<HolderId>>
    where
        F: Fn(&ResourceId) -> HashSet<HolderId>,
    {
        self.maybe_detect_scored(graph, holders_of, None)
    }

    pub fn maybe_detect_scored<F>(
        &self,
        graph: &WaitForGraph,
        holders_of: F,
        score: Option<&dyn Fn(HolderId) -> i64>,
    ) -> Option<HashSet<HolderId>>
    where
        F: Fn(&ResourceId) -> HashSet<HolderId>,
    {
        let mut last_run = self.last_run.lock();
        let due = match *last_run {
            None => true,
            Some(t) => t.elapsed() >= self.config.interval,
        };
        if !due {
            return None;
        }
        *last_run = Some(Instant::now());
        drop(last_run);
        Some(self.run(graph, holders_of, score))
    }

    /// Runs a sweep unconditionally, ignoring the rate limit. Useful for
    /// tests and for scheduler-driven forced sweeps.
    pub fn force_detect<F>(&self, graph: &WaitForGraph, holders_of: F) -> HashSet<HolderId>
    where
        F: Fn(&ResourceId) -> HashSet<HolderId>,
    {
        *self.last_run.lock() = Some(Instant::now());
        self.run(graph, holders_of, None)
    }

    fn run<F>(
        &self,
        graph: &WaitForGraph,
        holders_of: F,
        score: Option<&dyn Fn(HolderId) -> i64>,
    ) -> HashSet<HolderId>
    where
        F: Fn(&ResourceId) -> HashSet<HolderId>,
    {
        let waiting_for = graph.snapshot();
        let mut starts: Vec<HolderId> = waiting_for.keys().copied().collect();
        starts.sort_unstable();

        let mut open: Vec<HolderId> = Vec::new();
        let mut open_set: HashSet<HolderId> = HashSet::new();
        let mut closed: HashSet<HolderId> = HashSet::new();
        let mut victims: HashSet<HolderId> = HashSet::new();
        let mut cycles_found: u64 = 0;

        for start in starts {
            if closed.contains(&start) || victims.contains(&start) {
                continue;
            }
            visit(
                start,
                &waiting_for,
                &holders_of,
                self.config.policy,
                score,
                self.config.max_depth,
                0,
                &mut open,
                &mut open_set,
                &mut closed,
                &mut victims,
                &mut cycles_found,
            );
        }

        let mut stats = self.stats.lock();
        stats.sweeps_run += 1;
        stats.cycles_found += cycles_found;
        stats.victims_selected += victims.len() as u64;
        victims
    }
}

#[allow(clippy::too_many_arguments)]
fn visit<F>(
    v: HolderId,
    waiting_for: &HashMap<HolderId, ResourceId>,
    holders_of: &F,
    policy: VictimSelectionPolicy,
    score: Option<&dyn Fn(HolderId) -> i64>,
    max_depth: usize,
    depth: usize,
    open: &mut Vec<HolderId>,
    open_set: &mut HashSet<HolderId>,
    closed: &mut HashSet<HolderId>,
    victims: &mut HashSet<HolderId>,
    cycles_found: &mut u64,
) where
    F: Fn(&ResourceId) -> HashSet<HolderId>,
{
    if closed.contains(&v) || victims.contains(&v) || depth >= max_depth {
        return;
    }
    open.push(v);
    open_set.insert(v);

    if let Some(resource) = waiting_for.get(&v) {
        let mut neighbors: Vec<HolderId> = holders_of(resource).into_iter().collect();
        neighbors.sort_unstable();
        for w in neighbors {
            if w == v || victims.contains(&w) {
                continue;
            }
            if open_set.contains(&w) {
                let pos = open.iter().position(|&x| x == w).expect("w is in open_set");
                let cycle = &open[pos..];
                let victim = policy.choose(cycle, w, score);
                victims.insert(victim);
                open_set.remove(&victim);
                *cycles_found += 1;
                continue;
            }
            visit(
                w, waiting_for, holders_of, policy, score, max_depth, depth + 1, open, open_set,
                closed, victims, cycles_found,
            );
        }
    }

    open.pop();
    open_set.remove(&v);
    closed.insert(v);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> DeadlockDetector {
        DeadlockDetector::new(DeadlockDetectorConfig {
            interval: Duration::from_millis(0),
            ..Default::default()
        })
    }

    #[test]
    fn no_cycle_yields_no_victims() {
        let mut graph = WaitForGraph::new();
        graph.set_waiting(1, "r1".into());
        let det = detector();
        let holders_of = |r: &ResourceId| if r == "r1" { [2].into() } else { HashSet::new() };
        let victims = det.force_detect(&graph, holders_of);
        assert!(victims.is_empty());
    }

    #[test]
    fn two_cycle_selects_at_least_one_victim() {
        // A waits on r2 (held by B), B waits on r1 (held by A).
        let mut graph = WaitForGraph::new();
        graph.set_waiting(1, "r2".into());
        graph.set_waiting(2, "r1".into());
        let det = detector();
        let holders_of = |r: &ResourceId| match r.as_str() {
            "r1" => [1].into(),
            "r2" => [2].into(),
            _ => HashSet::new(),
        };
        let victims = det.force_detect(&graph, holders_of);
        assert_eq!(victims.len(), 1);
        assert!(victims.contains(&1) || victims.contains(&2));
    }

    #[test]
    fn self_edge_is_ignored() {
        // A holds and waits on the same resource (re-entrant upgrade in
        // flight) — must not be flagged as a cycle against itself.
        let mut graph = WaitForGraph::new();
        graph.set_waiting(1, "r1".into());
        let det = detector();
        let holders_of = |r: &ResourceId| if r == "r1" { [1].into() } else { HashSet::new() };
        let victims = det.force_detect(&graph, holders_of);
        assert!(victims.is_empty());
    }

    #[test]
    fn three_cycle_selects_a_victim() {
        let mut graph = WaitForGraph::new();
        graph.set_waiting(1, "r2".into());
        graph.set_waiting(2, "r3".into());
        graph.set_waiting(3, "r1".into());
        let det = detector();
        let holders_of = |r: &ResourceId| match r.as_str() {
            "r1" => [1].into(),
            "r2" => [2].into(),
            "r3" => [3].into(),
            _ => HashSet::new(),
        };
        let victims = det.force_detect(&graph, holders_of);
        assert_eq!(victims.len(), 1);
    }

    #[test]
    fn rate_limited_sweep_skips_when_too_soon() {
        let graph = WaitForGraph::new();
        let det = DeadlockDetector::new(DeadlockDetectorConfig {
            interval: Duration::from_secs(60),
            ..Default::default()
        });
        let holders_of = |_: &ResourceId| HashSet::new();
        assert!(det.maybe_detect(&graph, holders_of).is_some());
        assert!(det.maybe_detect(&graph, holders_of).is_none());
    }

    #[test]
    fn stats_accumulate_across_sweeps() {
        let mut graph = WaitForGraph::new();
        graph.set_waiting(1, "r2".into());
        graph.set_waiting(2, "r1".into());
        let det = detector();
        let holders_of = |r: &ResourceId| match r.as_str() {
            "r1" => [1].into(),
            "r2" => [2].into(),
            _ => HashSet::new(),
        };
        det.force_detect(&graph, holders_of);
        det.force_detect(&graph, holders_of);
        let stats = det.stats();
        assert_eq!(stats.sweeps_run, 2);
        assert_eq!(stats.victims_selected, 2);
    }
}
