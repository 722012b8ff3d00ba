//! Phase-grouped topological sorting with cycle breaking.
//!
//! [`TopologicalSorter`] orders a dependency graph into [`ExecutionBatch`]es.
//! Hooks are bucketed by [`ExecutionPhase`] first; within a phase the sorter
//! repeatedly takes the topological frontier (hooks with all dependencies
//! satisfied) and groups it by parallel-group tag into batches.
//!
//! Cyclic or otherwise malformed dependency declarations never abort
//! planning. When no hook is ready the sorter detects the cycle, applies
//! ordered breaking strategies (priority, then frequency, then age), and as
//! a last resort forces progress on the hook with the fewest unresolved
//! dependencies. Each loop iteration schedules at least one hook, so the
//! sort always terminates.

use core::time::Duration;
use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use nanoid::nanoid;
use tracing::warn;

use altair_hooks::hook::{ExecutionPhase, HookMetadata, ResourceRequest};

use crate::graph::DependencyGraph;

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionBatch
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate resource estimate for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatchResources {
    /// Summed CPU request across member hooks, in percent.
    pub cpu_percent: f64,
    /// Summed memory request across member hooks, in megabytes.
    pub memory_mb: u64,
}

/// The atomic scheduling unit: hooks of one phase that may run together.
#[derive(Debug, Clone)]
pub struct ExecutionBatch {
    /// Unique batch identifier.
    pub id: String,
    /// Member hooks, in deterministic order.
    pub hooks: Vec<String>,
    /// Phase every member belongs to.
    pub phase: ExecutionPhase,
    /// Upper bound on members executing concurrently.
    pub max_parallelism: usize,
    /// Aggregate resource estimate.
    pub resources: BatchResources,
    /// Estimated wall-clock duration for the batch.
    pub estimated_duration: Duration,
    /// True for single-hook batches created by isolation constraints.
    /// Exclusive batches are never merged with others.
    pub exclusive: bool,
}

impl ExecutionBatch {
    /// Number of member hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns true if the batch has no hooks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

fn new_batch_id() -> String {
    format!("batch_{}", nanoid!(10))
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle breaking
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered strategies for choosing which hook to force out of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleBreakStrategy {
    /// Force the hook with the numerically lowest (highest) priority class.
    ByPriority,
    /// Force the hook executed least often.
    ByFrequency,
    /// Force the hook registered earliest.
    ByAge,
}

impl CycleBreakStrategy {
    /// Strategies in application order.
    pub const ORDERED: [CycleBreakStrategy; 3] = [
        CycleBreakStrategy::ByPriority,
        CycleBreakStrategy::ByFrequency,
        CycleBreakStrategy::ByAge,
    ];
}

// ─────────────────────────────────────────────────────────────────────────────
// TopologicalSorter
// ─────────────────────────────────────────────────────────────────────────────

/// Orders dependency graphs into phase-grouped execution batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologicalSorter;

impl TopologicalSorter {
    /// Creates a sorter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sorts the graph into batches, phase by phase.
    ///
    /// Guarantees: every hook appears in exactly one batch; a hook's
    /// in-graph dependencies appear only in earlier batches; the result is
    /// non-empty whenever the graph is.
    #[must_use]
    pub fn sort_with_phases(
        &self,
        graph: &DependencyGraph,
        metadata: &HashMap<String, HookMetadata>,
        requests: &HashMap<String, ResourceRequest>,
    ) -> Vec<ExecutionBatch> {
        let mut batches = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();

        for phase in ExecutionPhase::ALL {
            let mut remaining: Vec<String> = graph
                .nodes()
                .filter(|n| n.phase == phase)
                .map(|n| n.name.clone())
                .collect();
            remaining.sort();

            while !remaining.is_empty() {
                let mut frontier: Vec<String> = remaining
                    .iter()
                    .filter(|name| self.is_ready(graph, name, &completed))
                    .cloned()
                    .collect();

                if frontier.is_empty() {
                    // No hook is ready: a cycle or a dependency on a later
                    // phase. Degrade to forced progress, never abort.
                    let forced = self.break_deadlock(graph, &remaining, metadata, &completed);
                    warn!(
                        phase = %phase,
                        hook = %forced,
                        "dependency deadlock detected, forcing progress"
                    );
                    frontier.push(forced);
                }

                for batch in self.batch_frontier(graph, &frontier, phase, metadata, requests) {
                    batches.push(batch);
                }

                remaining.retain(|name| !frontier.contains(name));
                completed.extend(frontier);
            }
        }

        batches
    }

    /// True when every in-graph dependency of `name` has completed.
    fn is_ready(&self, graph: &DependencyGraph, name: &str, completed: &HashSet<String>) -> bool {
        graph.get(name).is_some_and(|node| {
            node.dependencies
                .iter()
                .all(|dep| completed.contains(dep) || !graph.contains(dep))
        })
    }

    /// Groups a ready frontier into batches by parallel-group tag.
    ///
    /// Hooks with isolation at or above `Isolated` become their own
    /// exclusive single-hook batch regardless of tags.
    fn batch_frontier(
        &self,
        graph: &DependencyGraph,
        frontier: &[String],
        phase: ExecutionPhase,
        metadata: &HashMap<String, HookMetadata>,
        requests: &HashMap<String, ResourceRequest>,
    ) -> Vec<ExecutionBatch> {
        // BTreeMap keeps group iteration deterministic across runs.
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();

        let mut sorted: Vec<&String> = frontier.iter().collect();
        sorted.sort();

        for name in sorted {
            let node = graph.get(name);
            let isolated = node.is_some_and(|n| n.isolation.requires_own_batch());
            let key = if isolated {
                format!("__isolated__{name}")
            } else {
                node.and_then(|n| n.parallel_group.clone())
                    .unwrap_or_else(|| "__ungrouped__".to_string())
            };
            groups.entry(key).or_default().push(name.clone());
        }

        groups
            .into_iter()
            .map(|(key, hooks)| {
                let exclusive = key.starts_with("__isolated__");
                self.make_batch(hooks, phase, exclusive, metadata, requests)
            })
            .collect()
    }

    fn make_batch(
        &self,
        hooks: Vec<String>,
        phase: ExecutionPhase,
        exclusive: bool,
        metadata: &HashMap<String, HookMetadata>,
        requests: &HashMap<String, ResourceRequest>,
    ) -> ExecutionBatch {
        let max_parallelism = if exclusive { 1 } else { hooks.len().max(1) };

        let mut resources = BatchResources::default();
        for hook in &hooks {
            let request = requests.get(hook).cloned().unwrap_or_default();
            resources.cpu_percent += request.cpu_percent;
            resources.memory_mb += request.memory_mb;
        }

        let durations = hooks
            .iter()
            .map(|h| metadata.get(h).map_or(Duration::ZERO, |m| m.average_execution_time));
        let estimated_duration = if max_parallelism > 1 {
            durations.max().unwrap_or(Duration::ZERO)
        } else {
            durations.sum()
        };

        ExecutionBatch {
            id: new_batch_id(),
            hooks,
            phase,
            max_parallelism,
            resources,
            estimated_duration,
            exclusive,
        }
    }

    /// Chooses which stuck hook to force when the frontier is empty.
    ///
    /// If a cycle exists in the remaining subgraph, the ordered breaking
    /// strategies are tried against its members; a strategy succeeds only
    /// when it identifies a unique winner. When everything ties, or when
    /// the deadlock is not a cycle at all (e.g. a dependency on a later
    /// phase), the hook with the fewest unresolved dependencies wins.
    fn break_deadlock(
        &self,
        graph: &DependencyGraph,
        remaining: &[String],
        metadata: &HashMap<String, HookMetadata>,
        completed: &HashSet<String>,
    ) -> String {
        if let Some(cycle) = self.detect_cycle(graph, remaining) {
            for strategy in CycleBreakStrategy::ORDERED {
                if let Some(winner) = Self::apply_strategy(strategy, &cycle, metadata) {
                    return winner;
                }
            }
        }

        // Forced progress: fewest unresolved dependencies, name as tiebreak.
        let mut best: Option<(usize, &String)> = None;
        for name in remaining {
            let unresolved = graph.get(name).map_or(0, |node| {
                node.dependencies
                    .iter()
                    .filter(|dep| !completed.contains(*dep) && graph.contains(dep))
                    .count()
            });
            let candidate = (unresolved, name);
            best = match best {
                None => Some(candidate),
                Some(current) if candidate < current => Some(candidate),
                Some(current) => Some(current),
            };
        }
        best.map(|(_, name)| name.clone()).unwrap_or_default()
    }

    fn apply_strategy(
        strategy: CycleBreakStrategy,
        cycle: &[String],
        metadata: &HashMap<String, HookMetadata>,
    ) -> Option<String> {
        let key = |name: &String| -> Option<i128> {
            let meta = metadata.get(name)?;
            Some(match strategy {
                CycleBreakStrategy::ByPriority => i128::from(meta.priority),
                CycleBreakStrategy::ByFrequency => i128::from(meta.execution_count),
                CycleBreakStrategy::ByAge => {
                    let age = meta
                        .created_at
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default();
                    i128::from(age.as_nanos().min(u128::from(u64::MAX) as u128) as u64)
                }
            })
        };

        let mut scored: Vec<(i128, &String)> = cycle
            .iter()
            .filter_map(|name| key(name).map(|k| (k, name)))
            .collect();
        if scored.is_empty() {
            return None;
        }
        scored.sort();

        // A strategy only succeeds with a strict winner.
        match scored.as_slice() {
            [(_, only)] => Some((*only).clone()),
            [(a, winner), (b, _), ..] if a < b => Some((*winner).clone()),
            _ => None,
        }
    }

    /// Finds one cycle in the remaining subgraph via iterative DFS,
    /// returning its member hooks.
    fn detect_cycle(&self, graph: &DependencyGraph, remaining: &[String]) -> Option<Vec<String>> {
        let in_scope: HashSet<&str> = remaining.iter().map(String::as_str).collect();
        let mut visited: HashSet<&str> = HashSet::new();

        let mut ordered: Vec<&str> = remaining.iter().map(String::as_str).collect();
        ordered.sort_unstable();

        for start in ordered {
            if visited.contains(start) {
                continue;
            }
            // Stack of (node, in-scope dependencies yet to explore).
            let mut stack = vec![(start, Self::scoped_deps(graph, start, &in_scope))];
            let mut on_path = vec![start];
            visited.insert(start);

            while let Some((_, unexplored)) = stack.last_mut() {
                if let Some(dep) = unexplored.pop() {
                    if let Some(pos) = on_path.iter().position(|n| *n == dep) {
                        // Back edge: everything from `dep` onward is the cycle.
                        return Some(on_path[pos..].iter().map(|s| (*s).to_string()).collect());
                    }
                    if visited.insert(dep) {
                        stack.push((dep, Self::scoped_deps(graph, dep, &in_scope)));
                        on_path.push(dep);
                    }
                } else {
                    stack.pop();
                    on_path.pop();
                }
            }
        }
        None
    }

    fn scoped_deps<'g>(
        graph: &'g DependencyGraph,
        name: &str,
        in_scope: &HashSet<&str>,
    ) -> Vec<&'g str> {
        let mut deps: Vec<&'g str> = graph
            .get(name)
            .map(|node| {
                node.dependencies
                    .iter()
                    .map(String::as_str)
                    .filter(|d| in_scope.contains(d))
                    .collect()
            })
            .unwrap_or_default();
        deps.sort_unstable();
        deps
    }
}
