//! Dependency graph construction.
//!
//! [`DependencyGraphBuilder`] turns a set of candidate hook names into a
//! directed graph of [`DependencyNode`]s with forward and reverse edges.
//! Graphs are built fresh per scheduling call and discarded afterwards;
//! they carry only the structure the sorter needs, not full metadata.
//!
//! Missing hooks and dependencies that point outside the candidate set are
//! dropped with a log line rather than an error: planning degrades, it
//! never aborts.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use altair_hooks::hook::{ExecutionPhase, IsolationLevel};
use altair_hooks::registry::HookRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// DependencyNode
// ─────────────────────────────────────────────────────────────────────────────

/// One hook in the dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// Hook name.
    pub name: String,
    /// Hooks that must complete before this one (within the candidate set).
    pub dependencies: HashSet<String>,
    /// Hooks that depend on this one (reverse edges).
    pub dependents: HashSet<String>,
    /// Phase this hook executes in.
    pub phase: ExecutionPhase,
    /// Optional parallel-group tag.
    pub parallel_group: Option<String>,
    /// Batch co-occupancy constraint.
    pub isolation: IsolationLevel,
}

// ─────────────────────────────────────────────────────────────────────────────
// DependencyGraph
// ─────────────────────────────────────────────────────────────────────────────

/// A directed graph of hooks for one scheduling call.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
}

impl DependencyGraph {
    /// Returns the node for the given hook, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DependencyNode> {
        self.nodes.get(name)
    }

    /// Returns true if the graph contains the given hook.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Iterates over all nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    /// All hook names in the graph.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Longest chain of hooks transitively depending on the given hook.
    ///
    /// A leaf nobody depends on has depth 0. Cycles are tolerated: each
    /// node is visited at most once per walk, so the result is finite even
    /// for malformed declarations.
    #[must_use]
    pub fn dependent_depth(&self, name: &str) -> usize {
        let mut visited = HashSet::new();
        self.depth_walk(name, &mut visited)
    }

    fn depth_walk(&self, name: &str, visited: &mut HashSet<String>) -> usize {
        if !visited.insert(name.to_string()) {
            return 0;
        }
        let Some(node) = self.nodes.get(name) else {
            return 0;
        };
        node.dependents
            .iter()
            .map(|dep| 1 + self.depth_walk(dep, visited))
            .max()
            .unwrap_or(0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DependencyGraphBuilder
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a [`DependencyGraph`] from registry metadata.
pub struct DependencyGraphBuilder {
    registry: Arc<dyn HookRegistry>,
}

impl DependencyGraphBuilder {
    /// Creates a builder over the given registry.
    #[must_use]
    pub fn new(registry: Arc<dyn HookRegistry>) -> Self {
        Self { registry }
    }

    /// Builds the graph for the given candidate hooks.
    ///
    /// Unknown hook names are skipped with a warning. Required dependencies
    /// pointing outside the candidate set are treated as already satisfied.
    /// Optional dependencies create an edge only when the dependency is
    /// itself a candidate.
    #[must_use]
    pub fn build_dependency_graph(&self, hook_names: &[String]) -> DependencyGraph {
        let candidates: HashSet<&str> = hook_names.iter().map(String::as_str).collect();
        let mut nodes: HashMap<String, DependencyNode> = HashMap::new();

        for name in hook_names {
            let Some(metadata) = self.registry.get(name) else {
                warn!(hook = %name, "skipping unknown hook during graph build");
                continue;
            };

            let mut dependencies = HashSet::new();
            for dep in metadata.dependencies.iter() {
                if candidates.contains(dep.as_str()) {
                    dependencies.insert(dep.clone());
                } else {
                    debug!(hook = %name, dependency = %dep, "dependency outside candidate set, treated as satisfied");
                }
            }
            for dep in metadata.optional_dependencies.iter() {
                if candidates.contains(dep.as_str()) {
                    dependencies.insert(dep.clone());
                }
            }

            nodes.insert(
                name.clone(),
                DependencyNode {
                    name: name.clone(),
                    dependencies,
                    dependents: HashSet::new(),
                    phase: metadata.phase,
                    parallel_group: metadata.parallel_group.clone(),
                    isolation: metadata.isolation,
                },
            );
        }

        // Reverse edges. Edges to hooks the registry dropped are pruned so
        // the sorter never waits on a node that does not exist.
        let known: HashSet<String> = nodes.keys().cloned().collect();
        for node in nodes.values_mut() {
            node.dependencies.retain(|dep| known.contains(dep));
        }
        let edges: Vec<(String, String)> = nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .map(|dep| (dep.clone(), node.name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (dep, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dep) {
                node.dependents.insert(dependent);
            }
        }

        DependencyGraph { nodes }
    }
}
