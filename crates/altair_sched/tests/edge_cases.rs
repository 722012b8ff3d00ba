//! Edge cases and property tests for planning: degenerate inputs, cyclic
//! declarations, and sorter invariants over generated graphs.


use std::sync::Arc;

use hashbrown::HashMap;
use proptest::prelude::*;

use altair_hooks::hook::{HookMetadata, ResourceRequest};
use altair_hooks::registry::{HookContext, InMemoryRegistry};
use altair_sched::config::SchedulerConfig;
use altair_sched::executor::HookScheduler;
use altair_sched::graph::{DependencyGraph, DependencyGraphBuilder};
use altair_sched::sort::TopologicalSorter;

use test_utils::{names, noop_hook};

// ═══════════════════════════════════════════════════════════════════════════════
// DEGENERATE INPUTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn empty_request_yields_empty_plan() {
    let registry = InMemoryRegistry::new();
    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());

    let plan = scheduler.calculate_execution_order("t", &[], &HookContext::new());
    assert!(plan.batches.is_empty());

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);
    assert!(report.batch_results.is_empty());
}

#[tokio::test]
async fn duplicate_request_entries_schedule_once() {
    let registry = InMemoryRegistry::new();
    noop_hook(&registry, HookMetadata::new("a", 1));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["a", "a", "a"]),
        &HookContext::new(),
    );
    assert_eq!(plan.hook_count(), 1);
}

#[tokio::test]
async fn self_dependency_still_schedules() {
    let registry = InMemoryRegistry::new();
    noop_hook(&registry, HookMetadata::new("ouroboros", 1).with_dependency("ouroboros"));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["ouroboros"]),
        &HookContext::new(),
    );
    assert_eq!(plan.hook_count(), 1);

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);
}

#[tokio::test]
async fn mutual_cycle_runs_both_hooks() {
    let registry = InMemoryRegistry::new();
    noop_hook(&registry, HookMetadata::new("a", 1).with_dependency("b"));
    noop_hook(&registry, HookMetadata::new("b", 5).with_dependency("a"));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order("t", &names(&["a", "b"]), &HookContext::new());
    assert_eq!(plan.hook_count(), 2);

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SORTER PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Materializes a generated adjacency list into sorter inputs. When
/// `acyclic` is set, edges are forced to point at lower-numbered hooks.
fn sorter_inputs(
    deps: &[Vec<usize>],
    acyclic: bool,
) -> (
    DependencyGraph,
    HashMap<String, HookMetadata>,
    HashMap<String, ResourceRequest>,
) {
    let n = deps.len();
    let registry = InMemoryRegistry::new();
    let mut metadata = HashMap::new();
    let mut requests = HashMap::new();
    for (i, targets) in deps.iter().enumerate() {
        let mut meta = HookMetadata::new(format!("h{i}"), (i % 10) as i32);
        for &raw in targets {
            let target = if acyclic {
                if i == 0 {
                    continue;
                }
                raw % i
            } else {
                raw % n
            };
            if target != i {
                meta = meta.with_dependency(format!("h{target}"));
            }
        }
        metadata.insert(meta.name.clone(), meta.clone());
        requests.insert(meta.name.clone(), ResourceRequest::default());
        registry.register(meta, |_ctx| Box::pin(async { Ok(()) }));
    }
    let hook_names: Vec<String> = (0..n).map(|i| format!("h{i}")).collect();
    let graph = DependencyGraphBuilder::new(Arc::new(registry)).build_dependency_graph(&hook_names);
    (graph, metadata, requests)
}

proptest! {
    /// Acyclic graphs: every hook lands in exactly one batch and all of a
    /// hook's dependencies sit in strictly earlier batches.
    #[test]
    fn acyclic_graphs_sort_in_dependency_order(
        deps in prop::collection::vec(prop::collection::vec(0usize..8, 0..3), 2..8),
    ) {
        let (graph, metadata, requests) = sorter_inputs(&deps, true);
        let batches = TopologicalSorter::new().sort_with_phases(&graph, &metadata, &requests);

        let mut batch_of = HashMap::new();
        for (index, batch) in batches.iter().enumerate() {
            for hook in &batch.hooks {
                prop_assert!(batch_of.insert(hook.clone(), index).is_none(),
                    "hook {hook} scheduled twice");
            }
        }
        prop_assert_eq!(batch_of.len(), deps.len());

        for node in graph.nodes() {
            for dep in &node.dependencies {
                prop_assert!(batch_of[dep] < batch_of[&node.name],
                    "{} scheduled before its dependency {dep}", node.name);
            }
        }
    }

    /// Arbitrary graphs, cycles included: the sorter terminates and still
    /// schedules every hook exactly once.
    #[test]
    fn cyclic_graphs_terminate_and_cover_everything(
        deps in prop::collection::vec(prop::collection::vec(0usize..8, 0..3), 2..8),
    ) {
        let (graph, metadata, requests) = sorter_inputs(&deps, false);
        let batches = TopologicalSorter::new().sort_with_phases(&graph, &metadata, &requests);

        let mut seen = HashMap::new();
        for (index, batch) in batches.iter().enumerate() {
            prop_assert!(!batch.hooks.is_empty(), "empty batch produced");
            for hook in &batch.hooks {
                prop_assert!(seen.insert(hook.clone(), index).is_none(),
                    "hook {hook} scheduled twice");
            }
        }
        prop_assert_eq!(seen.len(), deps.len());
    }
}
