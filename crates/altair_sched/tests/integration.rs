//! End-to-end scheduling scenarios: planning, conflict resolution, batch
//! execution, and rollback, all through the public `HookScheduler` surface.


use std::sync::Arc;

use altair_hooks::hook::{ExecutionPhase, HookMetadata, IsolationLevel, ResourceRequest};
use altair_hooks::registry::{HookContext, HookRegistry, InMemoryRegistry};
use altair_sched::config::SchedulerConfig;
use altair_sched::conflict::ConflictStrategy;
use altair_sched::executor::{CTX_TRANSACTION_ID, HookScheduler};

use test_utils::{completion_log, failing_hook, names, noop_hook, position, recording_hook};

// ═══════════════════════════════════════════════════════════════════════════════
// DEPENDENCY ORDERING
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn dependents_wait_for_their_dependency() {
    let registry = InMemoryRegistry::new();
    let log = completion_log();
    recording_hook(&registry, HookMetadata::new("a", 1), &log);
    recording_hook(&registry, HookMetadata::new("b", 2).with_dependency("a"), &log);
    recording_hook(&registry, HookMetadata::new("c", 3).with_dependency("a"), &log);

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "on_save",
        &names(&["a", "b", "c"]),
        &HookContext::new(),
    );

    // a runs alone; b and c share the second batch.
    assert_eq!(plan.batches.len(), 2);
    assert_eq!(plan.batches[0].hooks, vec!["a"]);
    assert_eq!(plan.batches[1].len(), 2);

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);
    assert!(position(&log, "a") < position(&log, "b"));
    assert!(position(&log, "a") < position(&log, "c"));
}

#[tokio::test]
async fn phases_execute_in_declaration_order() {
    let registry = InMemoryRegistry::new();
    let log = completion_log();
    recording_hook(
        &registry,
        HookMetadata::new("teardown", 1).with_phase(ExecutionPhase::Cleanup),
        &log,
    );
    recording_hook(
        &registry,
        HookMetadata::new("validate", 9).with_phase(ExecutionPhase::PreValidation),
        &log,
    );
    recording_hook(
        &registry,
        HookMetadata::new("work", 5).with_phase(ExecutionPhase::CoreProcessing),
        &log,
    );

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["teardown", "validate", "work"]),
        &HookContext::new(),
    );
    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    assert!(report.overall_success);
    // Phase order wins over priority: the low-priority validator still
    // runs before everything in later phases.
    assert!(position(&log, "validate") < position(&log, "work"));
    assert!(position(&log, "work") < position(&log, "teardown"));
}

#[tokio::test]
async fn exclusive_hooks_get_their_own_batch() {
    let registry = InMemoryRegistry::new();
    let log = completion_log();
    recording_hook(&registry, HookMetadata::new("a", 1), &log);
    recording_hook(
        &registry,
        HookMetadata::new("lonely", 2).with_isolation(IsolationLevel::Exclusive),
        &log,
    );

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["a", "lonely"]),
        &HookContext::new(),
    );

    let exclusive_batch = plan
        .batches
        .iter()
        .find(|b| b.hooks.contains(&"lonely".to_string()))
        .unwrap();
    assert_eq!(exclusive_batch.len(), 1);
    assert_eq!(exclusive_batch.max_parallelism, 1);
    assert!(exclusive_batch.exclusive);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFLICT RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn only_the_conflict_winner_runs() {
    let registry = InMemoryRegistry::new();
    let log = completion_log();
    recording_hook(
        &registry,
        HookMetadata::new("x", 1).with_trigger("on_save"),
        &log,
    );
    recording_hook(
        &registry,
        HookMetadata::new("y", 5).with_trigger("on_save"),
        &log,
    );

    let config =
        SchedulerConfig::default().with_conflict_strategy(ConflictStrategy::PriorityBased);
    let scheduler = HookScheduler::new(Arc::new(registry), config);
    let plan = scheduler.calculate_execution_order(
        "on_save",
        &names(&["x", "y"]),
        &HookContext::new(),
    );

    assert_eq!(plan.conflicts.len(), 1);
    assert_eq!(plan.conflicts[0].winner.as_deref(), Some("x"));
    assert_eq!(plan.conflicts[0].losers, vec!["y".to_string()]);

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);
    assert_eq!(*log.lock().unwrap(), vec!["x".to_string()]);
}

#[tokio::test]
async fn hooks_without_the_trigger_do_not_compete() {
    let registry = InMemoryRegistry::new();
    // Only x declares the trigger, so there is nothing to resolve even
    // though three hooks are scheduled.
    noop_hook(&registry, HookMetadata::new("x", 1).with_trigger("on_save"));
    noop_hook(&registry, HookMetadata::new("helper_a", 5));
    noop_hook(&registry, HookMetadata::new("helper_b", 5));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "on_save",
        &names(&["x", "helper_a", "helper_b"]),
        &HookContext::new(),
    );

    assert!(plan.conflicts.is_empty());
    assert_eq!(plan.hook_count(), 3);
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE DECLARATIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn declared_resource_requests_shape_the_plan() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.register_with_request(
        HookMetadata::new("indexer", 1),
        ResourceRequest {
            cpu_percent: 40.0,
            memory_mb: 2048,
            ..ResourceRequest::default()
        },
        |_ctx| Box::pin(async { Ok(()) }),
    );
    registry.register_with_request(
        HookMetadata::new("linter", 2),
        ResourceRequest {
            cpu_percent: 10.0,
            memory_mb: 256,
            ..ResourceRequest::default()
        },
        |_ctx| Box::pin(async { Ok(()) }),
    );

    let scheduler = HookScheduler::new(
        Arc::clone(&registry) as Arc<dyn HookRegistry>,
        SchedulerConfig::default(),
    )
    .with_resource_aware(registry);

    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["indexer", "linter"]),
        &HookContext::new(),
    );
    assert_eq!(plan.batches.len(), 1);
    let batch = &plan.batches[0];
    assert!((batch.resources.cpu_percent - 50.0).abs() < f64::EPSILON);
    assert_eq!(batch.resources.memory_mb, 2304);

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FAILURE AND ROLLBACK
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn failed_batch_stops_the_run_and_rolls_back() {
    let registry = InMemoryRegistry::new();
    let log = completion_log();
    recording_hook(&registry, HookMetadata::new("first", 1), &log);
    failing_hook(&registry, HookMetadata::new("broken", 1).with_dependency("first"));
    recording_hook(
        &registry,
        HookMetadata::new("never", 1).with_dependency("broken"),
        &log,
    );

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["first", "broken", "never"]),
        &HookContext::new(),
    );
    assert_eq!(plan.batches.len(), 3);

    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert!(report.rollback_performed);
    // The batch after the failure never started.
    assert_eq!(report.batch_results.len(), 2);
    assert_eq!(*log.lock().unwrap(), vec!["first".to_string()]);
}

#[tokio::test]
async fn undo_actions_replay_in_reverse_order() {
    let registry = Arc::new(InMemoryRegistry::new());
    let scheduler = HookScheduler::new(
        Arc::clone(&registry) as Arc<dyn HookRegistry>,
        SchedulerConfig::default(),
    );
    let rollback = scheduler.rollback_manager();
    let undone = completion_log();

    // p and q each register an undo action against the run's transaction.
    for hook in ["p", "q"] {
        let rollback = Arc::clone(&rollback);
        let undone = Arc::clone(&undone);
        let metadata = if hook == "q" {
            HookMetadata::new(hook, 1).with_dependency("p")
        } else {
            HookMetadata::new(hook, 1)
        };
        registry.register(metadata, move |ctx: HookContext| {
            let rollback = Arc::clone(&rollback);
            let undone = Arc::clone(&undone);
            Box::pin(async move {
                let tx = ctx
                    .get::<String>(CTX_TRANSACTION_ID)
                    .expect("transaction id in context");
                let undone = Arc::clone(&undone);
                rollback.add_rollback_action(
                    &tx,
                    hook,
                    Box::new(move || {
                        undone.lock().unwrap().push(hook.to_string());
                        Ok(())
                    }),
                );
                Ok(())
            })
        });
    }
    failing_hook(&registry, HookMetadata::new("broken", 1).with_dependency("q"));

    let plan = scheduler.calculate_execution_order(
        "t",
        &names(&["p", "q", "broken"]),
        &HookContext::new(),
    );
    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert!(report.rollback_performed);
    // q ran after p, so its undo action replays first.
    assert_eq!(*undone.lock().unwrap(), vec!["q".to_string(), "p".to_string()]);
}

#[tokio::test]
async fn successful_run_commits_its_transaction() {
    let registry = InMemoryRegistry::new();
    noop_hook(&registry, HookMetadata::new("a", 1));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    let plan = scheduler.calculate_execution_order("t", &names(&["a"]), &HookContext::new());
    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    assert!(report.overall_success);
    assert!(!report.rollback_performed);

    let history = scheduler.rollback_manager().history();
    assert_eq!(history.len(), 1);
    assert!(!history[0].rolled_back);
    assert_eq!(scheduler.rollback_manager().active_count(), 0);
}

#[tokio::test]
async fn rollback_disabled_by_configuration() {
    let registry = InMemoryRegistry::new();
    failing_hook(&registry, HookMetadata::new("broken", 1));

    let config = SchedulerConfig::default().with_rollback_enabled(false);
    let scheduler = HookScheduler::new(Arc::new(registry), config);
    let plan = scheduler.calculate_execution_order("t", &names(&["broken"]), &HookContext::new());
    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    assert!(!report.overall_success);
    assert!(!report.rollback_performed);
    assert!(report.transaction_id.is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATS FEEDBACK
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn executions_feed_the_shared_statistics() {
    let registry = InMemoryRegistry::new();
    noop_hook(&registry, HookMetadata::new("tracked", 1));
    failing_hook(&registry, HookMetadata::new("flaky", 1));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());

    let plan = scheduler.calculate_execution_order("t", &names(&["tracked"]), &HookContext::new());
    scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    let plan = scheduler.calculate_execution_order("t", &names(&["flaky"]), &HookContext::new());
    scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.get("tracked").unwrap().success_rate(), Some(1.0));
    assert_eq!(stats.get("flaky").unwrap().success_rate(), Some(0.0));
}

#[tokio::test]
async fn monitoring_lifecycle_is_clean() {
    let registry = InMemoryRegistry::new();
    noop_hook(&registry, HookMetadata::new("a", 1));

    let scheduler = HookScheduler::new(Arc::new(registry), SchedulerConfig::default());
    scheduler.start_monitoring();

    let plan = scheduler.calculate_execution_order("t", &names(&["a"]), &HookContext::new());
    let report = scheduler
        .execute_with_priority(&plan, HookContext::new())
        .await
        .unwrap();
    assert!(report.overall_success);

    scheduler.shutdown().await;
}
