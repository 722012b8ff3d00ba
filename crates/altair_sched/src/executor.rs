//! Orchestration: planning, batch execution, and adaptive optimization.
//!
//! [`HookScheduler`] ties the pipeline together. Planning resolves trigger
//! conflicts, builds the dependency graph, scores priorities, sorts into
//! phase-ordered batches, and fits those batches to live resource headroom.
//! Execution then runs the batches strictly in order, hooks within a batch
//! concurrently up to the batch's parallelism bound, and rolls the trigger
//! group back when a batch fails.
//!
//! # Core Concepts
//!
//! - [`ExecutionPlan`] - Ordered batches plus the decisions that shaped them
//! - [`ExecutionReport`] - Per-hook outcomes for one plan run
//! - [`SystemMetrics`] - Point-in-time view for embedders
//! - [`OptimizationReport`] - Advisory tuning suggestions, never applied
//!   automatically

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::future::join_all;
use hashbrown::{HashMap, HashSet};
use nanoid::nanoid;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use altair_hooks::hook::{HookMetadata, ResourceRequest};
use altair_hooks::registry::{HookContext, HookRegistry, ResourceAware};

use crate::config::SchedulerConfig;
use crate::conflict::{ConflictResolution, ConflictResolver, LoadSignal};
use crate::graph::DependencyGraphBuilder;
use crate::monitor::{LoadBalancer, ProcSampler, ResourceMonitor, Trend};
use crate::optimizer::ParallelExecutionOptimizer;
use crate::priority::{ExecutionStats, MIN_EFFECTIVE_PRIORITY, PriorityCalculator, PriorityContext};
use crate::rollback::{RollbackManager, RollbackScope};
use crate::sort::{ExecutionBatch, TopologicalSorter};

/// Context key holding the open transaction's identifier, as a `String`.
pub const CTX_TRANSACTION_ID: &str = "altair.transaction_id";

/// Context key that disables rollback for one execution when set to `true`.
pub const CTX_ROLLBACK_DISABLED: &str = "altair.rollback_disabled";

/// Context key optionally supplying a CPU-usage percentage, as `f64`.
/// Planning falls back to it for the load signal when telemetry has no
/// samples yet.
pub const CTX_CPU_AVERAGE: &str = "altair.cpu_average";

// ─────────────────────────────────────────────────────────────────────────────
// SchedulerError
// ─────────────────────────────────────────────────────────────────────────────

/// Plan validation failures surfaced before any hook runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A batch in the plan holds no hooks.
    EmptyBatch(String),
    /// A hook appears in more than one batch of the plan.
    DuplicateHook(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::EmptyBatch(id) => write!(f, "batch '{id}' contains no hooks"),
            SchedulerError::DuplicateHook(hook) => {
                write!(f, "hook '{hook}' appears in more than one batch")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

// ─────────────────────────────────────────────────────────────────────────────
// Plans and reports
// ─────────────────────────────────────────────────────────────────────────────

/// The scheduler's full answer for one trigger occurrence.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Trigger this plan was built for.
    pub trigger: String,
    /// Batches in execution order.
    pub batches: Vec<ExecutionBatch>,
    /// Effective priority per scheduled hook.
    pub priorities: HashMap<String, f64>,
    /// Conflict decisions applied while planning.
    pub conflicts: Vec<ConflictResolution>,
}

impl ExecutionPlan {
    /// Total number of hooks across all batches.
    #[must_use]
    pub fn hook_count(&self) -> usize {
        self.batches.iter().map(ExecutionBatch::len).sum()
    }
}

/// Result of one hook execution within a batch.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    /// Hook name.
    pub hook: String,
    /// Whether the hook completed without error.
    pub success: bool,
    /// Wall-clock time the hook took.
    pub duration: Duration,
    /// Registry-minted execution identifier, when the hook ran to completion.
    pub execution_id: Option<String>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Whether the failure was the per-hook timeout.
    pub timed_out: bool,
}

/// Result of one batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Batch identifier.
    pub batch_id: String,
    /// Per-hook outcomes, in the batch's hook order.
    pub outcomes: Vec<HookOutcome>,
    /// Wall-clock time for the whole batch.
    pub duration: Duration,
    /// True when every outcome succeeded.
    pub success: bool,
}

/// Full record of one plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Identifier for this run.
    pub execution_id: String,
    /// Trigger the plan was built for.
    pub trigger: String,
    /// Transaction opened for this run, when rollback was enabled.
    pub transaction_id: Option<String>,
    /// Batch results, in execution order. Batches after a failed one are
    /// absent because they never started.
    pub batch_results: Vec<BatchResult>,
    /// True when every batch succeeded.
    pub overall_success: bool,
    /// Wall-clock time for the whole run.
    pub total_execution_time: Duration,
    /// Whether the transaction was rolled back.
    pub rollback_performed: bool,
}

/// Point-in-time system view for embedders.
#[derive(Debug, Clone)]
pub struct SystemMetrics {
    /// Rolling average CPU usage, if telemetry is available.
    pub cpu_average: Option<f64>,
    /// CPU usage trend.
    pub trend: Trend,
    /// Hooks currently executing.
    pub active_hooks: usize,
    /// Allocated fraction of declared capacity, `0.0..=1.0`.
    pub load_utilization: f64,
    /// Rollback transactions currently open.
    pub open_transactions: usize,
    /// Samples currently in the telemetry window.
    pub sample_count: usize,
}

/// One advisory tuning suggestion.
#[derive(Debug, Clone)]
pub struct PriorityAdjustment {
    /// Hook the suggestion concerns.
    pub hook: String,
    /// Why the hook was flagged.
    pub reason: String,
    /// Suggested operator action.
    pub recommendation: String,
}

/// Advisory output of [`HookScheduler::optimize_system_performance`].
///
/// Nothing in this report is applied automatically.
#[derive(Debug, Clone, Default)]
pub struct OptimizationReport {
    /// Per-hook suggestions.
    pub adjustments: Vec<PriorityAdjustment>,
    /// CPU trend at the time of analysis.
    pub trend: Trend,
    /// System-level suggestions.
    pub recommendations: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// HookScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Priority-aware hook scheduler.
///
/// One scheduler instance serves many trigger occurrences; planning and
/// execution are both safe to call concurrently.
pub struct HookScheduler {
    registry: Arc<dyn HookRegistry>,
    resources: Option<Arc<dyn ResourceAware + Send + Sync>>,
    config: SchedulerConfig,
    stats: Arc<ExecutionStats>,
    calculator: PriorityCalculator,
    resolver: ConflictResolver,
    builder: DependencyGraphBuilder,
    sorter: TopologicalSorter,
    optimizer: ParallelExecutionOptimizer,
    monitor: Arc<ResourceMonitor>,
    balancer: Arc<LoadBalancer>,
    rollback: Arc<RollbackManager>,
    active: AtomicUsize,
}

impl HookScheduler {
    /// Creates a scheduler over `registry` with `/proc`-backed telemetry.
    #[must_use]
    pub fn new(registry: Arc<dyn HookRegistry>, config: SchedulerConfig) -> Self {
        let stats = Arc::new(ExecutionStats::new());
        let monitor = Arc::new(ResourceMonitor::new(
            Arc::new(ProcSampler::new()),
            config.sample_window,
            config.sample_interval,
        ));
        let balancer = Arc::new(LoadBalancer::new(100.0, total_memory_mb()));
        Self {
            resources: None,
            stats: Arc::clone(&stats),
            calculator: PriorityCalculator::new(stats, config.cpu_high_threshold),
            resolver: ConflictResolver::new(),
            builder: DependencyGraphBuilder::new(Arc::clone(&registry)),
            sorter: TopologicalSorter::new(),
            optimizer: ParallelExecutionOptimizer::new(
                config.max_workers,
                Arc::clone(&monitor),
                Arc::clone(&balancer),
            ),
            monitor,
            balancer,
            rollback: Arc::new(RollbackManager::new(config.rollback_history_limit)),
            registry,
            config,
            active: AtomicUsize::new(0),
        }
    }

    /// Attaches a resource capability so per-hook declarations reach the
    /// load balancer and sorter. Without it every hook gets defaults.
    #[must_use]
    pub fn with_resource_aware(mut self, resources: Arc<dyn ResourceAware + Send + Sync>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// The rollback manager, for hooks registering undo actions.
    #[must_use]
    pub fn rollback_manager(&self) -> Arc<RollbackManager> {
        Arc::clone(&self.rollback)
    }

    /// Shared execution statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<ExecutionStats> {
        Arc::clone(&self.stats)
    }

    /// Starts background resource sampling.
    pub fn start_monitoring(&self) {
        self.monitor.start();
    }

    /// Stops background sampling and waits for the task to exit.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Planning
    // ─────────────────────────────────────────────────────────────────────

    /// Builds the execution plan for one trigger occurrence.
    ///
    /// Unknown hook names are skipped with a warning. Hooks that declare
    /// `trigger` compete for it and all but one are dropped; hooks that do
    /// not declare it are scheduled untouched. Hooks inside each batch are
    /// ordered by descending effective priority, so sequential batches run
    /// their most important hook first.
    ///
    /// `ctx` is the context the hooks will later receive; planning reads
    /// optional signals from it, such as [`CTX_CPU_AVERAGE`].
    #[must_use]
    pub fn calculate_execution_order(
        &self,
        trigger: &str,
        hooks: &[String],
        ctx: &HookContext,
    ) -> ExecutionPlan {
        let ctx_cpu = ctx.get::<f64>(CTX_CPU_AVERAGE).map(|cpu| *cpu);
        let mut metadata: HashMap<String, HookMetadata> = HashMap::new();
        let mut candidates: Vec<String> = Vec::with_capacity(hooks.len());
        for name in hooks {
            if metadata.contains_key(name.as_str()) {
                continue;
            }
            match self.registry.get(name) {
                Some(meta) => {
                    metadata.insert(name.clone(), meta);
                    candidates.push(name.clone());
                }
                None => warn!(hook = %name, "unknown hook skipped from plan"),
            }
        }

        let mut conflicts = Vec::new();
        let competing: Vec<String> = candidates
            .iter()
            .filter(|name| {
                metadata
                    .get(name.as_str())
                    .is_some_and(|m| m.triggers.contains(trigger))
            })
            .cloned()
            .collect();
        if competing.len() > 1 {
            let resolution = self.resolver.resolve_conflicts(
                trigger,
                &competing,
                &metadata,
                self.config.conflict_strategy,
                LoadSignal {
                    cpu_average: self.monitor.cpu_average().or(ctx_cpu),
                    cpu_high_threshold: self.config.cpu_high_threshold,
                },
            );
            info!(
                trigger,
                winner = resolution.winner.as_deref().unwrap_or("-"),
                losers = resolution.losers.len(),
                strategy = %resolution.strategy,
                "trigger conflict resolved"
            );
            candidates.retain(|name| !resolution.losers.contains(name));
            conflicts.push(resolution);
        }

        let graph = self.builder.build_dependency_graph(&candidates);

        let snapshot = self.monitor.snapshot();
        let headroom = snapshot
            .as_ref()
            .map(|s| s.memory_headroom().min(1.0 - self.balancer.utilization()));
        let mut priorities = HashMap::new();
        for name in graph.names() {
            let Some(meta) = metadata.get(name.as_str()) else {
                continue;
            };
            let signals = PriorityContext {
                dependency_depth: graph.dependent_depth(&name),
                cpu_average: snapshot.as_ref().map(|s| s.cpu_average).or(ctx_cpu),
                resource_headroom: headroom,
            };
            let weights = self.calculator.calculate_priority(meta, &signals);
            priorities.insert(name, self.calculator.calculate_effective_priority(&weights));
        }

        let requests: HashMap<String, ResourceRequest> = graph
            .names()
            .into_iter()
            .map(|name| {
                let request = self.request_for(&name);
                (name, request)
            })
            .collect();
        let batches = self.sorter.sort_with_phases(&graph, &metadata, &requests);
        let mut batches = self.optimizer.optimize_parallel_execution(batches, &graph);

        // Highest effective priority first inside every batch; ties fall
        // back to name order.
        for batch in &mut batches {
            batch.hooks.sort_by(|a, b| {
                let pa = priorities.get(a).copied().unwrap_or(MIN_EFFECTIVE_PRIORITY);
                let pb = priorities.get(b).copied().unwrap_or(MIN_EFFECTIVE_PRIORITY);
                pb.partial_cmp(&pa)
                    .unwrap_or(core::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(b))
            });
        }

        debug!(
            trigger,
            hooks = graph.len(),
            batches = batches.len(),
            "execution plan built"
        );
        ExecutionPlan {
            trigger: trigger.to_string(),
            batches,
            priorities,
            conflicts,
        }
    }

    fn request_for(&self, hook: &str) -> ResourceRequest {
        self.resources
            .as_ref()
            .and_then(|r| r.resource_request(hook))
            .unwrap_or_default()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Execution
    // ─────────────────────────────────────────────────────────────────────

    /// Runs a plan: batches strictly in order, hooks within a batch
    /// concurrently up to the batch's parallelism bound.
    ///
    /// A failed batch stops the run; later batches never start. When
    /// rollback is enabled the trigger group's transaction is rolled back
    /// on failure and committed on success.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] when the plan fails validation. Hook
    /// failures are not errors; they are reported through the
    /// [`ExecutionReport`].
    pub async fn execute_with_priority(
        &self,
        plan: &ExecutionPlan,
        ctx: HookContext,
    ) -> Result<ExecutionReport, SchedulerError> {
        self.validate(plan)?;

        let rollback_enabled = self.config.rollback_enabled
            && !ctx
                .get::<bool>(CTX_ROLLBACK_DISABLED)
                .is_some_and(|disabled| *disabled);
        let transaction_id = rollback_enabled.then(|| {
            let id = self
                .rollback
                .create_transaction(&plan.trigger, RollbackScope::TriggerGroup);
            ctx.insert(CTX_TRANSACTION_ID, id.clone());
            id
        });

        let execution_id = format!("run_{}", nanoid!(10));
        info!(
            execution = %execution_id,
            trigger = %plan.trigger,
            batches = plan.batches.len(),
            hooks = plan.hook_count(),
            "executing plan"
        );

        let started = Instant::now();
        let mut batch_results = Vec::with_capacity(plan.batches.len());
        let mut overall_success = true;
        let mut rollback_performed = false;

        for batch in &plan.batches {
            let result = self.run_batch(batch, &plan.trigger, &ctx).await;
            let failed = !result.success;
            batch_results.push(result);

            if failed {
                overall_success = false;
                warn!(
                    execution = %execution_id,
                    batch = %batch.id,
                    "batch failed, halting remaining batches"
                );
                if let Some(tx) = &transaction_id {
                    match self.rollback.rollback(tx) {
                        Ok(record) => {
                            rollback_performed = true;
                            if record.actions_failed > 0 {
                                warn!(
                                    transaction = %tx,
                                    failed = record.actions_failed,
                                    "some undo actions failed"
                                );
                            }
                        }
                        Err(err) => warn!(transaction = %tx, %err, "rollback failed"),
                    }
                }
                break;
            }
        }

        if overall_success
            && let Some(tx) = &transaction_id
            && let Err(err) = self.rollback.commit_transaction(tx)
        {
            warn!(transaction = %tx, %err, "commit failed");
        }

        let total_execution_time = started.elapsed();
        info!(
            execution = %execution_id,
            success = overall_success,
            elapsed_ms = total_execution_time.as_millis() as u64,
            "plan finished"
        );
        Ok(ExecutionReport {
            execution_id,
            trigger: plan.trigger.clone(),
            transaction_id,
            batch_results,
            overall_success,
            total_execution_time,
            rollback_performed,
        })
    }

    fn validate(&self, plan: &ExecutionPlan) -> Result<(), SchedulerError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for batch in &plan.batches {
            if batch.is_empty() {
                return Err(SchedulerError::EmptyBatch(batch.id.clone()));
            }
            for hook in &batch.hooks {
                if !seen.insert(hook.as_str()) {
                    return Err(SchedulerError::DuplicateHook(hook.clone()));
                }
            }
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        batch: &ExecutionBatch,
        trigger: &str,
        ctx: &HookContext,
    ) -> BatchResult {
        debug!(
            batch = %batch.id,
            hooks = batch.len(),
            parallelism = batch.max_parallelism,
            "running batch"
        );
        let started = Instant::now();

        let outcomes = if batch.max_parallelism <= 1 || batch.len() == 1 {
            let mut outcomes = Vec::with_capacity(batch.len());
            for hook in &batch.hooks {
                let outcome = self.run_hook(hook, trigger, ctx).await;
                // Sequential batches stop at the first failure; later hooks
                // in the same batch may depend on the failed one.
                let failed = !outcome.success;
                outcomes.push(outcome);
                if failed {
                    break;
                }
            }
            outcomes
        } else {
            let semaphore = Semaphore::new(batch.max_parallelism);
            join_all(batch.hooks.iter().map(|hook| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    self.run_hook(hook, trigger, ctx).await
                }
            }))
            .await
        };

        let success = outcomes.iter().all(|o| o.success);
        BatchResult {
            batch_id: batch.id.clone(),
            outcomes,
            duration: started.elapsed(),
            success,
        }
    }

    async fn run_hook(&self, hook: &str, trigger: &str, ctx: &HookContext) -> HookOutcome {
        let request = self.request_for(hook);
        let allocated = self.balancer.allocate(&request);
        if !allocated {
            debug!(hook, "running without a resource allocation");
        }
        self.active.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let result = timeout(
            self.config.max_execution_time,
            self.registry.execute_hook(hook, trigger, ctx.clone()),
        )
        .await;
        let duration = started.elapsed();

        self.active.fetch_sub(1, Ordering::Relaxed);
        if allocated {
            self.balancer.release(&request);
        }

        let outcome = match result {
            Ok(Ok(id)) => HookOutcome {
                hook: hook.to_string(),
                success: true,
                duration,
                execution_id: Some(id.to_string()),
                error: None,
                timed_out: false,
            },
            Ok(Err(err)) => HookOutcome {
                hook: hook.to_string(),
                success: false,
                duration,
                execution_id: None,
                error: Some(err.to_string()),
                timed_out: false,
            },
            Err(_) => HookOutcome {
                hook: hook.to_string(),
                success: false,
                duration,
                execution_id: None,
                error: Some(format!(
                    "timed out after {}ms",
                    self.config.max_execution_time.as_millis()
                )),
                timed_out: true,
            },
        };

        if outcome.success {
            debug!(hook, elapsed_ms = duration.as_millis() as u64, "hook succeeded");
        } else {
            warn!(
                hook,
                elapsed_ms = duration.as_millis() as u64,
                error = outcome.error.as_deref().unwrap_or("-"),
                "hook failed"
            );
        }
        self.calculator
            .update_execution_stats(hook, outcome.success, duration);
        self.registry.record_result(hook, outcome.success, duration);
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    /// Analyzes accumulated statistics and telemetry.
    ///
    /// The report is advisory. Slow hooks, unreliable hooks, and the CPU
    /// trend are flagged for operators; the scheduler changes nothing on
    /// its own.
    #[must_use]
    pub fn optimize_system_performance(&self) -> OptimizationReport {
        let mut adjustments = Vec::new();
        for (hook, stats) in self.stats.snapshot() {
            if let Some(average) = stats.average_duration()
                && average > self.config.slow_hook_threshold
            {
                adjustments.push(PriorityAdjustment {
                    hook: hook.clone(),
                    reason: format!("average duration {}ms", average.as_millis()),
                    recommendation: "lower its priority or move it to a later phase".to_string(),
                });
            }
            if let Some(rate) = stats.success_rate()
                && rate < self.config.unreliable_success_rate
            {
                adjustments.push(PriorityAdjustment {
                    hook,
                    reason: format!("success rate {rate:.2}"),
                    recommendation: "investigate failures before relying on this hook".to_string(),
                });
            }
        }

        let trend = self.monitor.trend();
        let mut recommendations = Vec::new();
        match trend {
            Trend::Increasing => recommendations
                .push("CPU usage rising; consider deferring low-priority triggers".to_string()),
            Trend::Decreasing => recommendations
                .push("CPU usage falling; headroom available for larger batches".to_string()),
            Trend::Stable => {}
        }

        info!(
            flagged = adjustments.len(),
            ?trend,
            "system performance analyzed"
        );
        OptimizationReport {
            adjustments,
            trend,
            recommendations,
        }
    }

    /// Current system view.
    #[must_use]
    pub fn get_system_metrics(&self) -> SystemMetrics {
        let snapshot = self.monitor.snapshot();
        SystemMetrics {
            cpu_average: snapshot.as_ref().map(|s| s.cpu_average),
            trend: self.monitor.trend(),
            active_hooks: self.active.load(Ordering::Relaxed),
            load_utilization: self.balancer.utilization(),
            open_transactions: self.rollback.active_count(),
            sample_count: snapshot.as_ref().map_or(0, |s| s.sample_count),
        }
    }
}

impl fmt::Debug for HookScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookScheduler")
            .field("config", &self.config)
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Total physical memory for the balancer's capacity, from `/proc` on
/// Linux and a 8 GiB assumption elsewhere.
fn total_memory_mb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            for line in meminfo.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:")
                    && let Some(kb) = rest.split_whitespace().next()
                    && let Ok(kb) = kb.parse::<u64>()
                {
                    return kb / 1024;
                }
            }
        }
    }
    8192
}
