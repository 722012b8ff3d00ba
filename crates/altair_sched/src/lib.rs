//! Priority-aware hook scheduling for Altair (Layer 2).
//!
//! `altair_sched` turns a trigger event and a set of candidate hooks into a
//! safe, resource-bounded execution plan, runs it, and can transactionally
//! reverse a partially-failed trigger group.
//!
//! # Core Concepts
//!
//! - [`HookScheduler`] - Orchestrator wiring planning, execution, and rollback
//! - [`ExecutionPlan`] - Batches, priorities, and resolved conflicts for one trigger
//! - [`TopologicalSorter`] - Phase-grouped, cycle-tolerant batch ordering
//! - [`ConflictResolver`] - Picks one winner per contested trigger
//! - [`ParallelExecutionOptimizer`] - Fits batches to live resource headroom
//! - [`RollbackManager`] - LIFO undo of a failed trigger group
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use altair_hooks::{HookContext, InMemoryRegistry};
//! use altair_sched::{HookScheduler, SchedulerConfig};
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! let scheduler = HookScheduler::new(registry, SchedulerConfig::default());
//!
//! let ctx = HookContext::new();
//! let plan = scheduler.calculate_execution_order("on_save", &hooks, &ctx);
//! let report = scheduler.execute_with_priority(&plan, ctx).await?;
//! assert!(report.overall_success);
//! ```
//!
//! # Architecture
//!
//! This crate is Layer 2 of the Altair architecture:
//!
//! - **Layer 1** (`altair_hooks`): Hook model and registry boundary
//! - **Layer 2** (`altair_sched`): Priority scheduling and batch execution (this crate)

/// Scheduler configuration.
pub mod config;

/// Trigger conflict resolution strategies.
pub mod conflict;

/// Orchestration: planning, batch execution, and adaptive optimization.
pub mod executor;

/// Dependency graph construction.
pub mod graph;

/// Resource telemetry and advisory admission control.
pub mod monitor;

/// Resource-aware batch optimization.
pub mod optimizer;

/// Multi-factor priority scoring.
pub mod priority;

/// Transactional rollback of execution groups.
pub mod rollback;

/// Phase-grouped topological sorting with cycle breaking.
pub mod sort;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::conflict::{ConflictResolution, ConflictResolver, ConflictStrategy, LoadSignal};
    pub use crate::executor::{
        BatchResult, ExecutionPlan, ExecutionReport, HookOutcome, HookScheduler,
        OptimizationReport, PriorityAdjustment, SchedulerError, SystemMetrics,
    };
    pub use crate::graph::{DependencyGraph, DependencyGraphBuilder, DependencyNode};
    pub use crate::monitor::{
        LoadBalancer, ProcSampler, ResourceMonitor, ResourceSample, ResourceSampler,
        ResourceSnapshot, Trend,
    };
    pub use crate::optimizer::ParallelExecutionOptimizer;
    pub use crate::priority::{
        ExecutionStats, HookStats, PriorityCalculator, PriorityContext, PriorityWeight,
    };
    pub use crate::rollback::{RollbackAction, RollbackManager, RollbackRecord, RollbackScope};
    pub use crate::sort::{BatchResources, ExecutionBatch, TopologicalSorter};
}

// Re-export key types at crate root for convenience
pub use config::SchedulerConfig;
pub use conflict::{ConflictResolution, ConflictResolver, ConflictStrategy};
pub use executor::{ExecutionPlan, ExecutionReport, HookScheduler, SchedulerError};
pub use monitor::{LoadBalancer, ResourceMonitor};
pub use optimizer::ParallelExecutionOptimizer;
pub use priority::PriorityCalculator;
pub use rollback::RollbackManager;
pub use sort::{ExecutionBatch, TopologicalSorter};
