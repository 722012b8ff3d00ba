//! Hook metadata, phases, and isolation levels.
//!
//! [`HookMetadata`] is the declared, registry-owned description of a hook:
//! its triggers, dependencies, phase placement, and historical execution
//! counters. The scheduler reads snapshots of this data and never writes
//! it back; counter updates flow through the registry.

use core::fmt;
use core::time::Duration;
use std::time::SystemTime;

use hashbrown::HashSet;

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionPhase
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered coarse-grained stage a hook is bucketed into before fine-grained
/// dependency sorting.
///
/// Phases execute strictly in declaration order: all batches of an earlier
/// phase complete before any batch of a later phase starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionPhase {
    /// Input and precondition checks.
    PreValidation,
    /// Environment and state setup.
    Initialization,
    /// The main body of work.
    #[default]
    CoreProcessing,
    /// Result shaping and propagation.
    PostProcessing,
    /// Resource teardown.
    Cleanup,
    /// Final reporting and commit points.
    Finalization,
}

impl ExecutionPhase {
    /// All phases in execution order.
    pub const ALL: [ExecutionPhase; 6] = [
        ExecutionPhase::PreValidation,
        ExecutionPhase::Initialization,
        ExecutionPhase::CoreProcessing,
        ExecutionPhase::PostProcessing,
        ExecutionPhase::Cleanup,
        ExecutionPhase::Finalization,
    ];
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionPhase::PreValidation => "pre_validation",
            ExecutionPhase::Initialization => "initialization",
            ExecutionPhase::CoreProcessing => "core_processing",
            ExecutionPhase::PostProcessing => "post_processing",
            ExecutionPhase::Cleanup => "cleanup",
            ExecutionPhase::Finalization => "finalization",
        };
        write!(f, "{name}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// IsolationLevel
// ─────────────────────────────────────────────────────────────────────────────

/// Constrains whether a hook may co-occupy a batch with other hooks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IsolationLevel {
    /// May share a batch with any other shared hooks.
    #[default]
    Shared,
    /// Must run in its own batch, concurrently with nothing.
    Isolated,
    /// Must run in its own batch with exclusive resource access.
    Exclusive,
}

impl IsolationLevel {
    /// Returns true if the hook must not share a batch with other hooks.
    #[must_use]
    pub fn requires_own_batch(&self) -> bool {
        *self >= IsolationLevel::Isolated
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookState
// ─────────────────────────────────────────────────────────────────────────────

/// Registration state of a hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookState {
    /// Eligible for scheduling.
    #[default]
    Active,
    /// Registered but never scheduled.
    Disabled,
}

// ─────────────────────────────────────────────────────────────────────────────
// ResourceRequest
// ─────────────────────────────────────────────────────────────────────────────

/// Declared resource requirements for one hook execution.
///
/// Requests are advisory bookkeeping consumed by the scheduler's load
/// balancer; nothing here is enforced at the OS level.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Requested CPU share, in percent of total capacity.
    pub cpu_percent: f64,
    /// Requested memory, in megabytes.
    pub memory_mb: u64,
    /// Expected IO operation count.
    pub io_operations: u64,
    /// Expected network bandwidth, in kilobytes per second.
    pub network_bandwidth_kbps: u64,
    /// Requested worker threads.
    pub thread_count: u32,
    /// Upper bound on execution time, in milliseconds.
    pub max_duration_ms: u64,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cpu_percent: 5.0,
            memory_mb: 64,
            io_operations: 0,
            network_bandwidth_kbps: 0,
            thread_count: 1,
            max_duration_ms: 30_000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HookMetadata
// ─────────────────────────────────────────────────────────────────────────────

/// Declared properties and execution history of a registered hook.
///
/// Metadata is owned by the registry. The scheduler works on cloned
/// snapshots, so a snapshot observed during planning stays coherent for
/// the whole scheduling pass even if the registry is updated concurrently.
///
/// # Example
///
/// ```
/// use altair_hooks::hook::{ExecutionPhase, HookMetadata, IsolationLevel};
///
/// let hook = HookMetadata::new("context_snapshot", 3)
///     .with_trigger("on_save")
///     .with_dependency("validate_input")
///     .with_phase(ExecutionPhase::PostProcessing)
///     .with_isolation(IsolationLevel::Isolated);
///
/// assert!(hook.triggers.contains("on_save"));
/// ```
#[derive(Debug, Clone)]
pub struct HookMetadata {
    /// Unique hook name.
    pub name: String,
    /// Declared priority class. Numerically lower is higher priority.
    pub priority: i32,
    /// Names of hooks that must complete before this one.
    pub dependencies: HashSet<String>,
    /// Dependencies that are honored when present but never block scheduling.
    pub optional_dependencies: HashSet<String>,
    /// Free-form classification tags.
    pub tags: HashSet<String>,
    /// Trigger events this hook responds to.
    pub triggers: HashSet<String>,
    /// Phase this hook is bucketed into.
    pub phase: ExecutionPhase,
    /// Optional parallel-group tag. Hooks sharing a tag are batched together.
    pub parallel_group: Option<String>,
    /// Batch co-occupancy constraint.
    pub isolation: IsolationLevel,
    /// Rolling average of observed execution time.
    pub average_execution_time: Duration,
    /// Total number of completed executions.
    pub execution_count: u64,
    /// Number of successful executions.
    pub success_count: u64,
    /// Number of failed executions.
    pub failure_count: u64,
    /// When the hook was registered.
    pub created_at: SystemTime,
    /// Registration state.
    pub state: HookState,
}

impl HookMetadata {
    /// Creates metadata for a hook with the given name and priority class.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            dependencies: HashSet::new(),
            optional_dependencies: HashSet::new(),
            tags: HashSet::new(),
            triggers: HashSet::new(),
            phase: ExecutionPhase::default(),
            parallel_group: None,
            isolation: IsolationLevel::default(),
            average_execution_time: Duration::ZERO,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: SystemTime::now(),
            state: HookState::default(),
        }
    }

    /// Adds a required dependency.
    #[must_use]
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.insert(name.into());
        self
    }

    /// Adds an optional dependency.
    #[must_use]
    pub fn with_optional_dependency(mut self, name: impl Into<String>) -> Self {
        self.optional_dependencies.insert(name.into());
        self
    }

    /// Adds a trigger this hook responds to.
    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Into<String>) -> Self {
        self.triggers.insert(trigger.into());
        self
    }

    /// Adds a classification tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Sets the execution phase.
    #[must_use]
    pub fn with_phase(mut self, phase: ExecutionPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Sets the parallel-group tag.
    #[must_use]
    pub fn with_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Seeds the rolling average execution time.
    #[must_use]
    pub fn with_average_execution_time(mut self, avg: Duration) -> Self {
        self.average_execution_time = avg;
        self
    }

    /// Overrides the registration timestamp.
    #[must_use]
    pub fn with_created_at(mut self, created_at: SystemTime) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets the registration state.
    #[must_use]
    pub fn with_state(mut self, state: HookState) -> Self {
        self.state = state;
        self
    }

    /// Historical success rate, or `None` if the hook has never executed.
    ///
    /// The distinction matters to the priority calculator: a hook with no
    /// history gets a neutral score rather than a perfect or zero one.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        if self.execution_count == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.execution_count as f64)
        }
    }

    /// Records one completed execution, updating counters and the rolling
    /// average execution time.
    pub fn record_execution(&mut self, success: bool, duration: Duration) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        if self.execution_count == 1 {
            self.average_execution_time = duration;
        } else {
            // Exponential moving average, weighted toward history.
            let prev = self.average_execution_time.as_secs_f64();
            let next = prev * 0.8 + duration.as_secs_f64() * 0.2;
            self.average_execution_time = Duration::from_secs_f64(next);
        }
    }
}
