//! Multi-factor priority scoring.
//!
//! The [`PriorityCalculator`] combines seven advisory factors into one
//! effective priority per hook. The factors are weighted, summed, and
//! floored at 0.1 so that no combination of penalties can starve a hook
//! out of scheduling entirely.
//!
//! Execution counters live in a shared [`ExecutionStats`] store rather
//! than on the calculator itself: batch executions report results
//! concurrently, so the store is lock-guarded and injected wherever the
//! counters are read.

use core::time::Duration;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;

use altair_hooks::hook::HookMetadata;

// ─────────────────────────────────────────────────────────────────────────────
// Factor weights
// ─────────────────────────────────────────────────────────────────────────────

/// Relative weight of the declared priority class.
const W_BASE: f64 = 0.40;
/// Relative weight of dependency depth.
const W_DEPTH: f64 = 0.15;
/// Relative weight of execution frequency.
const W_FREQUENCY: f64 = 0.15;
/// Relative weight of historical success rate.
const W_SUCCESS: f64 = 0.10;
/// Relative weight of current system load.
const W_LOAD: f64 = 0.10;
/// Relative weight of time sensitivity.
const W_URGENCY: f64 = 0.05;
/// Relative weight of resource availability.
const W_RESOURCES: f64 = 0.05;

/// Lower bound on every effective priority.
pub const MIN_EFFECTIVE_PRIORITY: f64 = 0.1;

// ─────────────────────────────────────────────────────────────────────────────
// ExecutionStats
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregated execution history for one hook.
#[derive(Debug, Clone, Default)]
pub struct HookStats {
    /// Completed executions.
    pub executions: u64,
    /// Successful executions.
    pub successes: u64,
    /// Failed executions (including timeouts).
    pub failures: u64,
    /// Sum of observed execution durations.
    pub total_duration: Duration,
}

impl HookStats {
    /// Success rate, or `None` if the hook has never executed.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        if self.executions == 0 {
            None
        } else {
            Some(self.successes as f64 / self.executions as f64)
        }
    }

    /// Mean execution duration, or `None` if the hook has never executed.
    #[must_use]
    pub fn average_duration(&self) -> Option<Duration> {
        if self.executions == 0 {
            None
        } else {
            Some(self.total_duration / u32::try_from(self.executions).unwrap_or(u32::MAX))
        }
    }
}

/// Shared, lock-guarded execution counters keyed by hook name.
///
/// Counters persist across scheduling calls for the life of the scheduler
/// and feed the frequency and success factors of future priority scores.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    inner: Mutex<HashMap<String, HookStats>>,
}

impl ExecutionStats {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed execution.
    pub fn record(&self, hook: &str, success: bool, duration: Duration) {
        let mut guard = self.inner.lock();
        let stats = guard.entry_ref(hook).or_default();
        stats.executions += 1;
        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        stats.total_duration += duration;
    }

    /// Returns a copy of the counters for one hook.
    #[must_use]
    pub fn get(&self, hook: &str) -> Option<HookStats> {
        self.inner.lock().get(hook).cloned()
    }

    /// Mean execution count across all tracked hooks.
    #[must_use]
    pub fn mean_executions(&self) -> f64 {
        let guard = self.inner.lock();
        if guard.is_empty() {
            return 0.0;
        }
        let total: u64 = guard.values().map(|s| s.executions).sum();
        total as f64 / guard.len() as f64
    }

    /// Returns a copy of the whole store.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, HookStats> {
        self.inner.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PriorityWeight
// ─────────────────────────────────────────────────────────────────────────────

/// Per-hook structured priority score.
///
/// Each field is the unweighted contribution of one factor; combine them
/// with [`PriorityCalculator::calculate_effective_priority`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorityWeight {
    /// Score derived from the declared priority class.
    pub base: f64,
    /// Adjustment for how many hooks transitively depend on this one.
    pub dependency_depth: f64,
    /// Adjustment rewarding hooks executed less often than average.
    pub frequency: f64,
    /// Adjustment from historical success rate. Zero until the hook has
    /// executed at least once.
    pub success_rate: f64,
    /// Adjustment from current system load.
    pub system_load: f64,
    /// Adjustment from declared time sensitivity.
    pub urgency: f64,
    /// Adjustment from resource availability relative to declared needs.
    pub resource_availability: f64,
}

/// Live signals consulted while scoring a hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityContext {
    /// Longest chain of hooks transitively depending on the scored hook.
    pub dependency_depth: usize,
    /// Rolling average CPU usage in percent, if telemetry is available.
    pub cpu_average: Option<f64>,
    /// Fraction of tracked resources still unallocated (0.0 to 1.0), if
    /// admission control is in use.
    pub resource_headroom: Option<f64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// PriorityCalculator
// ─────────────────────────────────────────────────────────────────────────────

/// Computes effective priorities from hook metadata and live signals.
///
/// The calculator is stateless apart from the injected [`ExecutionStats`]
/// store, so one instance serves every scheduling call.
#[derive(Debug, Clone)]
pub struct PriorityCalculator {
    stats: Arc<ExecutionStats>,
    /// CPU percentage above which the load factor penalizes heavy hooks.
    cpu_high_threshold: f64,
}

/// CPU percentage below which the load factor boosts heavy hooks.
const CPU_IDLE_THRESHOLD: f64 = 30.0;

impl PriorityCalculator {
    /// Creates a calculator over the given stats store.
    #[must_use]
    pub fn new(stats: Arc<ExecutionStats>, cpu_high_threshold: f64) -> Self {
        Self {
            stats,
            cpu_high_threshold,
        }
    }

    /// Scores one hook against the current context.
    #[must_use]
    pub fn calculate_priority(&self, hook: &HookMetadata, ctx: &PriorityContext) -> PriorityWeight {
        PriorityWeight {
            base: self.base_factor(hook),
            dependency_depth: Self::depth_factor(ctx.dependency_depth),
            frequency: self.frequency_factor(hook),
            success_rate: self.success_factor(hook),
            system_load: self.load_factor(hook, ctx.cpu_average),
            urgency: Self::urgency_factor(hook),
            resource_availability: Self::resource_factor(hook, ctx.resource_headroom),
        }
    }

    /// Combines factor scores into one effective priority.
    ///
    /// The result is the fixed-weight sum of all seven factors, floored at
    /// [`MIN_EFFECTIVE_PRIORITY`] so scheduling always makes progress.
    #[must_use]
    pub fn calculate_effective_priority(&self, weights: &PriorityWeight) -> f64 {
        let combined = weights.base * W_BASE
            + weights.dependency_depth * W_DEPTH
            + weights.frequency * W_FREQUENCY
            + weights.success_rate * W_SUCCESS
            + weights.system_load * W_LOAD
            + weights.urgency * W_URGENCY
            + weights.resource_availability * W_RESOURCES;
        combined.max(MIN_EFFECTIVE_PRIORITY)
    }

    /// Records one completed execution into the shared stats store.
    pub fn update_execution_stats(&self, hook: &str, success: bool, duration: Duration) {
        self.stats.record(hook, success, duration);
    }

    /// Returns the shared stats store.
    #[must_use]
    pub fn stats(&self) -> &Arc<ExecutionStats> {
        &self.stats
    }

    /// Declared priority class mapped onto a 0..=10 score. Numerically
    /// lower classes are higher priority.
    fn base_factor(&self, hook: &HookMetadata) -> f64 {
        f64::from(10 - hook.priority.clamp(0, 10))
    }

    /// Hooks that many others depend on score higher, capped at 5.
    fn depth_factor(depth: usize) -> f64 {
        depth.min(5) as f64
    }

    /// Rewards hooks executed less often than the running average, to
    /// avoid starvation of rarely-selected hooks.
    fn frequency_factor(&self, hook: &HookMetadata) -> f64 {
        let mean = self.stats.mean_executions();
        if mean <= 0.0 {
            return 0.0;
        }
        let mine = self
            .stats
            .get(&hook.name)
            .map_or(0.0, |s| s.executions as f64);
        (((mean - mine) / mean) * 5.0).clamp(-5.0, 5.0)
    }

    /// Zero until the hook has executed at least once, then scaled around
    /// a 50% success midpoint.
    fn success_factor(&self, hook: &HookMetadata) -> f64 {
        let rate = self
            .stats
            .get(&hook.name)
            .and_then(|s| s.success_rate())
            .or_else(|| hook.success_rate());
        match rate {
            None => 0.0,
            Some(rate) => (rate - 0.5) * 10.0,
        }
    }

    /// Boosts CPU-heavy hooks when the system is idle and penalizes them
    /// when it is busy. Neutral without telemetry.
    fn load_factor(&self, hook: &HookMetadata, cpu_average: Option<f64>) -> f64 {
        let Some(cpu) = cpu_average else {
            return 0.0;
        };
        if !Self::is_cpu_heavy(hook) {
            return 0.0;
        }
        if cpu < CPU_IDLE_THRESHOLD {
            3.0
        } else if cpu > self.cpu_high_threshold {
            -3.0
        } else {
            0.0
        }
    }

    fn is_cpu_heavy(hook: &HookMetadata) -> bool {
        hook.tags.contains("cpu_intensive") || hook.tags.contains("cpu_heavy")
    }

    /// Tag-declared time sensitivity.
    fn urgency_factor(hook: &HookMetadata) -> f64 {
        if hook.tags.contains("urgent") || hook.tags.contains("critical") {
            5.0
        } else if hook.tags.contains("deferred") {
            -2.5
        } else {
            0.0
        }
    }

    /// Scales with unallocated headroom, centered at half capacity.
    /// Neutral when admission control is not tracking anything.
    fn resource_factor(_hook: &HookMetadata, headroom: Option<f64>) -> f64 {
        match headroom {
            None => 0.0,
            Some(headroom) => (headroom.clamp(0.0, 1.0) - 0.5) * 5.0,
        }
    }
}
