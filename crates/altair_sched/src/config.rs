//! Scheduler configuration.
//!
//! [`SchedulerConfig`] carries every tunable the scheduler consults:
//! worker caps, timeouts, telemetry cadence, and the conflict strategy.
//! Defaults follow the builder idiom used across the workspace, so a
//! config line reads as a chain of `with_*` calls.

use core::time::Duration;

use crate::conflict::ConflictStrategy;

/// Tunables for planning and executing trigger groups.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use altair_sched::config::SchedulerConfig;
/// use altair_sched::conflict::ConflictStrategy;
///
/// let config = SchedulerConfig::default()
///     .with_max_workers(8)
///     .with_conflict_strategy(ConflictStrategy::RoundRobin)
///     .with_max_execution_time(Duration::from_secs(10));
/// assert_eq!(config.max_workers, 8);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on hooks executing concurrently within one batch.
    pub max_workers: usize,
    /// Per-hook execution timeout. Hooks exceeding it are recorded as failed.
    pub max_execution_time: Duration,
    /// Strategy for resolving contested triggers.
    pub conflict_strategy: ConflictStrategy,
    /// Whether batch failure triggers rollback of the trigger group.
    pub rollback_enabled: bool,
    /// Average execution time above which a hook earns an advisory
    /// priority reduction.
    pub slow_hook_threshold: Duration,
    /// Success rate below which a hook is reported as unreliable.
    pub unreliable_success_rate: f64,
    /// CPU usage (percent) above which the system counts as loaded.
    pub cpu_high_threshold: f64,
    /// Interval between resource telemetry samples.
    pub sample_interval: Duration,
    /// Number of samples kept per rolling telemetry window.
    pub sample_window: usize,
    /// Number of rollback outcomes retained in history.
    pub rollback_history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(4, |n| n.get());
        Self {
            max_workers: (cpus + 4).min(32),
            max_execution_time: Duration::from_secs(30),
            conflict_strategy: ConflictStrategy::PriorityBased,
            rollback_enabled: true,
            slow_hook_threshold: Duration::from_secs(5),
            unreliable_success_rate: 0.8,
            cpu_high_threshold: 75.0,
            sample_interval: Duration::from_secs(1),
            sample_window: 100,
            rollback_history_limit: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Sets the worker cap. Clamped to at least 1.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Sets the per-hook execution timeout.
    #[must_use]
    pub fn with_max_execution_time(mut self, timeout: Duration) -> Self {
        self.max_execution_time = timeout;
        self
    }

    /// Sets the conflict resolution strategy.
    #[must_use]
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Enables or disables rollback on batch failure.
    #[must_use]
    pub fn with_rollback_enabled(mut self, enabled: bool) -> Self {
        self.rollback_enabled = enabled;
        self
    }

    /// Sets the slow-hook advisory threshold.
    #[must_use]
    pub fn with_slow_hook_threshold(mut self, threshold: Duration) -> Self {
        self.slow_hook_threshold = threshold;
        self
    }

    /// Sets the CPU percentage above which the system counts as loaded.
    #[must_use]
    pub fn with_cpu_high_threshold(mut self, threshold: f64) -> Self {
        self.cpu_high_threshold = threshold;
        self
    }

    /// Sets the telemetry sampling interval.
    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }
}
