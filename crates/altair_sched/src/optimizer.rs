//! Resource-aware batch optimization.
//!
//! [`ParallelExecutionOptimizer`] reshapes the sorter's batches against the
//! worker budget and live telemetry:
//!
//! - **Split** batches holding more hooks than the worker budget
//! - **Bound** each batch's parallelism to what CPU and memory headroom allow
//! - **Merge** adjacent small batches of the same phase when they fit together
//!
//! Without telemetry only the worker budget applies; batches otherwise pass
//! through unchanged.

use std::sync::Arc;

use tracing::debug;

use crate::graph::DependencyGraph;
use crate::monitor::{LoadBalancer, ResourceMonitor, ResourceSnapshot};
use crate::sort::{BatchResources, ExecutionBatch};

/// Reshapes execution batches to fit the worker budget and live headroom.
pub struct ParallelExecutionOptimizer {
    max_workers: usize,
    monitor: Arc<ResourceMonitor>,
    balancer: Arc<LoadBalancer>,
}

impl ParallelExecutionOptimizer {
    /// Creates an optimizer with the given worker budget.
    #[must_use]
    pub fn new(
        max_workers: usize,
        monitor: Arc<ResourceMonitor>,
        balancer: Arc<LoadBalancer>,
    ) -> Self {
        Self {
            max_workers: max_workers.max(1),
            monitor,
            balancer,
        }
    }

    /// Applies split, bound, and merge in that order.
    ///
    /// Phase ordering and intra-phase dependency ordering are preserved:
    /// splitting and merging only ever act within one phase, batches are
    /// never reordered, and two batches only merge when `graph` shows no
    /// edge between them.
    #[must_use]
    pub fn optimize_parallel_execution(
        &self,
        batches: Vec<ExecutionBatch>,
        graph: &DependencyGraph,
    ) -> Vec<ExecutionBatch> {
        let snapshot = self.monitor.snapshot();
        let split = self.split_oversized(batches);
        let bounded = self.bound_parallelism(split, snapshot.as_ref());
        self.merge_adjacent(bounded, snapshot.as_ref(), graph)
    }

    fn split_oversized(&self, batches: Vec<ExecutionBatch>) -> Vec<ExecutionBatch> {
        let mut out = Vec::with_capacity(batches.len());
        for batch in batches {
            if batch.len() <= self.max_workers || batch.exclusive {
                out.push(batch);
                continue;
            }
            let total = batch.len();
            debug!(
                batch = %batch.id,
                hooks = total,
                budget = self.max_workers,
                "splitting oversized batch"
            );
            for (index, chunk) in batch.hooks.chunks(self.max_workers).enumerate() {
                let share = chunk.len() as f64 / total as f64;
                out.push(ExecutionBatch {
                    id: format!("{}_s{index}", batch.id),
                    hooks: chunk.to_vec(),
                    phase: batch.phase,
                    max_parallelism: batch.max_parallelism.min(chunk.len()),
                    resources: BatchResources {
                        cpu_percent: batch.resources.cpu_percent * share,
                        memory_mb: (batch.resources.memory_mb as f64 * share).ceil() as u64,
                    },
                    estimated_duration: batch.estimated_duration,
                    exclusive: false,
                });
            }
        }
        out
    }

    fn bound_parallelism(
        &self,
        batches: Vec<ExecutionBatch>,
        snapshot: Option<&ResourceSnapshot>,
    ) -> Vec<ExecutionBatch> {
        batches
            .into_iter()
            .map(|mut batch| {
                if batch.exclusive {
                    batch.max_parallelism = 1;
                    return batch;
                }
                let mut limit = batch.max_parallelism.min(self.max_workers);
                if let Some(snapshot) = snapshot {
                    limit = limit
                        .min(self.cpu_limit(&batch, snapshot))
                        .min(self.memory_limit(&batch, snapshot));
                }
                batch.max_parallelism = limit.max(1);
                batch
            })
            .collect()
    }

    /// How many of the batch's hooks the unallocated CPU headroom admits,
    /// assuming each hook draws an equal share of the batch's declared CPU.
    fn cpu_limit(&self, batch: &ExecutionBatch, snapshot: &ResourceSnapshot) -> usize {
        let per_hook = batch.resources.cpu_percent / batch.len().max(1) as f64;
        if per_hook <= 0.0 {
            return batch.len();
        }
        let headroom =
            (100.0 - snapshot.cpu_average - self.balancer.allocated_cpu()).max(per_hook);
        (headroom / per_hook).floor() as usize
    }

    /// Memory analogue of [`cpu_limit`](Self::cpu_limit).
    fn memory_limit(&self, batch: &ExecutionBatch, snapshot: &ResourceSnapshot) -> usize {
        let per_hook = batch.resources.memory_mb / batch.len().max(1) as u64;
        if per_hook == 0 {
            return batch.len();
        }
        let free = snapshot
            .memory_total_mb
            .saturating_sub(snapshot.memory_mb)
            .saturating_sub(self.balancer.allocated_memory_mb());
        ((free / per_hook) as usize).max(1)
    }

    fn merge_adjacent(
        &self,
        batches: Vec<ExecutionBatch>,
        snapshot: Option<&ResourceSnapshot>,
        graph: &DependencyGraph,
    ) -> Vec<ExecutionBatch> {
        let mut out: Vec<ExecutionBatch> = Vec::with_capacity(batches.len());
        for batch in batches {
            let mergeable = out.last().is_some_and(|prev| {
                prev.phase == batch.phase
                    && !prev.exclusive
                    && !batch.exclusive
                    && prev.len() + batch.len() <= self.max_workers
                    && Self::independent(prev, &batch, graph)
                    && self.fits_headroom(prev, &batch, snapshot)
            });
            if mergeable && let Some(prev) = out.last_mut() {
                debug!(first = %prev.id, second = %batch.id, "merging adjacent batches");
                prev.hooks.extend(batch.hooks);
                prev.max_parallelism = (prev.max_parallelism + batch.max_parallelism)
                    .min(self.max_workers)
                    .min(prev.hooks.len());
                prev.resources.cpu_percent += batch.resources.cpu_percent;
                prev.resources.memory_mb += batch.resources.memory_mb;
                prev.estimated_duration = prev.estimated_duration.max(batch.estimated_duration);
            } else {
                out.push(batch);
            }
        }
        out
    }

    /// No hook in `second` may depend on a hook in `first`. Dependencies of
    /// `second`'s hooks all sit in earlier batches, so a direct check
    /// against `first`'s membership suffices.
    fn independent(
        first: &ExecutionBatch,
        second: &ExecutionBatch,
        graph: &DependencyGraph,
    ) -> bool {
        second.hooks.iter().all(|hook| {
            graph.get(hook).is_none_or(|node| {
                !first.hooks.iter().any(|h| node.dependencies.contains(h))
            })
        })
    }

    fn fits_headroom(
        &self,
        first: &ExecutionBatch,
        second: &ExecutionBatch,
        snapshot: Option<&ResourceSnapshot>,
    ) -> bool {
        let Some(snapshot) = snapshot else {
            // No telemetry: worker budget alone decides, checked by caller.
            return true;
        };
        let combined_cpu = first.resources.cpu_percent + second.resources.cpu_percent;
        let cpu_free = (100.0 - snapshot.cpu_average - self.balancer.allocated_cpu()).max(0.0);
        let combined_memory = first.resources.memory_mb + second.resources.memory_mb;
        let memory_free = snapshot
            .memory_total_mb
            .saturating_sub(snapshot.memory_mb)
            .saturating_sub(self.balancer.allocated_memory_mb());
        combined_cpu <= cpu_free && combined_memory <= memory_free
    }
}

impl std::fmt::Debug for ParallelExecutionOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutionOptimizer")
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}
