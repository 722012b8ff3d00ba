//! Resource telemetry and advisory admission control.
//!
//! [`ResourceMonitor`] keeps a bounded rolling window of system samples and
//! derives averages and a coarse [`Trend`] from it. Sampling is pluggable
//! through [`ResourceSampler`]; the default [`ProcSampler`] reads `/proc`
//! on Linux and yields nothing elsewhere, so an empty window is a normal
//! state every consumer must tolerate.
//!
//! [`LoadBalancer`] tracks an advisory ledger of resources allocated to
//! in-flight hooks. Admission over capacity is refused, but nothing is
//! enforced on the running hooks themselves.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use altair_hooks::hook::ResourceRequest;

/// Fraction by which the recent average must move before the trend leaves
/// [`Trend::Stable`].
const TREND_BAND: f64 = 0.02;

/// Samples on each side of the comparison used by [`ResourceMonitor::trend`].
const TREND_SPAN: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Samples and snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// One point-in-time system measurement.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    /// System-wide CPU usage in percent.
    pub cpu_percent: f64,
    /// Used physical memory in megabytes.
    pub memory_mb: u64,
    /// Total physical memory in megabytes.
    pub memory_total_mb: u64,
    /// Bytes read and written by this process since the previous sample.
    pub io_bytes_delta: u64,
    /// When the sample was taken.
    pub taken_at: Instant,
}

/// Aggregated view over the current sample window.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    /// Most recent CPU usage in percent.
    pub cpu_percent: f64,
    /// Rolling average CPU usage in percent.
    pub cpu_average: f64,
    /// Most recent used memory in megabytes.
    pub memory_mb: u64,
    /// Total physical memory in megabytes.
    pub memory_total_mb: u64,
    /// CPU usage trend over the window.
    pub trend: Trend,
    /// Number of samples backing this snapshot.
    pub sample_count: usize,
}

impl ResourceSnapshot {
    /// Fraction of memory still free, in `0.0..=1.0`.
    #[must_use]
    pub fn memory_headroom(&self) -> f64 {
        if self.memory_total_mb == 0 {
            return 1.0;
        }
        let used = self.memory_mb.min(self.memory_total_mb) as f64;
        1.0 - used / self.memory_total_mb as f64
    }
}

/// Direction of recent CPU usage relative to the preceding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trend {
    /// Recent usage is meaningfully above the prior window.
    Increasing,
    /// Recent usage is meaningfully below the prior window.
    Decreasing,
    /// Usage within the comparison band, or not enough samples.
    #[default]
    Stable,
}

// ─────────────────────────────────────────────────────────────────────────────
// Samplers
// ─────────────────────────────────────────────────────────────────────────────

/// Source of [`ResourceSample`]s.
///
/// Returning `None` means telemetry is unavailable right now; the monitor
/// records nothing and consumers fall back to neutral behavior.
pub trait ResourceSampler: Send + Sync {
    /// Takes one measurement, or `None` if the platform offers none.
    fn sample(&self) -> Option<ResourceSample>;
}

/// Raw CPU tick counters from one `/proc/stat` read.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy)]
struct CpuTicks {
    idle: u64,
    total: u64,
}

#[derive(Debug, Default)]
struct ProcState {
    #[cfg(target_os = "linux")]
    last_cpu: Option<CpuTicks>,
    last_io_bytes: Option<u64>,
}

/// `/proc`-backed sampler.
///
/// CPU usage is the delta between consecutive `/proc/stat` reads, so the
/// first call after construction reports 0% CPU. On non-Linux targets
/// [`ResourceSampler::sample`] always returns `None`.
#[derive(Debug, Default)]
pub struct ProcSampler {
    state: Mutex<ProcState>,
}

impl ProcSampler {
    /// Creates a sampler with no prior readings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(target_os = "linux")]
    fn read_cpu_ticks() -> Option<CpuTicks> {
        let stat = std::fs::read_to_string("/proc/stat").ok()?;
        let line = stat.lines().next()?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .filter_map(|f| f.parse().ok())
            .collect();
        if fields.len() < 5 {
            return None;
        }
        // idle + iowait count as idle time.
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
        let total = fields.iter().sum();
        Some(CpuTicks { idle, total })
    }

    #[cfg(target_os = "linux")]
    fn read_memory_mb() -> Option<(u64, u64)> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let mut total_kb = None;
        let mut available_kb = None;
        for line in meminfo.lines() {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("MemTotal:") => total_kb = parts.next().and_then(|v| v.parse::<u64>().ok()),
                Some("MemAvailable:") => {
                    available_kb = parts.next().and_then(|v| v.parse::<u64>().ok());
                }
                _ => {}
            }
            if total_kb.is_some() && available_kb.is_some() {
                break;
            }
        }
        let total_kb = total_kb?;
        let available_kb = available_kb.unwrap_or(total_kb);
        let used_mb = total_kb.saturating_sub(available_kb) / 1024;
        Some((used_mb, total_kb / 1024))
    }

    #[cfg(target_os = "linux")]
    fn read_io_bytes() -> Option<u64> {
        let io = std::fs::read_to_string("/proc/self/io").ok()?;
        let mut total = 0;
        for line in io.lines() {
            if let Some(value) = line
                .strip_prefix("read_bytes: ")
                .or_else(|| line.strip_prefix("write_bytes: "))
            {
                total += value.trim().parse::<u64>().ok()?;
            }
        }
        Some(total)
    }
}

impl ResourceSampler for ProcSampler {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Option<ResourceSample> {
        let ticks = Self::read_cpu_ticks()?;
        let (memory_mb, memory_total_mb) = Self::read_memory_mb()?;
        let io_bytes = Self::read_io_bytes();

        let mut state = self.state.lock();
        let cpu_percent = match state.last_cpu {
            Some(prev) if ticks.total > prev.total => {
                let total_delta = (ticks.total - prev.total) as f64;
                let idle_delta = ticks.idle.saturating_sub(prev.idle) as f64;
                ((1.0 - idle_delta / total_delta) * 100.0).clamp(0.0, 100.0)
            }
            _ => 0.0,
        };
        state.last_cpu = Some(ticks);

        let io_bytes_delta = match (state.last_io_bytes, io_bytes) {
            (Some(prev), Some(now)) => now.saturating_sub(prev),
            _ => 0,
        };
        state.last_io_bytes = io_bytes;

        Some(ResourceSample {
            cpu_percent,
            memory_mb,
            memory_total_mb,
            io_bytes_delta,
            taken_at: Instant::now(),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Option<ResourceSample> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ResourceMonitor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MonitorState {
    samples: VecDeque<ResourceSample>,
}

/// Rolling-window system telemetry.
///
/// Samples can be pushed directly with [`record_sample`], or collected on an
/// interval by the background task started with [`start`]. All derived
/// values return `None` (or [`Trend::Stable`]) while the window is empty or
/// too short, and every consumer treats that as "assume resources are fine".
///
/// [`record_sample`]: ResourceMonitor::record_sample
/// [`start`]: ResourceMonitor::start
pub struct ResourceMonitor {
    sampler: Arc<dyn ResourceSampler>,
    state: Mutex<MonitorState>,
    window: usize,
    interval: Duration,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ResourceMonitor {
    /// Creates a monitor over `sampler` keeping at most `window` samples.
    #[must_use]
    pub fn new(sampler: Arc<dyn ResourceSampler>, window: usize, interval: Duration) -> Self {
        Self {
            sampler,
            state: Mutex::new(MonitorState::default()),
            window: window.max(1),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Takes one sample now and records it, if the sampler produced one.
    pub fn sample_once(&self) {
        if let Some(sample) = self.sampler.sample() {
            self.record_sample(sample);
        } else {
            debug!("resource sampler yielded nothing, window unchanged");
        }
    }

    /// Appends `sample`, evicting the oldest entry once the window is full.
    pub fn record_sample(&self, sample: ResourceSample) {
        let mut state = self.state.lock();
        if state.samples.len() == self.window {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
    }

    /// Latest sample, if any.
    #[must_use]
    pub fn current(&self) -> Option<ResourceSample> {
        self.state.lock().samples.back().copied()
    }

    /// Rolling average CPU usage over the window.
    #[must_use]
    pub fn cpu_average(&self) -> Option<f64> {
        let state = self.state.lock();
        if state.samples.is_empty() {
            return None;
        }
        let sum: f64 = state.samples.iter().map(|s| s.cpu_percent).sum();
        Some(sum / state.samples.len() as f64)
    }

    /// CPU trend: the mean of the newest [`TREND_SPAN`] samples against the
    /// mean of the [`TREND_SPAN`] before them, with a ±2% dead band.
    ///
    /// Returns [`Trend::Stable`] with fewer than `2 * TREND_SPAN` samples.
    #[must_use]
    pub fn trend(&self) -> Trend {
        let state = self.state.lock();
        let n = state.samples.len();
        if n < 2 * TREND_SPAN {
            return Trend::Stable;
        }
        let mean = |range: std::ops::Range<usize>| -> f64 {
            let len = range.len() as f64;
            range.map(|i| state.samples[i].cpu_percent).sum::<f64>() / len
        };
        let prior = mean(n - 2 * TREND_SPAN..n - TREND_SPAN);
        let recent = mean(n - TREND_SPAN..n);

        let band = prior.abs().max(1.0) * TREND_BAND;
        if recent > prior + band {
            Trend::Increasing
        } else if recent < prior - band {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Aggregated snapshot of the window, or `None` while empty.
    #[must_use]
    pub fn snapshot(&self) -> Option<ResourceSnapshot> {
        let current = self.current()?;
        let cpu_average = self.cpu_average()?;
        let sample_count = self.state.lock().samples.len();
        Some(ResourceSnapshot {
            cpu_percent: current.cpu_percent,
            cpu_average,
            memory_mb: current.memory_mb,
            memory_total_mb: current.memory_total_mb,
            trend: self.trend(),
            sample_count,
        })
    }

    /// Starts the background sampling task. Calling twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.sample_once(),
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *task = Some((stop_tx, handle));
    }

    /// Stops the background sampling task and waits for it to exit.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((stop_tx, handle)) = task {
            let _ = stop_tx.send(true);
            if handle.await.is_err() {
                warn!("resource sampling task aborted unexpectedly");
            }
        }
    }
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("window", &self.window)
            .field("interval", &self.interval)
            .field("samples", &self.state.lock().samples.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LoadBalancer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Ledger {
    cpu_percent: f64,
    memory_mb: u64,
    active: usize,
}

/// Advisory admission ledger for in-flight hook resources.
///
/// [`allocate`] refuses requests that would push the declared totals past
/// capacity; it never throttles hooks that are already running.
///
/// [`allocate`]: LoadBalancer::allocate
#[derive(Debug)]
pub struct LoadBalancer {
    total_cpu: f64,
    total_memory_mb: u64,
    ledger: Mutex<Ledger>,
}

impl LoadBalancer {
    /// Creates a balancer with the given capacity.
    #[must_use]
    pub fn new(total_cpu: f64, total_memory_mb: u64) -> Self {
        Self {
            total_cpu,
            total_memory_mb,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Records `request` against the ledger. Returns `false` without
    /// recording anything when the request would exceed capacity.
    #[must_use]
    pub fn allocate(&self, request: &ResourceRequest) -> bool {
        let mut ledger = self.ledger.lock();
        let cpu_after = ledger.cpu_percent + request.cpu_percent;
        let memory_after = ledger.memory_mb + request.memory_mb;
        if cpu_after > self.total_cpu || memory_after > self.total_memory_mb {
            debug!(
                cpu_after,
                memory_after, "allocation refused, declared capacity exceeded"
            );
            return false;
        }
        ledger.cpu_percent = cpu_after;
        ledger.memory_mb = memory_after;
        ledger.active += 1;
        true
    }

    /// Returns `request` to the ledger after its hook finishes.
    pub fn release(&self, request: &ResourceRequest) {
        let mut ledger = self.ledger.lock();
        ledger.cpu_percent = (ledger.cpu_percent - request.cpu_percent).max(0.0);
        ledger.memory_mb = ledger.memory_mb.saturating_sub(request.memory_mb);
        ledger.active = ledger.active.saturating_sub(1);
    }

    /// Currently allocated CPU in percent.
    #[must_use]
    pub fn allocated_cpu(&self) -> f64 {
        self.ledger.lock().cpu_percent
    }

    /// Currently allocated memory in megabytes.
    #[must_use]
    pub fn allocated_memory_mb(&self) -> u64 {
        self.ledger.lock().memory_mb
    }

    /// Number of hooks currently holding allocations.
    #[must_use]
    pub fn active(&self) -> usize {
        self.ledger.lock().active
    }

    /// Allocated fraction of either resource, whichever is higher,
    /// in `0.0..=1.0`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let ledger = self.ledger.lock();
        let cpu = if self.total_cpu > 0.0 {
            ledger.cpu_percent / self.total_cpu
        } else {
            0.0
        };
        let memory = if self.total_memory_mb > 0 {
            ledger.memory_mb as f64 / self.total_memory_mb as f64
        } else {
            0.0
        };
        cpu.max(memory).clamp(0.0, 1.0)
    }
}
