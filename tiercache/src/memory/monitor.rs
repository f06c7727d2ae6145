//! Process memory monitoring
//!
//! Samples resident set size, keeping a baseline, a running peak and a
//! bounded window of recent samples for trend classification. Monitoring
//! degrades gracefully: a failed measurement falls back to the last known
//! value and never surfaces an error to the host operation.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;

/// Bounded ring of retained samples
const MAX_SAMPLES: usize = 256;
/// How many recent samples the trend classification looks at
const TREND_WINDOW: usize = 10;

/// Memory sampling function, injectable for tests
pub type Sampler = Box<dyn Fn() -> Option<f64> + Send + Sync>;

/// Direction of recent memory movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Snapshot of monitor state
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub current_mb: f64,
    pub baseline_mb: f64,
    pub peak_mb: f64,
    pub percent: f64,
    pub growth_mb: f64,
    pub trend: MemoryTrend,
    pub samples: usize,
}

struct MonitorInner {
    baseline_mb: Option<f64>,
    peak_mb: f64,
    last_known_mb: f64,
    samples: VecDeque<f64>,
}

/// Process memory monitor with baseline/peak/trend tracking
pub struct MemoryMonitor {
    sampler: Sampler,
    inner: Mutex<MonitorInner>,
}

impl MemoryMonitor {
    /// Monitor backed by the process RSS of the running process
    pub fn new() -> Self {
        Self::with_sampler(Box::new(rss_mb))
    }

    /// Monitor with a custom sampler (used by tests for determinism)
    pub fn with_sampler(sampler: Sampler) -> Self {
        let monitor = Self {
            sampler,
            inner: Mutex::new(MonitorInner {
                baseline_mb: None,
                peak_mb: 0.0,
                last_known_mb: 0.0,
                samples: VecDeque::new(),
            }),
        };
        let baseline = monitor.record_sample();
        debug!("memory monitor initialized, baseline {:.1}MB", baseline);
        monitor
    }

    /// Current process memory in MB; last known value when the host does
    /// not expose memory statistics.
    pub fn current_mb(&self) -> f64 {
        match (self.sampler)() {
            Some(mb) => mb,
            None => self.inner.lock().last_known_mb,
        }
    }

    /// Current usage as a share of total system memory, in percent
    pub fn percent(&self) -> f64 {
        let current = self.current_mb();
        match sys_info::mem_info() {
            Ok(mem) => {
                let total_mb = mem.total as f64 / 1024.0;
                if total_mb > 0.0 {
                    current / total_mb * 100.0
                } else {
                    0.0
                }
            }
            Err(_) => 0.0,
        }
    }

    /// Take and record a fresh sample, returning the current value
    pub fn record_sample(&self) -> f64 {
        let sampled = (self.sampler)();
        let mut inner = self.inner.lock();
        let current = sampled.unwrap_or(inner.last_known_mb);

        inner.last_known_mb = current;
        if sampled.is_some() && inner.baseline_mb.is_none() {
            inner.baseline_mb = Some(current);
        }
        if current > inner.peak_mb {
            inner.peak_mb = current;
        }
        inner.samples.push_back(current);
        while inner.samples.len() > MAX_SAMPLES {
            inner.samples.pop_front();
        }
        current
    }

    pub fn stats(&self) -> MemoryStats {
        let percent = self.percent();
        let inner = self.inner.lock();
        let current = inner.last_known_mb;
        let baseline = inner.baseline_mb.unwrap_or(current);
        MemoryStats {
            current_mb: current,
            baseline_mb: baseline,
            peak_mb: inner.peak_mb,
            percent,
            growth_mb: current - baseline,
            trend: Self::classify_trend(&inner.samples),
            samples: inner.samples.len(),
        }
    }

    /// Compare the first and last sample in the recent window: more than
    /// +5% change is increasing, less than -5% is decreasing.
    fn classify_trend(samples: &VecDeque<f64>) -> MemoryTrend {
        let window: Vec<f64> = samples
            .iter()
            .rev()
            .take(TREND_WINDOW)
            .rev()
            .copied()
            .collect();
        if window.len() < 2 {
            return MemoryTrend::Stable;
        }
        let first = window[0];
        let last = window[window.len() - 1];
        if first <= 0.0 {
            return MemoryTrend::Stable;
        }
        let change_percent = (last - first) / first * 100.0;
        if change_percent > 5.0 {
            MemoryTrend::Increasing
        } else if change_percent < -5.0 {
            MemoryTrend::Decreasing
        } else {
            MemoryTrend::Stable
        }
    }
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident set size of this process in MB, read from `/proc`.
///
/// `/proc` may be unavailable in sandboxed environments; callers treat
/// `None` as "no change since last sample".
fn rss_mb() -> Option<f64> {
    #[cfg(target_os = "linux")]
    {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: f64 = rest.split_whitespace().next()?.parse().ok()?;
                return Some(kb / 1024.0);
            }
        }
        None
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn stepped_monitor(values: Vec<f64>) -> MemoryMonitor {
        let step = Arc::new(AtomicU64::new(0));
        MemoryMonitor::with_sampler(Box::new(move || {
            let i = step.fetch_add(1, Ordering::SeqCst) as usize;
            Some(values[i.min(values.len() - 1)])
        }))
    }

    #[test]
    fn test_baseline_is_first_sample_and_peak_tracks_max() {
        let monitor = stepped_monitor(vec![100.0, 140.0, 120.0]);
        monitor.record_sample();
        monitor.record_sample();

        let stats = monitor.stats();
        assert_eq!(stats.baseline_mb, 100.0);
        assert_eq!(stats.peak_mb, 140.0);
        assert_eq!(stats.current_mb, 120.0);
        assert_eq!(stats.growth_mb, 20.0);
    }

    #[test]
    fn test_trend_increasing() {
        let monitor = stepped_monitor(vec![100.0, 102.0, 104.0, 110.0]);
        for _ in 0..3 {
            monitor.record_sample();
        }
        assert_eq!(monitor.stats().trend, MemoryTrend::Increasing);
    }

    #[test]
    fn test_trend_stable_within_five_percent() {
        let monitor = stepped_monitor(vec![100.0, 101.0, 102.0, 103.0]);
        for _ in 0..3 {
            monitor.record_sample();
        }
        assert_eq!(monitor.stats().trend, MemoryTrend::Stable);
    }

    #[test]
    fn test_measurement_failure_returns_last_known() {
        let step = Arc::new(AtomicU64::new(0));
        let monitor = MemoryMonitor::with_sampler(Box::new(move || {
            if step.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(80.0)
            } else {
                None
            }
        }));
        assert_eq!(monitor.record_sample(), 80.0, "degrades to last known");
        assert_eq!(monitor.current_mb(), 80.0);
    }

    #[test]
    fn test_sample_window_is_bounded() {
        let monitor = stepped_monitor(vec![50.0]);
        for _ in 0..(MAX_SAMPLES * 2) {
            monitor.record_sample();
        }
        assert_eq!(monitor.stats().samples, MAX_SAMPLES);
    }
}
