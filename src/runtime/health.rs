//! Health monitoring for training runs.
//!
//! Tracks rolling step and write-wait latencies so progress logs can tell a
//! compute-bound run from one stalled on the store's writer queue.

use std::collections::VecDeque;

/// Health status levels.
#[derive(Clone, Debug, PartialEq)]
pub enum HealthStatus {
    /// All metrics below their warning thresholds.
    Healthy,
    /// A metric crossed its warning threshold.
    Degraded(String),
    /// A metric crossed its critical threshold.
    Critical(String),
}

/// A rolling metric tracker.
#[derive(Clone, Debug)]
pub struct MetricTracker {
    /// Metric name.
    pub name: String,

    /// Rolling window of `(step, value)` samples.
    pub samples: VecDeque<(u64, f32)>,

    /// Maximum window size.
    pub max_samples: usize,

    /// Warning threshold (upper bound).
    pub warn_threshold: Option<f32>,

    /// Critical threshold (upper bound).
    pub critical_threshold: Option<f32>,
}

impl MetricTracker {
    pub fn new(name: &str, max_samples: usize) -> Self {
        Self {
            name: name.to_string(),
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
            warn_threshold: None,
            critical_threshold: None,
        }
    }

    pub fn with_thresholds(mut self, warn: f32, critical: f32) -> Self {
        self.warn_threshold = Some(warn);
        self.critical_threshold = Some(critical);
        self
    }

    pub fn record(&mut self, step: u64, value: f32) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back((step, value));
    }

    pub fn latest(&self) -> Option<f32> {
        self.samples.back().map(|&(_, v)| v)
    }

    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|&(_, v)| v).sum();
        sum / self.samples.len() as f32
    }

    pub fn max(&self) -> f32 {
        self.samples
            .iter()
            .map(|&(_, v)| v)
            .fold(0.0, f32::max)
    }

    /// 99th percentile over the window.
    pub fn p99(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut values: Vec<f32> = self.samples.iter().map(|&(_, v)| v).collect();
        values.sort_by(f32::total_cmp);
        let idx = ((values.len() as f32) * 0.99) as usize;
        values[idx.min(values.len() - 1)]
    }

    /// Status of the latest sample against the thresholds.
    pub fn status(&self) -> HealthStatus {
        let Some(val) = self.latest() else {
            return HealthStatus::Healthy;
        };
        if let Some(crit) = self.critical_threshold {
            if val >= crit {
                return HealthStatus::Critical(format!("{}: {:.2} >= critical {}", self.name, val, crit));
            }
        }
        if let Some(warn) = self.warn_threshold {
            if val >= warn {
                return HealthStatus::Degraded(format!("{}: {:.2} >= warn {}", self.name, val, warn));
            }
        }
        HealthStatus::Healthy
    }
}

/// Per-run health monitor.
#[derive(Clone, Debug)]
pub struct HealthMonitor {
    /// Wall time of a whole step (ms).
    pub step_latency: MetricTracker,

    /// Time spent waiting for the step's write to land (ms).
    pub write_wait: MetricTracker,

    pub total_steps: u64,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            step_latency: MetricTracker::new("step_ms", 1000).with_thresholds(50.0, 500.0),
            write_wait: MetricTracker::new("write_wait_ms", 1000).with_thresholds(20.0, 200.0),
            total_steps: 0,
        }
    }

    pub fn record_step(&mut self, step: u64, step_ms: f32, write_wait_ms: f32) {
        self.total_steps += 1;
        self.step_latency.record(step, step_ms);
        self.write_wait.record(step, write_wait_ms);
    }

    /// Worst status across tracked metrics.
    pub fn overall_status(&self) -> HealthStatus {
        let checks = [self.step_latency.status(), self.write_wait.status()];
        checks
            .iter()
            .find(|c| matches!(c, HealthStatus::Critical(_)))
            .or_else(|| checks.iter().find(|c| matches!(c, HealthStatus::Degraded(_))))
            .cloned()
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: self.overall_status(),
            total_steps: self.total_steps,
            avg_step_ms: self.step_latency.mean(),
            p99_step_ms: self.step_latency.p99(),
            avg_write_wait_ms: self.write_wait.mean(),
            max_write_wait_ms: self.write_wait.max(),
        }
    }
}

/// A health snapshot.
#[derive(Clone, Debug)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub total_steps: u64,
    pub avg_step_ms: f32,
    pub p99_step_ms: f32,
    pub avg_write_wait_ms: f32,
    pub max_write_wait_ms: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_tracker_basic() {
        let mut t = MetricTracker::new("test", 100);
        t.record(0, 1.0);
        t.record(1, 2.0);
        t.record(2, 3.0);

        assert!((t.mean() - 2.0).abs() < 1e-6);
        assert!((t.max() - 3.0).abs() < 1e-6);
        assert_eq!(t.latest(), Some(3.0));
    }

    #[test]
    fn test_metric_tracker_window() {
        let mut t = MetricTracker::new("test", 3);
        for i in 0..5 {
            t.record(i as u64, i as f32);
        }
        assert_eq!(t.samples.len(), 3);
        assert!((t.mean() - 3.0).abs() < 1e-6); // [2, 3, 4]
    }

    #[test]
    fn test_p99_picks_tail() {
        let mut t = MetricTracker::new("test", 1000);
        for i in 0..100 {
            t.record(i, i as f32);
        }
        assert!((t.p99() - 99.0).abs() < 1e-6);
    }

    #[test]
    fn test_health_status_thresholds() {
        let mut t = MetricTracker::new("step_ms", 100).with_thresholds(50.0, 100.0);

        t.record(0, 30.0);
        assert_eq!(t.status(), HealthStatus::Healthy);

        t.record(1, 60.0);
        assert!(matches!(t.status(), HealthStatus::Degraded(_)));

        t.record(2, 200.0);
        assert!(matches!(t.status(), HealthStatus::Critical(_)));
    }

    #[test]
    fn test_monitor_worst_status_wins() {
        let mut mon = HealthMonitor::new();
        mon.record_step(0, 1.0, 1.0);
        assert_eq!(mon.overall_status(), HealthStatus::Healthy);

        mon.record_step(1, 60.0, 1000.0);
        assert!(matches!(mon.overall_status(), HealthStatus::Critical(_)));
    }

    #[test]
    fn test_health_report() {
        let mut mon = HealthMonitor::new();
        for i in 0..10 {
            mon.record_step(i, 2.0 + i as f32, 0.5);
        }

        let report = mon.report();
        assert_eq!(report.total_steps, 10);
        assert!(report.avg_step_ms > 2.0);
        assert!((report.max_write_wait_ms - 0.5).abs() < 1e-6);
    }
}
