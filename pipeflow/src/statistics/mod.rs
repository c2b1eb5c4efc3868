//! Timing, waiting and size statistics.
//!
//! Collectors are shared by every concurrent invocation of a pipe or
//! pipeline and only ever updated with atomic operations.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Accumulator interface fed by the monitoring, throttle and size steps.
pub trait StatisticsSink: Send + Sync {
    /// Adds one sample.
    fn add_value(&self, value: u64);
}

/// Lock-free count/sum/min/max accumulator.
#[derive(Debug)]
pub struct Statistics {
    name: String,
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Statistics {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Name of the statistic.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of samples.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the values.
    #[must_use]
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let average = if count == 0 { 0.0 } else { sum as f64 / count as f64 };
        StatisticsSnapshot {
            count,
            sum,
            min: if count == 0 { 0 } else { min },
            max: self.max.load(Ordering::Relaxed),
            average,
        }
    }
}

impl StatisticsSink for Statistics {
    fn add_value(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }
}

/// Serializable copy of a [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// Number of samples.
    pub count: u64,
    /// Sum of samples.
    pub sum: u64,
    /// Smallest sample, 0 when empty.
    pub min: u64,
    /// Largest sample.
    pub max: u64,
    /// Mean sample.
    pub average: f64,
}

/// Statistics kept per pipe.
#[derive(Debug)]
pub struct PipeStatistics {
    /// Execution duration in milliseconds.
    pub duration: Arc<Statistics>,
    /// Throttle wait in milliseconds.
    pub wait: Arc<Statistics>,
    /// Input size in bytes.
    pub size_in: Arc<Statistics>,
    /// Output size in bytes.
    pub size_out: Arc<Statistics>,
}

impl PipeStatistics {
    fn new(pipe: &str) -> Self {
        Self {
            duration: Arc::new(Statistics::new(format!("{pipe}.duration"))),
            wait: Arc::new(Statistics::new(format!("{pipe}.wait"))),
            size_in: Arc::new(Statistics::new(format!("{pipe}.size_in"))),
            size_out: Arc::new(Statistics::new(format!("{pipe}.size_out"))),
        }
    }
}

/// All statistics of one pipeline.
#[derive(Debug)]
pub struct PipeLineStatistics {
    /// Whole-run duration in milliseconds.
    pub duration: Arc<Statistics>,
    /// Whole-run throttle wait in milliseconds.
    pub wait: Arc<Statistics>,
    /// Input message size in bytes.
    pub size: Arc<Statistics>,
    pipes: DashMap<String, Arc<PipeStatistics>>,
}

impl PipeLineStatistics {
    /// Creates empty statistics for a pipeline.
    #[must_use]
    pub fn new(pipeline: &str) -> Self {
        Self {
            duration: Arc::new(Statistics::new(format!("{pipeline}.duration"))),
            wait: Arc::new(Statistics::new(format!("{pipeline}.wait"))),
            size: Arc::new(Statistics::new(format!("{pipeline}.size"))),
            pipes: DashMap::new(),
        }
    }

    /// Returns the statistics of a pipe, creating them on first use.
    #[must_use]
    pub fn pipe(&self, name: &str) -> Arc<PipeStatistics> {
        if let Some(existing) = self.pipes.get(name) {
            return existing.clone();
        }
        self.pipes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(PipeStatistics::new(name)))
            .clone()
    }

    /// Serializable copy of everything.
    #[must_use]
    pub fn snapshot(&self) -> PipeLineStatisticsSnapshot {
        let pipes = self
            .pipes
            .iter()
            .map(|entry| {
                let stats = entry.value();
                (
                    entry.key().clone(),
                    PipeStatisticsSnapshot {
                        duration: stats.duration.snapshot(),
                        wait: stats.wait.snapshot(),
                        size_in: stats.size_in.snapshot(),
                        size_out: stats.size_out.snapshot(),
                    },
                )
            })
            .collect();
        PipeLineStatisticsSnapshot {
            duration: self.duration.snapshot(),
            wait: self.wait.snapshot(),
            size: self.size.snapshot(),
            pipes,
        }
    }
}

/// Serializable per-pipe statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeStatisticsSnapshot {
    /// Duration statistics.
    pub duration: StatisticsSnapshot,
    /// Wait statistics.
    pub wait: StatisticsSnapshot,
    /// Input size statistics.
    pub size_in: StatisticsSnapshot,
    /// Output size statistics.
    pub size_out: StatisticsSnapshot,
}

/// Serializable pipeline statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeLineStatisticsSnapshot {
    /// Duration statistics.
    pub duration: StatisticsSnapshot,
    /// Wait statistics.
    pub wait: StatisticsSnapshot,
    /// Size statistics.
    pub size: StatisticsSnapshot,
    /// Per-pipe statistics, by pipe name.
    pub pipes: BTreeMap<String, PipeStatisticsSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let s = Statistics::new("x").snapshot();
        assert_eq!(s.count, 0);
        assert_eq!(s.min, 0);
        assert!(s.average.abs() < f64::EPSILON);
    }

    #[test]
    fn test_accumulates() {
        let stats = Statistics::new("x");
        for v in [5, 1, 9] {
            stats.add_value(v);
        }
        let s = stats.snapshot();
        assert_eq!((s.count, s.sum, s.min, s.max), (3, 15, 1, 9));
        assert!((s.average - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(Statistics::new("x"));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for v in 1..=1000 {
                        stats.add_value(v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = stats.snapshot();
        assert_eq!(s.count, 8000);
        assert_eq!(s.sum, 8 * 500_500);
        assert_eq!(s.min, 1);
        assert_eq!(s.max, 1000);
    }

    #[test]
    fn test_pipeline_statistics_per_pipe() {
        let stats = PipeLineStatistics::new("orders");
        stats.pipe("validate").duration.add_value(3);
        stats.pipe("validate").duration.add_value(5);
        stats.pipe("store").size_in.add_value(100);

        let snap = stats.snapshot();
        assert_eq!(snap.pipes["validate"].duration.count, 2);
        assert_eq!(snap.pipes["store"].size_in.max, 100);
        assert!(serde_json::to_string(&snap).is_ok());
    }
}
