//! Load-time and cache-hit metrics.
//!
//! Append-only log of playback-ready events with summary statistics and a plain-text
//! report. Every aggregate is 0 on an empty collector.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::debug;

/// One playback-ready observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMetric {
    pub position: usize,
    pub load_time_ms: u64,
    pub was_cache_hit: bool,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub avg_load_ms: f64,
    /// Fraction of loads served from cache, `0.0..=1.0`.
    pub hit_rate: f64,
    pub avg_hit_ms: f64,
    pub avg_miss_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &[LoadMetric]) -> Self {
        if metrics.is_empty() {
            return Self::default();
        }
        let mean = |values: &mut dyn Iterator<Item = u64>| -> (usize, f64) {
            let (n, sum) = values.fold((0usize, 0u64), |(n, sum), v| (n + 1, sum + v));
            if n == 0 { (0, 0.0) } else { (n, sum as f64 / n as f64) }
        };

        let (count, avg_load_ms) = mean(&mut metrics.iter().map(|m| m.load_time_ms));
        let (hit_count, avg_hit_ms) = mean(
            &mut metrics
                .iter()
                .filter(|m| m.was_cache_hit)
                .map(|m| m.load_time_ms),
        );
        let (miss_count, avg_miss_ms) = mean(
            &mut metrics
                .iter()
                .filter(|m| !m.was_cache_hit)
                .map(|m| m.load_time_ms),
        );

        Self {
            count,
            hit_count,
            miss_count,
            avg_load_ms,
            hit_rate: hit_count as f64 / count as f64,
            avg_hit_ms,
            avg_miss_ms,
            min_ms: metrics.iter().map(|m| m.load_time_ms).min().unwrap_or(0),
            max_ms: metrics.iter().map(|m| m.load_time_ms).max().unwrap_or(0),
        }
    }

    pub fn hit_rate_percent(&self) -> f64 {
        self.hit_rate * 100.0
    }
}

/// Rendered by [`MetricsCollector::report`].
#[derive(Debug, Clone)]
pub struct MetricsReport {
    pub prefetch_enabled: bool,
    pub elapsed: Duration,
    pub summary: MetricsSummary,
    pub metrics: Vec<LoadMetric>,
}

const RULE: &str = "========================================";
const THIN_RULE: &str = "----------------------------------------";

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "{RULE}")?;
        writeln!(f, "feed cache performance report")?;
        writeln!(f, "{RULE}")?;
        writeln!(
            f,
            "prefetch: {}",
            if self.prefetch_enabled { "enabled" } else { "disabled" }
        )?;
        writeln!(f, "session duration: {}s", self.elapsed.as_secs())?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "playback:")?;
        writeln!(f, "  total loads: {}", s.count)?;
        writeln!(f, "  avg load: {:.1}ms", s.avg_load_ms)?;
        writeln!(f, "  fastest: {}ms", s.min_ms)?;
        writeln!(f, "  slowest: {}ms", s.max_ms)?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "cache:")?;
        writeln!(f, "  hit rate: {:.1}%", s.hit_rate_percent())?;
        writeln!(f, "  hits: {}", s.hit_count)?;
        writeln!(f, "  misses: {}", s.miss_count)?;
        writeln!(f, "  avg hit load: {:.1}ms", s.avg_hit_ms)?;
        writeln!(f, "  avg miss load: {:.1}ms", s.avg_miss_ms)?;
        writeln!(f, "{THIN_RULE}")?;
        writeln!(f, "details:")?;
        if self.metrics.is_empty() {
            writeln!(f, "  no data")?;
        }
        for m in &self.metrics {
            writeln!(
                f,
                "  video#{}: {}ms ({})",
                m.position,
                m.load_time_ms,
                if m.was_cache_hit { "cache" } else { "network" }
            )?;
        }
        write!(f, "{RULE}")
    }
}

/// Thread-safe collector; share it as `Arc<MetricsCollector>`.
#[derive(Debug)]
pub struct MetricsCollector {
    started: Instant,
    prefetch_enabled: Mutex<bool>,
    metrics: Mutex<Vec<LoadMetric>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MetricsCollector {
    pub fn new(prefetch_enabled: bool) -> Self {
        Self {
            started: Instant::now(),
            prefetch_enabled: Mutex::new(prefetch_enabled),
            metrics: Mutex::new(Vec::new()),
        }
    }

    pub fn set_prefetch_enabled(&self, enabled: bool) {
        *self.prefetch_enabled.lock() = enabled;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record(&self, position: usize, load_time_ms: u64, was_cache_hit: bool) -> LoadMetric {
        let metric = LoadMetric {
            position,
            load_time_ms,
            was_cache_hit,
            timestamp: SystemTime::now(),
        };
        let summary = {
            let mut metrics = self.metrics.lock();
            metrics.push(metric.clone());
            MetricsSummary::from_metrics(&metrics)
        };
        debug!(
            position,
            load_time_ms,
            hit = was_cache_hit,
            count = summary.count,
            avg_ms = summary.avg_load_ms,
            hit_rate = summary.hit_rate,
            "metrics: load recorded"
        );
        metric
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> Vec<LoadMetric> {
        self.metrics.lock().clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(&self.metrics.lock())
    }

    pub fn snapshot(&self) -> MetricsReport {
        let metrics = self.metrics();
        MetricsReport {
            prefetch_enabled: *self.prefetch_enabled.lock(),
            elapsed: self.elapsed(),
            summary: MetricsSummary::from_metrics(&metrics),
            metrics,
        }
    }

    pub fn report(&self) -> String {
        self.snapshot().to_string()
    }

    /// Drop all recorded metrics.
    pub fn release(&self) {
        self.metrics.lock().clear();
    }
}
