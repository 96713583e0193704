/*!
 * Explicit metrics sink.
 *
 * A `Metrics` object is handed to the dispatcher and the batch translator.
 * All methods default to no-ops so sinks only implement what they record.
 */

use std::collections::BTreeMap;

use parking_lot::Mutex;

pub trait Metrics: Send + Sync {
    fn provider_attempt(&self, _provider: &str, _model: &str) {}

    fn provider_success(&self, _provider: &str, _model: &str) {}

    fn provider_failure(&self, _provider: &str, _kind: &str) {}

    fn cache_hit(&self) {}

    fn cache_miss(&self) {}

    fn blocks_failed(&self, _count: usize) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

/// Totals collected by `CountingMetrics`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Attempts per provider
    pub attempts: BTreeMap<String, u64>,
    /// Successes per provider
    pub successes: BTreeMap<String, u64>,
    /// Failures per (provider, error kind)
    pub failures: BTreeMap<(String, String), u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failed_blocks: u64,
}

impl MetricsSnapshot {
    pub fn attempts_for(&self, provider: &str) -> u64 {
        self.attempts.get(provider).copied().unwrap_or(0)
    }

    pub fn total_attempts(&self) -> u64 {
        self.attempts.values().sum()
    }
}

/// In-memory counters, used by tests and the run summary
#[derive(Debug, Default)]
pub struct CountingMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }
}

impl Metrics for CountingMetrics {
    fn provider_attempt(&self, provider: &str, _model: &str) {
        *self.inner.lock().attempts.entry(provider.to_string()).or_insert(0) += 1;
    }

    fn provider_success(&self, provider: &str, _model: &str) {
        *self.inner.lock().successes.entry(provider.to_string()).or_insert(0) += 1;
    }

    fn provider_failure(&self, provider: &str, kind: &str) {
        *self
            .inner
            .lock()
            .failures
            .entry((provider.to_string(), kind.to_string()))
            .or_insert(0) += 1;
    }

    fn cache_hit(&self) {
        self.inner.lock().cache_hits += 1;
    }

    fn cache_miss(&self) {
        self.inner.lock().cache_misses += 1;
    }

    fn blocks_failed(&self, count: usize) {
        self.inner.lock().failed_blocks += count as u64;
    }
}
