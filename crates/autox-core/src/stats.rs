use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Response latency counters recorded under one prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
    pub count: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
}

/// Thread-safe counters keyed by name, e.g. `autox/total/pages/count`.
#[derive(Debug, Default)]
pub struct StatsCollector {
    values: Mutex<HashMap<String, u64>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.values.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned stats lock");
            poisoned.into_inner()
        })
    }

    pub fn inc_value(&self, key: &str) {
        self.inc_by(key, 1);
    }

    pub fn inc_by(&self, key: &str, count: u64) {
        let mut values = self.lock_inner();
        match values.get_mut(key) {
            Some(value) => *value += count,
            None => {
                values.insert(key.to_string(), count);
            }
        }
    }

    /// Record one API response latency under `prefix`.
    ///
    /// Updates `response_count`, `response_total_latency_ms`,
    /// `response_max_latency_ms` and `response_avg_latency_ms` together.
    pub fn record_latency(&self, prefix: &str, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut values = self.lock_inner();

        let count = values.entry(format!("{prefix}/response_count")).or_insert(0);
        *count += 1;
        let count = *count;
        let total = values
            .entry(format!("{prefix}/response_total_latency_ms"))
            .or_insert(0);
        *total = total.saturating_add(ms);
        let avg = *total / count;
        let max = values
            .entry(format!("{prefix}/response_max_latency_ms"))
            .or_insert(0);
        *max = (*max).max(ms);
        values.insert(format!("{prefix}/response_avg_latency_ms"), avg);
    }

    /// Latency counters under `prefix`, if any response was recorded.
    pub fn latency_summary(&self, prefix: &str) -> Option<LatencySummary> {
        let values = self.lock_inner();
        let get = |name: &str| values.get(&format!("{prefix}/{name}")).copied();
        Some(LatencySummary {
            count: get("response_count")?,
            avg_ms: get("response_avg_latency_ms").unwrap_or(0),
            max_ms: get("response_max_latency_ms").unwrap_or(0),
        })
    }

    /// Current value of `key`, or `None` if it was never incremented.
    pub fn get_value(&self, key: &str) -> Option<u64> {
        self.lock_inner().get(key).copied()
    }

    /// All counters, sorted by key.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.lock_inner()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}
