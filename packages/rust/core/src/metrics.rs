//! Thread-safe pipeline counters, latency averages, and the recent-error ring.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use curator_shared::Record;

/// Capacity of [`MetricsSnapshot::recent_errors`].
pub const MAX_RECENT_ERRORS: usize = 100;

/// Cumulative moving average of a latency, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingAverage {
    pub mean_ms: f64,
    pub samples: u64,
}

impl RollingAverage {
    pub fn record(&mut self, elapsed: Duration) {
        let value = elapsed.as_secs_f64() * 1000.0;
        self.samples += 1;
        self.mean_ms += (value - self.mean_ms) / self.samples as f64;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    /// Where it happened: a source name, `syntax`, `sink`, `snapshot`, ...
    pub context: String,
    pub message: String,
}

/// Point-in-time copy of all pipeline metrics. Counters only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_fetched: u64,
    pub total_validated: u64,
    pub total_rejected: u64,
    pub total_duplicates: u64,
    pub total_integrated: u64,
    /// Items dropped because a queue stayed full past the enqueue timeout.
    pub total_dropped: u64,
    pub total_errors: u64,
    pub runs_started: u64,

    pub by_source: BTreeMap<String, u64>,
    pub by_language: BTreeMap<String, u64>,
    pub by_tier: BTreeMap<String, u64>,

    pub fetch_latency: RollingAverage,
    pub validation_latency: RollingAverage,
    pub integration_latency: RollingAverage,
    /// Mean quality score over the record cache at the last refresh.
    pub average_quality: f64,

    pub recent_errors: VecDeque<ErrorEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Single coarse lock over a [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.lock().clone()
    }

    /// Replace all metrics, e.g. after loading a snapshot.
    pub fn restore(&self, metrics: MetricsSnapshot) {
        *self.lock() = metrics;
    }

    pub fn record_run_started(&self) {
        self.update(|m| {
            m.runs_started += 1;
            m.last_run_started_at = Some(Utc::now());
        });
    }

    pub fn record_fetch_latency(&self, elapsed: Duration) {
        self.update(|m| m.fetch_latency.record(elapsed));
    }

    pub fn record_fetched(&self) {
        self.update(|m| m.total_fetched += 1);
    }

    pub fn record_validated(&self) {
        self.update(|m| m.total_validated += 1);
    }

    pub fn record_rejected(&self) {
        self.update(|m| m.total_rejected += 1);
    }

    pub fn record_duplicate(&self) {
        self.update(|m| m.total_duplicates += 1);
    }

    pub fn record_dropped(&self) {
        self.update(|m| m.total_dropped += 1);
    }

    /// Items discarded in bulk, such as those still queued at shutdown.
    pub fn record_dropped_many(&self, count: usize) {
        if count > 0 {
            self.update(|m| m.total_dropped += count as u64);
        }
    }

    pub fn record_validation_latency(&self, elapsed: Duration) {
        self.update(|m| m.validation_latency.record(elapsed));
    }

    pub fn record_integrated(&self, record: &Record, elapsed: Duration) {
        self.update(|m| {
            m.total_integrated += 1;
            *m.by_source.entry(record.metadata.source.clone()).or_default() += 1;
            *m.by_language
                .entry(record.metadata.language.clone())
                .or_default() += 1;
            *m.by_tier
                .entry(record.metadata.quality_tier.as_str().to_string())
                .or_default() += 1;
            m.integration_latency.record(elapsed);
        });
    }

    pub fn record_error(&self, context: &str, message: &str) {
        self.update(|m| {
            m.total_errors += 1;
            if m.recent_errors.len() == MAX_RECENT_ERRORS {
                m.recent_errors.pop_front();
            }
            m.recent_errors.push_back(ErrorEntry {
                timestamp: Utc::now(),
                context: context.to_string(),
                message: message.to_string(),
            });
        });
    }

    /// Derived value; does not count as an update.
    pub fn set_average_quality(&self, average: f64) {
        self.lock().average_quality = average;
    }

    fn update(&self, f: impl FnOnce(&mut MetricsSnapshot)) {
        let mut metrics = self.lock();
        f(&mut metrics);
        metrics.last_updated = Some(Utc::now());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
