use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::debug;

/// Fetch metrics collector, shared by every task of an engine
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Tabs navigated to a task url
    pub navigates: usize,

    /// Explicit cancel requests made through the engine
    pub cancels: usize,

    /// Scripts evaluated on pages
    pub js_evaluates: usize,

    /// Polling rounds spent waiting for required elements
    pub js_waits: usize,

    /// Finished fetch attempts
    pub total_fetches: usize,

    pub successful_fetches: usize,

    pub failed_fetches: usize,

    /// Drivers retired after an unrecoverable failure
    pub retired_drivers: usize,

    /// Fetch durations per status name
    pub fetch_durations: HashMap<String, DurationStats>,

    /// Bytes of page content kept
    pub bytes_fetched: usize,

    /// Counts per status name, e.g. "Success/OK"
    pub status_counts: HashMap<String, usize>,
}

/// Running duration aggregate, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl DurationStats {
    fn record(&mut self, duration_ms: u64) {
        self.count += 1;
        self.total_ms = self.total_ms.saturating_add(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
    }

    pub fn mean_ms(&self) -> u64 {
        if self.count == 0 { 0 } else { self.total_ms / self.count }
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    pub async fn record_navigate(&self) {
        self.metrics.lock().await.navigates += 1;
    }

    pub async fn record_cancel(&self) {
        self.metrics.lock().await.cancels += 1;
    }

    pub async fn record_js_evaluate(&self) {
        self.metrics.lock().await.js_evaluates += 1;
    }

    pub async fn record_js_wait(&self) {
        self.metrics.lock().await.js_waits += 1;
    }

    pub async fn record_retired_driver(&self) {
        self.metrics.lock().await.retired_drivers += 1;
    }

    /// Record a finished fetch attempt
    pub async fn record_fetch(&self, url: &str, success: bool, status_name: String, duration_ms: u64, bytes: usize) {
        let mut metrics = self.metrics.lock().await;

        metrics.total_fetches += 1;
        if success {
            metrics.successful_fetches += 1;
        } else {
            metrics.failed_fetches += 1;
        }

        metrics.bytes_fetched += bytes;

        debug!("Fetched {} as {} in {}ms", url, status_name, duration_ms);
        metrics.fetch_durations
            .entry(status_name.clone())
            .or_default()
            .record(duration_ms);

        *metrics.status_counts.entry(status_name).or_default() += 1;
    }

    /// Start timing a fetch
    pub fn start_timer(&self) -> FetchTimer {
        FetchTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring fetch durations
pub struct FetchTimer {
    /// Start time of the fetch
    start: Instant,
}

impl FetchTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_fetch() {
        let collector = MetricsCollector::new();
        collector.record_navigate().await;
        collector.record_fetch("https://a.com", true, "Success/OK".to_string(), 120, 2048).await;
        collector.record_fetch("https://a.com", false, "Failed/Retry".to_string(), 80, 0).await;
        collector.record_cancel().await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.navigates, 1);
        assert_eq!(metrics.total_fetches, 2);
        assert_eq!(metrics.successful_fetches, 1);
        assert_eq!(metrics.failed_fetches, 1);
        assert_eq!(metrics.cancels, 1);
        assert_eq!(metrics.bytes_fetched, 2048);
        assert_eq!(metrics.fetch_durations["Success/OK"], DurationStats { count: 1, total_ms: 120, max_ms: 120 });
        assert_eq!(metrics.status_counts["Success/OK"], 1);
    }

    #[tokio::test]
    async fn test_durations_stay_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..1000u64 {
            let url = format!("https://a.com/{}", i);
            collector.record_fetch(&url, false, "Failed/Retry".to_string(), i, 0).await;
        }

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.fetch_durations.len(), 1);

        let stats = metrics.fetch_durations["Failed/Retry"];
        assert_eq!(stats.count, 1000);
        assert_eq!(stats.max_ms, 999);
        assert_eq!(stats.mean_ms(), 499);
    }
}
