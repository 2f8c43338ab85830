/// Per-source request metrics
///
/// Recorded by the orchestrator around every provider call so the
/// aggregate endpoints stay diagnosable even though provider faults never
/// surface to callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub source_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub deadline_misses: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub average_response_time_ms: f64,
    total_response_time_ms: u64,
}

impl SourceMetrics {
    fn new(source_id: &str) -> Self {
        SourceMetrics {
            source_id: source_id.to_string(),
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            deadline_misses: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
            average_response_time_ms: 0.0,
            total_response_time_ms: 0,
        }
    }

    #[allow(dead_code)]
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    fn record_success(&mut self, response_time: Duration) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_success = Some(Utc::now());

        self.total_response_time_ms += response_time.as_millis() as u64;
        self.average_response_time_ms =
            self.total_response_time_ms as f64 / self.successful_requests as f64;
    }

    fn record_failure(&mut self, error: String) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error);
    }
}

/// Shared tracker, one entry per source id
#[derive(Clone)]
pub struct MetricsTracker {
    metrics: Arc<Mutex<HashMap<String, SourceMetrics>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        MetricsTracker {
            metrics: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn record_success(&self, source_id: &str, response_time: Duration) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics
            .entry(source_id.to_string())
            .or_insert_with(|| SourceMetrics::new(source_id))
            .record_success(response_time);
    }

    pub fn record_failure(&self, source_id: &str, error: String) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics
            .entry(source_id.to_string())
            .or_insert_with(|| SourceMetrics::new(source_id))
            .record_failure(error);
    }

    /// A provider call was abandoned because its fan-out round hit a deadline
    pub fn record_deadline_miss(&self, source_id: &str) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics
            .entry(source_id.to_string())
            .or_insert_with(|| SourceMetrics::new(source_id))
            .deadline_misses += 1;
    }

    #[allow(dead_code)]
    pub fn get(&self, source_id: &str) -> Option<SourceMetrics> {
        self.metrics.lock().unwrap().get(source_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<SourceMetrics> {
        let metrics = self.metrics.lock().unwrap();
        let mut all: Vec<SourceMetrics> = metrics.values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        all
    }

    /// Teardown hook for tests
    #[allow(dead_code)]
    pub fn reset(&self) {
        self.metrics.lock().unwrap().clear();
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let tracker = MetricsTracker::new();
        tracker.record_success("a", Duration::from_millis(100));
        tracker.record_success("a", Duration::from_millis(200));
        tracker.record_failure("a", "boom".to_string());

        let m = tracker.get("a").unwrap();
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.successful_requests, 2);
        assert_eq!(m.failed_requests, 1);
        assert!((m.success_rate() - 66.66).abs() < 0.1);
        assert!((m.average_response_time_ms - 150.0).abs() < f64::EPSILON);
        assert_eq!(m.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_deadline_miss_does_not_count_as_request() {
        let tracker = MetricsTracker::new();
        tracker.record_deadline_miss("slow");
        let m = tracker.get("slow").unwrap();
        assert_eq!(m.deadline_misses, 1);
        assert_eq!(m.total_requests, 0);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let tracker = MetricsTracker::new();
        tracker.record_success("b", Duration::from_millis(10));
        tracker.record_success("a", Duration::from_millis(10));
        let ids: Vec<String> = tracker.snapshot().into_iter().map(|m| m.source_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
