//! # Application State
//!
//! Shared state handed to every handler through `web::Data<AppState>`.
//!
//! ## Contents:
//! - **config**: read-only after startup
//! - **models**: the [`ModelManager`], owner of the engine handle and its lock
//! - **diarizer**: external speaker diarization
//! - **metrics**: per-endpoint HTTP counters, updated by `MetricsMiddleware`
//! - **jobs**: transcription outcome counters, updated from engine threads
//!
//! HTTP metrics sit behind a `RwLock` because the endpoint map grows. Job counters are plain
//! atomics since they are bumped from blocking threads that never touch the request path.

use crate::config::AppConfig;
use crate::diarization::Diarizer;
use crate::transcription::ModelManager;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub models: Arc<ModelManager>,
    pub diarizer: Arc<dyn Diarizer>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub jobs: Arc<JobCounters>,
    /// When the server started
    pub start_time: Instant,
}

/// HTTP request metrics.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Keyed by `"<METHOD> <route pattern>"`, e.g. `"POST /v1/audio/transcriptions"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

/// Outcome counters for transcription jobs.
#[derive(Debug, Default)]
pub struct JobCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
    rejected_busy: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCountersSnapshot {
    pub completed: u64,
    pub failed: u64,
    pub aborted: u64,
    pub rejected_busy: u64,
}

impl JobCounters {
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_busy(&self) {
        self.rejected_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobCountersSnapshot {
        JobCountersSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig, models: Arc<ModelManager>, diarizer: Arc<dyn Diarizer>) -> Self {
        Self {
            config: Arc::new(config),
            models,
            diarizer,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            jobs: Arc::new(JobCounters::default()),
            start_time: Instant::now(),
        }
    }

    // A panic while holding the metrics lock leaves counters that are still usable.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record one finished request for `endpoint`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the metrics, so no lock is held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// State wired to scripted engine and diarizer doubles, for handler tests.
#[cfg(test)]
pub fn test_state(
    loader: crate::transcription::engine::ScriptedLoader,
    diarizer: crate::diarization::FixedDiarizer,
) -> AppState {
    AppState::new(
        AppConfig::default(),
        Arc::new(ModelManager::new(Arc::new(loader))),
        Arc::new(diarizer),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let metric = EndpointMetric {
            request_count: 4,
            total_duration_ms: 100,
            error_count: 1,
        };
        assert_eq!(metric.average_duration_ms(), 25.0);
        assert_eq!(metric.error_rate(), 0.25);
        assert_eq!(EndpointMetric::default().average_duration_ms(), 0.0);
    }

    #[test]
    fn test_job_counters_snapshot() {
        let counters = JobCounters::default();
        counters.record_completed();
        counters.record_completed();
        counters.record_rejected_busy();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.rejected_busy, 1);
        assert_eq!(snapshot.failed + snapshot.aborted, 0);
    }
}
