//! # Application State Management
//!
//! Shared state that every HTTP request handler can reach through
//! `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Lets every actix worker share one configuration, one model
//!   registry and one metrics store
//! - **Memory safety**: The data is freed when the last worker drops its clone
//!
//! ### What is (and is not) behind a lock
//! - **config / registry**: built once in `main`, never mutated afterwards, so
//!   a plain `Arc` is enough. Readers never wait on each other.
//! - **metrics**: updated by every request, so it sits behind `RwLock`
//!
//! ### Poisoned locks
//! A panic while holding the metrics lock would poison it. Counters are
//! still meaningful after that, so the lock is recovered with `into_inner`
//! instead of taking the whole server down.

use crate::config::AppConfig;
use crate::transcription::registry::ModelRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Startup configuration (read-only after `main` builds it)
    pub config: Arc<AppConfig>,

    /// Loaded models, keyed by the name clients send
    pub registry: Arc<ModelRegistry>,

    /// Request metrics, updated by `MetricsMiddleware`
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since server start
    pub error_count: u64,

    /// Transcriptions currently running
    pub active_transcriptions: u32,

    /// Per-endpoint statistics, keyed like "POST /v1/audio/transcriptions"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    /// Cumulative processing time in milliseconds
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create the shared state from a validated configuration and loaded models.
    pub fn new(config: AppConfig, registry: ModelRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Count one request (called by the metrics middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Count one failed request (any 4xx or 5xx status).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record timing and outcome for one endpoint.
    ///
    /// The first request to an endpoint creates its entry with `or_default()`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Mark a transcription as started. The returned guard marks it finished on drop.
    pub fn track_transcription(&self) -> ActiveTranscription {
        self.metrics_write().active_transcriptions += 1;
        ActiveTranscription {
            metrics: self.metrics.clone(),
        }
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Decrements `active_transcriptions` when dropped.
#[derive(Debug)]
pub struct ActiveTranscription {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveTranscription {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(|e| e.into_inner());
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds (0.0 before the first request).
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), ModelRegistry::default())
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = state();
        state.record_endpoint_request("GET /v1/models", 10, false);
        state.record_endpoint_request("GET /v1/models", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /v1/models"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_counters() {
        let state = state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_active_transcription_guard() {
        let state = state();
        let first = state.track_transcription();
        let second = state.track_transcription();
        assert_eq!(state.get_metrics_snapshot().active_transcriptions, 2);

        drop(first);
        drop(second);
        assert_eq!(state.get_metrics_snapshot().active_transcriptions, 0);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }
}
