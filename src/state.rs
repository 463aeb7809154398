//! # Application State Management
//!
//! Shared state handed to every request handler through `web::Data`. The
//! acquisition engine (controller + subscriber registry) is constructed
//! exactly once at process start and injected here; nothing in the
//! application reaches it through globals.
//!
//! ## Locking:
//! - `config` and `metrics` sit behind `Arc<RwLock<_>>`: many readers, one
//!   writer, locks held only long enough to copy data out.
//! - The controller and registry do their own internal synchronization.

use crate::acquisition::controller::AcquisitionController;
use crate::acquisition::source::default_source_factory;
use crate::broadcast::SubscriberRegistry;
use crate::config::AppConfig;
use crate::recording::CsvExporter;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request metrics (updated by middleware on every request)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// The acquisition state machine and producer task owner
    pub controller: Arc<AcquisitionController>,

    /// Live set of data-plane subscribers
    pub registry: Arc<SubscriberRegistry>,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Detailed metrics for each API endpoint (method + path)
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the application state, wiring the acquisition engine together.
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let exporter = CsvExporter::new(config.export.directory.clone());
        let controller = Arc::new(AcquisitionController::new(
            Arc::clone(&registry),
            exporter,
            default_source_factory(),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            controller,
            registry,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately; AppConfig is cheap to
    /// clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones so the lock is not held while the HTTP response serializes.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
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

    #[test]
    fn test_update_config_validates() {
        let state = AppState::new(AppConfig::default());

        let mut bad = state.get_config();
        bad.acquisition.packet_size = 2048;
        assert!(state.update_config(bad).is_err());

        // The stored config is untouched after a rejected update.
        assert_eq!(state.get_config().acquisition.packet_size, 100);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = AppState::new(AppConfig::default());

        state.record_endpoint_request("POST /start", 12, false);
        state.record_endpoint_request("POST /start", 8, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /start"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.error_count, 1);
        assert_eq!(metric.average_duration_ms(), 10.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}
