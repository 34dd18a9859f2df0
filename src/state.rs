//! # Application State
//!
//! State shared by every HTTP handler and WebSocket session.
//!
//! ## Contents:
//! - **config**: the effective configuration, fixed after startup
//! - **registry**: keyword discovery, read-only and rescanned per call
//! - **detectors**: the detector factory for the configured backend
//! - **metrics**: request, session and detection counters behind an `RwLock`
//!
//! `AppState` is cheap to clone: every field is behind an `Arc` (or `Copy`),
//! so actix can hand a copy to each worker.

use crate::config::AppConfig;
use crate::wake::detector::{factory_for, DetectorFactory};
use crate::wake::registry::KeywordRegistry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<KeywordRegistry>,
    pub detectors: Arc<dyn DetectorFactory>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// HTTP requests processed (WebSocket upgrades included)
    pub request_count: u64,

    /// HTTP requests answered with a 4xx/5xx status
    pub error_count: u64,

    /// WebSocket sessions currently open
    pub active_sessions: u32,

    /// WebSocket sessions accepted since start
    pub sessions_opened: u64,

    /// Detection events sent to clients
    pub detections: u64,

    /// Windows handed to detectors
    pub windows_scored: u64,

    /// Key: `"<METHOD> <path>"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build shared state, failing when the settings table or the detector
    /// backend cannot be set up.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let registry = KeywordRegistry::from_config(&config)?;
        let detectors = factory_for(&config.detection)?;
        Ok(Self::with_parts(config, registry, detectors))
    }

    pub fn with_parts(
        config: AppConfig,
        registry: KeywordRegistry,
        detectors: Arc<dyn DetectorFactory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            detectors,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Claim a session slot. Returns `false` when the server is full.
    pub fn try_open_session(&self) -> bool {
        let limit = self.config.performance.max_concurrent_sessions;
        let mut metrics = self.metrics_write();
        if metrics.active_sessions as usize >= limit {
            return false;
        }
        metrics.active_sessions += 1;
        metrics.sessions_opened += 1;
        true
    }

    /// Release a slot claimed by `try_open_session`.
    pub fn close_session(&self) {
        let mut metrics = self.metrics_write();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_detections(&self, count: u64) {
        self.metrics_write().detections += count;
    }

    pub fn record_windows_scored(&self, count: u64) {
        self.metrics_write().windows_scored += count;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Number of keywords a client could select right now.
    pub fn installed_keywords(&self) -> usize {
        self.registry.discover().len()
    }
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
