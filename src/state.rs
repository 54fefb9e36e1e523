//! # Application State
//!
//! Shared by every HTTP handler and every live socket actor. actix clones
//! `web::Data<AppState>` per worker, so everything mutable sits behind
//! `Arc<RwLock<_>>` and everything else is cheap to clone.
//!
//! ## Contents:
//! - **config**: runtime-updatable settings (`PUT /api/v1/config`)
//! - **metrics**: per-endpoint request counters fed by the metrics middleware
//! - **live**: registry of live voice sessions across all sockets
//! - **http**: one pooled HTTP client for every call to the generative API

use crate::config::AppConfig;
use crate::gemini::GeminiClient;
use crate::live::registry::LiveRegistry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub live: Arc<LiveRegistry>,
    pub http: reqwest::Client,
    pub start_time: Instant,
}

/// Request counters since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Live sessions that reached the connecting state
    pub live_sessions_started: u64,
    /// Key: "METHOD /route/pattern"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            live: Arc::new(LiveRegistry::new()),
            http,
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the current configuration. The lock is released on return.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration if it validates.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
        Ok(())
    }

    /// Client for the generative API using the configuration as of now.
    pub fn gemini(&self) -> GeminiClient {
        let config = self.get_config();
        GeminiClient::new(
            self.http.clone(),
            config.gemini,
            Duration::from_secs(config.media.video_poll_interval_secs),
        )
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner).error_count += 1;
    }

    pub fn record_live_session_started(&self) {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner).live_sessions_started += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
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

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
