//! # Application State Management
//!
//! Shared state accessed by HTTP handlers and call actors simultaneously.
//!
//! ## Thread Safety Pattern:
//! All mutable data lives behind `Arc<RwLock<T>>`: many readers or one
//! writer at a time, no data races. Per-call state is *not* here; each
//! `CallSession` is owned by its actor and mutated only from the actor's
//! mailbox. What is shared process-wide:
//!
//! - the configuration (readable by every handler),
//! - the bridge metrics (updated by middleware and call actors),
//! - the session registry (insert/remove/lookup keyed by session id),
//! - one reqwest client, reused for every negotiation call.
//!
//! The registry being owned here (rather than a global `Map`) means the
//! process lifecycle owns it, and tests can construct an isolated one.

use crate::bridge::session::SessionRegistry;
use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers and
/// call actors.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (read-mostly)
    pub config: Arc<RwLock<AppConfig>>,

    /// Bridge and HTTP metrics (constantly updated)
    pub metrics: Arc<RwLock<BridgeMetrics>>,

    /// Active call sessions keyed by backend session id
    pub registry: Arc<SessionRegistry>,

    /// HTTP client for session negotiation (connection pooling across calls)
    pub http_client: reqwest::Client,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and call sessions.
///
/// ## Failure accounting:
/// Setup failures (the caller never got a working translation session) and
/// mid-call failures (the caller was connected and lost translation) are
/// counted separately; they are operationally very different events.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Current number of open caller-leg WebSocket connections
    pub active_connections: u32,

    /// Call sessions that completed setup (negotiated + connected + configured)
    pub sessions_started: u64,

    /// Negotiation or backend-connect failures before a session existed
    pub setup_failures: u64,

    /// Sessions lost after setup (either leg closed or errored mid-call)
    pub midcall_failures: u64,

    /// Audio frames relayed caller → backend (lifetime total)
    pub frames_from_caller: u64,

    /// Audio frames relayed backend → caller (lifetime total)
    pub frames_to_caller: u64,

    /// Frames dropped by the readiness gate or queue bound (lifetime total)
    pub frames_dropped: u64,

    /// Detailed metrics for each API endpoint
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session.max_concurrent_sessions));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(BridgeMetrics::default())),
            registry,
            http_client: reqwest::Client::new(),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so other threads aren't
    /// blocked; AppConfig is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint (called by middleware).
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

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

    /// A caller-leg WebSocket connected.
    pub fn increment_active_connections(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_connections += 1;
    }

    /// A caller-leg WebSocket disconnected. Guards against underflow so a
    /// double-decrement bug can never panic the counter.
    pub fn decrement_active_connections(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_connections > 0 {
            metrics.active_connections -= 1;
        }
    }

    /// A call session completed the readiness handshake.
    pub fn record_session_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.sessions_started += 1;
    }

    /// Negotiation or backend connect failed before a session existed.
    pub fn record_setup_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.setup_failures += 1;
    }

    /// A session was lost after setup (either leg closed mid-call).
    pub fn record_midcall_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.midcall_failures += 1;
    }

    /// Fold a finished call's frame counters into the lifetime totals.
    pub fn record_session_frames(&self, from_caller: u64, to_caller: u64, dropped: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_from_caller += from_caller;
        metrics.frames_to_caller += to_caller;
        metrics.frames_dropped += dropped;
    }

    /// Get a consistent snapshot of current metrics for the HTTP surface.
    pub fn get_metrics_snapshot(&self) -> BridgeMetrics {
        let metrics = self.metrics.read().unwrap();
        BridgeMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_connections: metrics.active_connections,
            sessions_started: metrics.sessions_started,
            setup_failures: metrics.setup_failures,
            midcall_failures: metrics.midcall_failures,
            frames_from_caller: metrics.frames_from_caller,
            frames_to_caller: metrics.frames_to_caller,
            frames_dropped: metrics.frames_dropped,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
