//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SEARCCH metrics
pub const METRICS_PREFIX: &str = "searcch";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for identity-provider round trips (network bound)
pub const PROVIDER_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
];

/// How a login request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Valid session already existed for the token
    ExistingSession,
    /// New session for a known user
    NewSession,
    /// New user and new session
    NewUser,
    /// Lost the insert race; reused the winner's session
    RaceRecovered,
    Failed,
}

impl LoginOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::ExistingSession => "existing_session",
            LoginOutcome::NewSession => "new_session",
            LoginOutcome::NewUser => "new_user",
            LoginOutcome::RaceRecovered => "race_recovered",
            LoginOutcome::Failed => "failed",
        }
    }
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Login metrics
    describe_counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        Unit::Count,
        "Login attempts by outcome"
    );

    describe_counter!(
        format!("{}_session_races_total", METRICS_PREFIX),
        Unit::Count,
        "Session inserts that hit the token uniqueness constraint"
    );

    describe_histogram!(
        format!("{}_identity_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Identity provider call latency in seconds"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of artifact searches"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Artifact search latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record a login outcome
pub fn record_login(strategy: &str, outcome: LoginOutcome) {
    counter!(
        format!("{}_logins_total", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Helper to record a session insert that collided on its token
pub fn record_session_race(recovered: bool) {
    counter!(
        format!("{}_session_races_total", METRICS_PREFIX),
        "recovered" => recovered.to_string()
    )
    .increment(1);
}

/// Helper to record an identity provider call
pub fn record_identity_request(duration_secs: f64, strategy: &str, endpoint: &str, status: u16) {
    histogram!(
        format!("{}_identity_request_duration_seconds", METRICS_PREFIX),
        "strategy" => strategy.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, ranked: bool, result_count: usize) {
    let mode = if ranked { "ranked" } else { "browse" };

    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "mode" => mode,
        "empty" => (result_count == 0).to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "mode" => mode
    )
    .record(duration_secs);
}
