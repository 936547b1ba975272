//! Demo workload whose per-iteration latency is adjustable over `POST /latency`.
//!
//! Every iteration is observed into the `application_latency` histogram
//! (milliseconds, labelled `component_name="application"`), scraped in
//! Prometheus text format from `GET /metrics`.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use prometheus::{Encoder, Histogram, HistogramOpts, HistogramVec, Registry, TextEncoder};
use rct_core::ShutdownToken;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::Instant;

const COMPONENT: &str = "latency_app";

pub const LATENCY_ENDPOINT: &str = "/latency";
pub const METRICS_ENDPOINT: &str = "/metrics";
pub const DEFAULT_LATENCY: Duration = Duration::from_secs(1);

pub const APPLICATION_LATENCY_METRIC: &str = "application_latency";
const APPLICATION_COMPONENT: &str = "application";
/// Histogram buckets for workload iteration latency (in milliseconds).
pub const LATENCY_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0,
];

const METHOD_NOT_ALLOWED_BODY: &str = "HTTP request method is not allowed.";
const BODY_PARSE_FAILED_BODY: &str = "HTTP request body parsing failed.";
const DURATION_MISSING_BODY: &str = "Duration is not defined.";
const DURATION_PARSE_FAILED_BODY: &str = "Duration parsing failed.";
const LATENCY_CHANGED_BODY: &str = "Latency duration changed.";

#[derive(Debug, Error)]
pub enum LatencyMetricsError {
    #[error("failed to register latency metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to encode latency metrics: {0}")]
    Encoding(String),
}

/// Prometheus registry holding the workload's iteration latency histogram.
#[derive(Clone)]
pub struct LatencyMetrics {
    registry: Registry,
    iteration_latency: Histogram,
}

impl fmt::Debug for LatencyMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyMetrics")
            .field("observed", &self.observed_count())
            .finish_non_exhaustive()
    }
}

impl LatencyMetrics {
    pub fn new() -> Result<Self, LatencyMetricsError> {
        let registry = Registry::new();
        let latency = HistogramVec::new(
            HistogramOpts::new(
                APPLICATION_LATENCY_METRIC,
                "Duration of one workload iteration in milliseconds",
            )
            .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["component_name"],
        )?;
        registry.register(Box::new(latency.clone()))?;
        let iteration_latency = latency.get_metric_with_label_values(&[APPLICATION_COMPONENT])?;
        Ok(Self {
            registry,
            iteration_latency,
        })
    }

    pub fn observe(&self, elapsed: Duration) {
        self.iteration_latency.observe(elapsed.as_secs_f64() * 1_000.0);
    }

    pub fn observed_count(&self) -> u64 {
        self.iteration_latency.get_sample_count()
    }

    pub fn observed_sum_ms(&self) -> f64 {
        self.iteration_latency.get_sample_sum()
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, LatencyMetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|error| LatencyMetricsError::Encoding(error.to_string()))?;
        String::from_utf8(buffer).map_err(|error| LatencyMetricsError::Encoding(error.to_string()))
    }
}

/// Owns the workload's latency and the histogram its iterations feed.
#[derive(Debug)]
pub struct LatencyControl {
    latency: Mutex<Duration>,
    metrics: LatencyMetrics,
}

impl LatencyControl {
    pub fn new(initial: Duration) -> Result<Self, LatencyMetricsError> {
        Ok(Self {
            latency: Mutex::new(initial),
            metrics: LatencyMetrics::new()?,
        })
    }

    pub fn latency(&self) -> Duration {
        *lock(&self.latency)
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn metrics(&self) -> &LatencyMetrics {
        &self.metrics
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Deserialize)]
struct LatencyRequest {
    duration: Option<String>,
}

/// Runs the workload loop until `shutdown` fires.
pub async fn run_latency_workload(control: Arc<LatencyControl>, shutdown: ShutdownToken) {
    tracing::info!(component = COMPONENT, "latency workload running");
    loop {
        let started = Instant::now();
        tokio::select! {
            _ = tokio::time::sleep(control.latency()) => {}
            _ = shutdown.cancelled() => break,
        }
        let elapsed = started.elapsed();
        control.metrics().observe(elapsed);
        tracing::debug!(
            component = COMPONENT,
            elapsed_ms = elapsed.as_millis() as u64,
            "workload iteration finished"
        );
    }
    tracing::info!(component = COMPONENT, "latency workload stopped");
}

pub fn build_latency_router(control: Arc<LatencyControl>) -> Router {
    Router::new()
        .route(LATENCY_ENDPOINT, any(handle_latency))
        .route(METRICS_ENDPOINT, get(handle_metrics))
        .with_state(control)
}

/// Binds the latency control surface and serves it until `shutdown` fires.
pub async fn serve_latency_control(
    bind: &str,
    control: Arc<LatencyControl>,
    shutdown: ShutdownToken,
) -> Result<()> {
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid --latency-bind '{bind}': expected host:port"))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind latency control on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve latency control listen address")?;
    tracing::info!(component = COMPONENT, addr = %local_addr, "latency control listening");

    axum::serve(listener, build_latency_router(control))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("latency control server exited unexpectedly")
}

async fn handle_metrics(State(control): State<Arc<LatencyControl>>) -> Response {
    match control.metrics().encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(component = COMPONENT, error = %error, "latency metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
    }
}

async fn handle_latency(
    State(control): State<Arc<LatencyControl>>,
    method: Method,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        tracing::error!(component = COMPONENT, method = %method, "latency method not allowed");
        return (StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_BODY).into_response();
    }

    let request: LatencyRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(error) => {
            tracing::error!(component = COMPONENT, error = %error, "latency body parsing failed");
            return (StatusCode::BAD_REQUEST, BODY_PARSE_FAILED_BODY).into_response();
        }
    };
    let Some(raw_duration) = request.duration else {
        tracing::error!(component = COMPONENT, "latency duration missing");
        return (StatusCode::BAD_REQUEST, DURATION_MISSING_BODY).into_response();
    };
    let seconds = match raw_duration.trim().parse::<u64>() {
        Ok(seconds) => seconds,
        Err(error) => {
            tracing::error!(
                component = COMPONENT,
                duration = %raw_duration,
                error = %error,
                "latency duration parsing failed"
            );
            return (StatusCode::BAD_REQUEST, DURATION_PARSE_FAILED_BODY).into_response();
        }
    };

    control.set_latency(Duration::from_secs(seconds));
    tracing::info!(component = COMPONENT, duration_secs = seconds, "latency duration changed");
    (StatusCode::OK, LATENCY_CHANGED_BODY).into_response()
}
