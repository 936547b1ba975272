//! Fleet-edge client: follows controller commands over one duplex session and
//! toggles the local telemetry collector accordingly.

pub mod client_bootstrap;
pub mod command_dispatch;
pub mod duplex_session;
pub mod latency_app;

pub use client_bootstrap::{run_client, ClientConfig};
pub use command_dispatch::{dispatch_text_frame, CommandHandler, DispatchOutcome};
pub use duplex_session::{DuplexSession, DuplexSessionConfig, SessionEnd, SessionError};
pub use latency_app::{
    build_latency_router, run_latency_workload, serve_latency_control, LatencyControl,
    LatencyMetrics, LatencyMetricsError, APPLICATION_LATENCY_METRIC, LATENCY_ENDPOINT,
    METRICS_ENDPOINT,
};
