//! Foundational utilities shared across the remote telemetry control crates.
//!
//! Provides cooperative shutdown signalling, time helpers for status payloads,
//! and the tracing bootstrap used by both binaries.

pub mod shutdown;
pub mod telemetry_logging;
pub mod time_utils;

pub use shutdown::ShutdownToken;
pub use telemetry_logging::{init_tracing, LogFormat};
pub use time_utils::{current_unix_timestamp_ms, unix_timestamp_ms};
