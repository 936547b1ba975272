//! CLI argument models and validation helpers for the controller and client binaries.
//!
//! Every flag has an `RCT_*` environment fallback so both binaries can be
//! configured entirely from a service manager's environment.

pub mod cli_types;
pub mod client_args;
pub mod server_args;

pub use cli_types::*;
pub use client_args::ClientCli;
pub use server_args::ServerCli;

pub(crate) fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

pub(crate) fn parse_socket_bind(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    trimmed
        .parse::<std::net::SocketAddr>()
        .map_err(|error| format!("expected host:port socket address: {error}"))?;
    Ok(trimmed.to_string())
}

pub(crate) fn parse_duplex_url(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if !(trimmed.starts_with("ws://") || trimmed.starts_with("wss://")) {
        return Err("controller url must start with ws:// or wss://".to_string());
    }
    Ok(trimmed.to_string())
}

pub(crate) fn parse_non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}
