//! Controller side of the telemetry relay.
//!
//! An operator toggles the fleet client's collector through `POST`/`DELETE /control`;
//! the controller relays each request as a single text frame over the client's
//! duplex connection, refusing while no client is connected.

pub mod admin_endpoint;
pub mod control_channel;
pub mod server_bootstrap;

pub use admin_endpoint::{
    relay_admin_command, AdminError, ADMIN_CONTROL_ENDPOINT, ADMIN_STATUS_ENDPOINT,
};
pub use control_channel::{ChannelError, ChannelStatus, ConnectionId, ControlChannel, OutboundSink};
pub use server_bootstrap::{
    bind_server, build_admin_router, build_duplex_router, run_server, BoundServer, ServerConfig,
    ServerState,
};
