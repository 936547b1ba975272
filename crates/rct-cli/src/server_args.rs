use clap::Parser;

use crate::{parse_socket_bind, CliLogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "rct-server",
    about = "Controller that relays telemetry start/stop commands to a fleet-edge client",
    version
)]
pub struct ServerCli {
    #[arg(
        long = "admin-bind",
        env = "RCT_ADMIN_BIND",
        default_value = "0.0.0.0:8080",
        value_parser = parse_socket_bind,
        help = "Listen address for the admin HTTP surface (POST/DELETE /control)"
    )]
    pub admin_bind: String,

    #[arg(
        long = "control-bind",
        env = "RCT_CONTROL_BIND",
        default_value = "127.0.0.1:8081",
        value_parser = parse_socket_bind,
        help = "Listen address for the client duplex connection (GET /ws upgrade)"
    )]
    pub control_bind: String,

    #[arg(
        long = "log-format",
        env = "RCT_LOG_FORMAT",
        value_enum,
        default_value_t = CliLogFormat::Compact,
        help = "Log output format"
    )]
    pub log_format: CliLogFormat,
}
