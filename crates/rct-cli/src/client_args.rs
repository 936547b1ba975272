use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::{
    parse_duplex_url, parse_non_empty, parse_positive_u64, parse_socket_bind, CliLogFormat,
    CliStartPolicy,
};

#[derive(Debug, Parser)]
#[command(
    name = "rct-client",
    about = "Fleet-edge client that toggles a local telemetry collector on controller command",
    version
)]
pub struct ClientCli {
    #[arg(
        long = "controller-url",
        env = "RCT_CONTROLLER_URL",
        default_value = "ws://localhost:8081/ws",
        value_parser = parse_duplex_url,
        help = "Controller duplex endpoint to dial once at startup"
    )]
    pub controller_url: String,

    #[arg(
        long = "health-interval-ms",
        env = "RCT_HEALTH_INTERVAL_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Interval of the local session health check"
    )]
    pub health_interval_ms: u64,

    #[arg(
        long = "shutdown-grace-ms",
        env = "RCT_SHUTDOWN_GRACE_MS",
        default_value_t = 1_000,
        value_parser = parse_positive_u64,
        help = "How long shutdown waits for the controller to acknowledge the close handshake"
    )]
    pub shutdown_grace_ms: u64,

    #[arg(
        long = "collector-bin",
        env = "RCT_COLLECTOR_BIN",
        default_value = "./bin/otelcol-contrib",
        help = "Collector executable; relative paths resolve against the working directory"
    )]
    pub collector_bin: PathBuf,

    #[arg(
        long = "collector-config",
        env = "RCT_COLLECTOR_CONFIG",
        default_value = "./bin/otel-config.yaml",
        help = "Path the generated collector config is written to before every start"
    )]
    pub collector_config: PathBuf,

    #[arg(
        long = "collector-otlp-endpoint",
        env = "RCT_COLLECTOR_OTLP_ENDPOINT",
        default_value = "localhost:4317",
        value_parser = parse_non_empty,
        help = "OTLP gRPC receiver endpoint declared in the collector config"
    )]
    pub collector_otlp_endpoint: String,

    #[arg(
        long = "collector-file-export-path",
        env = "RCT_COLLECTOR_FILE_EXPORT_PATH",
        default_value = "./bin/log",
        value_parser = parse_non_empty,
        help = "File exporter output path declared in the collector config"
    )]
    pub collector_file_export_path: String,

    #[arg(
        long = "collector-credential-env",
        env = "RCT_COLLECTOR_CREDENTIAL_ENV",
        default_value = "OTEL_EXPORTER_API_KEY",
        value_parser = parse_non_empty,
        help = "Environment variable holding the exporter credential"
    )]
    pub collector_credential_env: String,

    #[arg(
        long = "collector-export-endpoint",
        env = "RCT_COLLECTOR_EXPORT_ENDPOINT",
        default_value = "https://otlp.nr-data.net:4318",
        value_parser = parse_non_empty,
        help = "OTLP/HTTP endpoint used when an exporter credential is present"
    )]
    pub collector_export_endpoint: String,

    #[arg(
        long = "collector-start-policy",
        env = "RCT_COLLECTOR_START_POLICY",
        value_enum,
        default_value_t = CliStartPolicy::Respawn,
        help = "Behavior when a start arrives while a collector is already recorded"
    )]
    pub collector_start_policy: CliStartPolicy,

    #[arg(
        long = "collector-autostart",
        env = "RCT_COLLECTOR_AUTOSTART",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Start the collector once at launch, before dialing the controller"
    )]
    pub collector_autostart: bool,

    #[arg(
        long = "latency-bind",
        env = "RCT_LATENCY_BIND",
        default_value = "127.0.0.1:8082",
        value_parser = parse_socket_bind,
        help = "Listen address for the latency demo control surface (POST /latency)"
    )]
    pub latency_bind: String,

    #[arg(
        long = "log-format",
        env = "RCT_LOG_FORMAT",
        value_enum,
        default_value_t = CliLogFormat::Compact,
        help = "Log output format"
    )]
    pub log_format: CliLogFormat,
}
