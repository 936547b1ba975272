use anyhow::Result;
use clap::Parser;
use rct_cli::ServerCli;
use rct_core::{init_tracing, LogFormat, ShutdownToken};
use rct_server::{run_server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServerCli::parse();
    let log_format: LogFormat = cli.log_format.as_str().parse().map_err(anyhow::Error::msg)?;
    init_tracing(log_format);
    tracing::info!(
        service = "rct-server",
        log_format = log_format.as_str(),
        "starting controller"
    );

    let shutdown = ShutdownToken::new();
    let ctrl_c = shutdown.cancel_on_ctrl_c();
    let result = run_server(ServerConfig::from(&cli), shutdown).await;
    ctrl_c.abort();
    if let Err(error) = &result {
        tracing::error!(service = "rct-server", error = %error, "controller failed");
    }
    result
}
