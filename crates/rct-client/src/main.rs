use anyhow::Result;
use clap::Parser;
use rct_cli::ClientCli;
use rct_client::{run_client, ClientConfig};
use rct_core::{init_tracing, LogFormat, ShutdownToken};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ClientCli::parse();
    let log_format: LogFormat = cli.log_format.as_str().parse().map_err(anyhow::Error::msg)?;
    init_tracing(log_format);
    tracing::info!(
        service = "rct-client",
        controller_url = %cli.controller_url,
        start_policy = cli.collector_start_policy.as_str(),
        "starting client"
    );

    let shutdown = ShutdownToken::new();
    let ctrl_c = shutdown.cancel_on_ctrl_c();
    let result = run_client(ClientConfig::from(&cli), shutdown).await;
    ctrl_c.abort();
    match result {
        Ok(_) => Ok(()),
        Err(error) => {
            tracing::error!(service = "rct-client", error = %error, "client failed");
            Err(error)
        }
    }
}
