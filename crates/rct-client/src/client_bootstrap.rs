use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rct_cli::{ClientCli, CliStartPolicy};
use rct_core::ShutdownToken;
use rct_supervisor::{CollectorConfigSpec, ProcessSupervisor, StartPolicy, SupervisorConfig};

use crate::duplex_session::{DuplexSession, DuplexSessionConfig, SessionEnd};
use crate::latency_app::{
    run_latency_workload, serve_latency_control, LatencyControl, DEFAULT_LATENCY,
};

const COMPONENT: &str = "client_bootstrap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub session: DuplexSessionConfig,
    pub supervisor: SupervisorConfig,
    pub collector_autostart: bool,
    /// `None` disables the latency demo.
    pub latency_bind: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: DuplexSessionConfig::default(),
            supervisor: SupervisorConfig::default(),
            collector_autostart: false,
            latency_bind: Some("127.0.0.1:8082".to_string()),
        }
    }
}

impl From<&ClientCli> for ClientConfig {
    fn from(cli: &ClientCli) -> Self {
        Self {
            session: DuplexSessionConfig {
                url: cli.controller_url.clone(),
                health_interval: Duration::from_millis(cli.health_interval_ms),
                shutdown_grace: Duration::from_millis(cli.shutdown_grace_ms),
            },
            supervisor: SupervisorConfig {
                executable: cli.collector_bin.clone(),
                config_path: cli.collector_config.clone(),
                collector: CollectorConfigSpec {
                    otlp_grpc_endpoint: cli.collector_otlp_endpoint.clone(),
                    file_export_path: cli.collector_file_export_path.clone(),
                    credential_env: cli.collector_credential_env.clone(),
                    export_endpoint: cli.collector_export_endpoint.clone(),
                },
                start_policy: match cli.collector_start_policy {
                    CliStartPolicy::Respawn => StartPolicy::Respawn,
                    CliStartPolicy::Reject => StartPolicy::RejectWhileRunning,
                },
            },
            collector_autostart: cli.collector_autostart,
            latency_bind: Some(cli.latency_bind.clone()),
        }
    }
}

/// Runs the client until its duplex session ends, then stops the collector and the demo tasks.
pub async fn run_client(config: ClientConfig, shutdown: ShutdownToken) -> Result<SessionEnd> {
    let latency = Arc::new(
        LatencyControl::new(DEFAULT_LATENCY).context("failed to register latency metrics")?,
    );
    let supervisor = Arc::new(ProcessSupervisor::new(config.supervisor.clone()));
    if config.collector_autostart {
        if let Err(error) = supervisor.start() {
            tracing::error!(
                component = COMPONENT,
                code = error.code(),
                error = %error,
                "collector autostart failed"
            );
        }
    }

    // Cancelled once the session ends, whatever ended it.
    let demo_shutdown = ShutdownToken::new();
    let workload = tokio::spawn(run_latency_workload(
        Arc::clone(&latency),
        demo_shutdown.clone(),
    ));
    let latency_server = config.latency_bind.clone().map(|bind| {
        let control = Arc::clone(&latency);
        let token = demo_shutdown.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_latency_control(&bind, control, token).await {
                tracing::error!(
                    component = COMPONENT,
                    error = %error,
                    "latency control surface failed"
                );
            }
        })
    });

    let session = DuplexSession::new(config.session.clone(), supervisor.clone());
    let outcome = session.run(shutdown).await;

    supervisor.shutdown();
    demo_shutdown.cancel();
    if let Err(error) = workload.await {
        tracing::warn!(component = COMPONENT, error = %error, "latency workload task failed");
    }
    if let Some(server) = latency_server {
        if let Err(error) = server.await {
            tracing::warn!(component = COMPONENT, error = %error, "latency server task failed");
        }
    }

    let end = outcome.context("controller session could not be established")?;
    tracing::info!(component = COMPONENT, end = ?end, "client stopped");
    Ok(end)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn unit_client_config_from_cli_maps_policy_and_durations() {
        let cli = ClientCli::try_parse_from([
            "rct-client",
            "--health-interval-ms",
            "250",
            "--shutdown-grace-ms",
            "100",
            "--collector-start-policy",
            "reject",
            "--collector-credential-env",
            "RCT_TEST_CREDENTIAL",
        ])
        .expect("parse cli");
        let config = ClientConfig::from(&cli);
        assert_eq!(config.session.health_interval, Duration::from_millis(250));
        assert_eq!(config.session.shutdown_grace, Duration::from_millis(100));
        assert_eq!(
            config.supervisor.start_policy,
            StartPolicy::RejectWhileRunning
        );
        assert_eq!(config.supervisor.collector.credential_env, "RCT_TEST_CREDENTIAL");
    }

    #[tokio::test]
    async fn regression_run_client_surfaces_dial_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
        let addr = listener.local_addr().expect("reserved addr");
        drop(listener);

        let config = ClientConfig {
            session: DuplexSessionConfig {
                url: format!("ws://{addr}/ws"),
                ..DuplexSessionConfig::default()
            },
            latency_bind: None,
            ..ClientConfig::default()
        };
        let error = run_client(config, ShutdownToken::new())
            .await
            .expect_err("dial fails");
        assert!(format!("{error:#}").contains("failed to dial controller"));
    }
}
