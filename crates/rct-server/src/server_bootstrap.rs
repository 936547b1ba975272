use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{any, get};
use axum::Router;
use rct_cli::ServerCli;
use rct_core::ShutdownToken;
use rct_protocol::DUPLEX_ENDPOINT;
use tokio::net::TcpListener;

use crate::admin_endpoint::{
    handle_admin_control, handle_admin_status, ADMIN_CONTROL_ENDPOINT, ADMIN_STATUS_ENDPOINT,
};
use crate::control_channel::{handle_duplex_upgrade, ControlChannel};

const COMPONENT: &str = "server_bootstrap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub admin_bind: String,
    pub control_bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_bind: "0.0.0.0:8080".to_string(),
            control_bind: "127.0.0.1:8081".to_string(),
        }
    }
}

impl From<&ServerCli> for ServerConfig {
    fn from(cli: &ServerCli) -> Self {
        Self {
            admin_bind: cli.admin_bind.clone(),
            control_bind: cli.control_bind.clone(),
        }
    }
}

/// State shared by the admin and duplex listeners.
pub struct ServerState {
    pub channel: ControlChannel,
    pub shutdown: ShutdownToken,
}

impl ServerState {
    pub fn new(shutdown: ShutdownToken) -> Arc<Self> {
        Arc::new(Self {
            channel: ControlChannel::new(),
            shutdown,
        })
    }
}

pub fn build_admin_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(ADMIN_CONTROL_ENDPOINT, any(handle_admin_control))
        .route(ADMIN_STATUS_ENDPOINT, get(handle_admin_status))
        .with_state(state)
}

pub fn build_duplex_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route(DUPLEX_ENDPOINT, get(handle_duplex_upgrade))
        .with_state(state)
}

/// Both listeners bound and ready to serve.
pub struct BoundServer {
    state: Arc<ServerState>,
    admin_listener: TcpListener,
    control_listener: TcpListener,
    admin_addr: SocketAddr,
    control_addr: SocketAddr,
}

impl BoundServer {
    pub fn admin_addr(&self) -> SocketAddr {
        self.admin_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Serves both listeners until the shutdown token fires or either listener fails.
    pub async fn serve(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let admin = axum::serve(self.admin_listener, build_admin_router(Arc::clone(&self.state)))
            .with_graceful_shutdown(wait_for(shutdown.clone()));
        let control = axum::serve(self.control_listener, build_duplex_router(self.state))
            .with_graceful_shutdown(wait_for(shutdown.clone()));

        let outcome = tokio::try_join!(
            async { admin.await.context("admin listener exited unexpectedly") },
            async { control.await.context("control listener exited unexpectedly") },
        );
        // One listener failing must not leave the other serving.
        shutdown.cancel();
        outcome?;
        tracing::info!(component = COMPONENT, "controller stopped");
        Ok(())
    }
}

pub async fn bind_server(config: &ServerConfig, shutdown: ShutdownToken) -> Result<BoundServer> {
    let admin_addr = parse_bind(&config.admin_bind, "--admin-bind")?;
    let control_addr = parse_bind(&config.control_bind, "--control-bind")?;

    let admin_listener = TcpListener::bind(admin_addr)
        .await
        .with_context(|| format!("failed to bind admin listener on {admin_addr}"))?;
    let control_listener = TcpListener::bind(control_addr)
        .await
        .with_context(|| format!("failed to bind control listener on {control_addr}"))?;
    let admin_addr = admin_listener
        .local_addr()
        .context("failed to resolve admin listen address")?;
    let control_addr = control_listener
        .local_addr()
        .context("failed to resolve control listen address")?;

    tracing::info!(
        component = COMPONENT,
        admin_addr = %admin_addr,
        control_addr = %control_addr,
        duplex_path = DUPLEX_ENDPOINT,
        admin_path = ADMIN_CONTROL_ENDPOINT,
        "controller listening"
    );

    Ok(BoundServer {
        state: ServerState::new(shutdown),
        admin_listener,
        control_listener,
        admin_addr,
        control_addr,
    })
}

/// Binds both listeners and serves them until `shutdown` is cancelled.
pub async fn run_server(config: ServerConfig, shutdown: ShutdownToken) -> Result<()> {
    bind_server(&config, shutdown).await?.serve().await
}

fn parse_bind(raw: &str, flag: &str) -> Result<SocketAddr> {
    raw.parse()
        .with_context(|| format!("invalid {flag} '{raw}': expected host:port"))
}

async fn wait_for(shutdown: ShutdownToken) {
    shutdown.cancelled().await;
}
