use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use rct_client::{run_client, ClientConfig, DuplexSessionConfig, SessionEnd};
use rct_core::ShutdownToken;
use rct_server::{
    bind_server, ServerConfig, ServerState, ADMIN_CONTROL_ENDPOINT, ADMIN_STATUS_ENDPOINT,
};
use rct_supervisor::{CollectorConfigSpec, StartPolicy, SupervisorConfig};

const WAIT: Duration = Duration::from_secs(10);

fn write_fake_collector(dir: &Path) -> PathBuf {
    let script = dir.join("otelcol-contrib");
    fs::write(
        &script,
        "#!/bin/sh\necho \"$$ $@\" >> \"$(dirname \"$0\")/launches.txt\"\nexec sleep 30\n",
    )
    .expect("write fake collector");
    let mut permissions = fs::metadata(&script).expect("metadata").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&script, permissions).expect("chmod fake collector");
    script
}

fn read_launches(dir: &Path) -> Vec<(u32, String)> {
    let Ok(raw) = fs::read_to_string(dir.join("launches.txt")) else {
        return Vec::new();
    };
    raw.lines()
        .filter_map(|line| {
            let (pid, args) = line.split_once(' ')?;
            Some((pid.parse().ok()?, args.to_string()))
        })
        .collect()
}

fn process_is_live(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/status")) {
        Ok(status) => !status
            .lines()
            .any(|line| line.starts_with("State:") && line.contains('Z')),
        Err(_) => false,
    }
}

async fn wait_for<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_ready(state: &Arc<ServerState>, expected: bool) {
    let state = Arc::clone(state);
    wait_for(move || state.channel.is_ready() == expected, "readiness").await;
}

#[tokio::test]
async fn integration_admin_commands_start_and_stop_client_collector() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let dir = workspace.path().to_path_buf();
    let config_path = dir.join("otel-config.yaml");

    let server_shutdown = ShutdownToken::new();
    let server = bind_server(
        &ServerConfig {
            admin_bind: "127.0.0.1:0".to_string(),
            control_bind: "127.0.0.1:0".to_string(),
        },
        server_shutdown.clone(),
    )
    .await
    .expect("bind server");
    let admin_addr = server.admin_addr();
    let admin_url = format!("http://{admin_addr}{ADMIN_CONTROL_ENDPOINT}");
    let control_url = format!("ws://{}/ws", server.control_addr());
    let state = server.state();
    let server_task = tokio::spawn(server.serve());

    let http = reqwest::Client::new();
    let before = http.post(&admin_url).send().await.expect("post before client");
    assert_eq!(before.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let client_shutdown = ShutdownToken::new();
    let client_config = ClientConfig {
        session: DuplexSessionConfig {
            url: control_url,
            health_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(1),
        },
        supervisor: SupervisorConfig {
            executable: write_fake_collector(&dir),
            config_path: config_path.clone(),
            collector: CollectorConfigSpec {
                credential_env: "RCT_E2E_CREDENTIAL_UNSET_4F1A".to_string(),
                ..CollectorConfigSpec::default()
            },
            start_policy: StartPolicy::Respawn,
        },
        collector_autostart: false,
        latency_bind: None,
    };
    let client_task = tokio::spawn(run_client(client_config, client_shutdown.clone()));
    wait_ready(&state, true).await;

    let started = http.post(&admin_url).send().await.expect("post start");
    assert_eq!(started.status(), reqwest::StatusCode::OK);
    assert_eq!(started.text().await.expect("start body"), "Turned on");

    let launch_dir = dir.clone();
    wait_for(move || read_launches(&launch_dir).len() == 1, "collector launch").await;
    let (pid, args) = read_launches(&dir).remove(0);
    assert_eq!(args, format!("--config={}", config_path.display()));
    let rendered = fs::read_to_string(&config_path).expect("collector config written");
    assert!(rendered.contains("otlp"));
    assert!(!rendered.contains("otlphttp"));
    assert!(process_is_live(pid));

    let stopped = http.delete(&admin_url).send().await.expect("delete stop");
    assert_eq!(stopped.status(), reqwest::StatusCode::OK);
    assert_eq!(stopped.text().await.expect("stop body"), "Turned off");
    wait_for(move || !process_is_live(pid), "collector exit").await;

    client_shutdown.cancel();
    let end = tokio::time::timeout(WAIT, client_task)
        .await
        .expect("client stops")
        .expect("client join")
        .expect("client result");
    assert!(matches!(end, SessionEnd::Interrupted { .. }));
    wait_ready(&state, false).await;

    let after = http.post(&admin_url).send().await.expect("post after client");
    assert_eq!(after.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);

    let status: serde_json::Value = http
        .get(format!("http://{admin_addr}{ADMIN_STATUS_ENDPOINT}"))
        .send()
        .await
        .expect("status request")
        .json()
        .await
        .expect("status json");
    assert_eq!(status["ready"], false);
    assert_eq!(status["accepted_connections"], 1);
    assert_eq!(status["closed_connections"], 1);
    assert_eq!(status["last_relayed"], "stop");

    server_shutdown.cancel();
    tokio::time::timeout(WAIT, server_task)
        .await
        .expect("server stops")
        .expect("server join")
        .expect("server result");
}

#[tokio::test]
async fn integration_controller_shutdown_ends_client_session() {
    let server_shutdown = ShutdownToken::new();
    let server = bind_server(
        &ServerConfig {
            admin_bind: "127.0.0.1:0".to_string(),
            control_bind: "127.0.0.1:0".to_string(),
        },
        server_shutdown.clone(),
    )
    .await
    .expect("bind server");
    let control_url = format!("ws://{}/ws", server.control_addr());
    let state = server.state();
    let server_task = tokio::spawn(server.serve());

    let client_task = tokio::spawn(run_client(
        ClientConfig {
            session: DuplexSessionConfig {
                url: control_url,
                ..DuplexSessionConfig::default()
            },
            latency_bind: None,
            ..ClientConfig::default()
        },
        ShutdownToken::new(),
    ));
    wait_ready(&state, true).await;

    server_shutdown.cancel();
    let end = tokio::time::timeout(WAIT, client_task)
        .await
        .expect("client stops")
        .expect("client join")
        .expect("client result");
    assert_eq!(end, SessionEnd::PeerClosed);
    tokio::time::timeout(WAIT, server_task)
        .await
        .expect("server stops")
        .expect("server join")
        .expect("server result");
}
