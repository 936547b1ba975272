//! Start/stop supervision of the external collector process.

use std::fmt::Debug;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Child;

use crate::collector_config::{write_collector_config, CollectorConfigError, CollectorConfigSpec};

const COMPONENT: &str = "process_supervisor";
const DEFAULT_COLLECTOR_EXECUTABLE: &str = "./bin/otelcol-contrib";
const DEFAULT_COLLECTOR_CONFIG_PATH: &str = "./bin/otel-config.yaml";

/// Failures reported by [`ProcessSupervisor`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn collector '{executable}': {source}")]
    SpawnFailed {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write collector config '{path}': {source}")]
    ConfigWriteFailed {
        path: String,
        #[source]
        source: CollectorConfigError,
    },
    #[error("collector is not running")]
    NotRunning,
    #[error("collector is already running on process {pid}")]
    AlreadyRunning { pid: u32 },
    #[error("collector process {pid} was not found")]
    ProcessNotFound { pid: u32 },
    #[error("failed to deliver SIGTERM to collector process {pid}: {errno}")]
    SignalFailed { pid: u32, errno: Errno },
}

impl SupervisorError {
    /// Short stable code used in structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SpawnFailed { .. } => "spawn_failed",
            Self::ConfigWriteFailed { .. } => "config_write_failed",
            Self::NotRunning => "not_running",
            Self::AlreadyRunning { .. } => "already_running",
            Self::ProcessNotFound { .. } => "process_not_found",
            Self::SignalFailed { .. } => "signal_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What `start` does when a collector is already recorded as running.
pub enum StartPolicy {
    /// Spawn another collector and overwrite the recorded identifier, orphaning the previous one.
    #[default]
    Respawn,
    /// Refuse with [`SupervisorError::AlreadyRunning`] and keep the current process.
    RejectWhileRunning,
}

impl StartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Respawn => "respawn",
            Self::RejectWhileRunning => "reject",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub collector: CollectorConfigSpec,
    pub start_policy: StartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_COLLECTOR_EXECUTABLE),
            config_path: PathBuf::from(DEFAULT_COLLECTOR_CONFIG_PATH),
            collector: CollectorConfigSpec::default(),
            start_policy: StartPolicy::default(),
        }
    }
}

/// Supervisor bookkeeping for the collector. `identifier` is present exactly when `running` is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SupervisedProcess {
    running: bool,
    identifier: Option<u32>,
}

impl SupervisedProcess {
    fn started(pid: u32) -> Self {
        Self {
            running: true,
            identifier: Some(pid),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn identifier(&self) -> Option<u32> {
        self.identifier
    }
}

/// Delivers the termination request to a collector process.
pub trait SignalSender: Send + Sync + Debug {
    fn terminate(&self, pid: u32) -> Result<(), SupervisorError>;
}

/// Sends `SIGTERM` through `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SigtermSender;

impl SignalSender for SigtermSender {
    fn terminate(&self, pid: u32) -> Result<(), SupervisorError> {
        deliver_sigterm(pid)
    }
}

/// Record plus the child handle it describes. The unwaited handle keeps an
/// exited collector's pid reserved until `stop` observes the exit.
#[derive(Debug, Default)]
struct CollectorSlot {
    record: SupervisedProcess,
    child: Option<Child>,
}

impl CollectorSlot {
    fn clear(&mut self) {
        self.record = SupervisedProcess::default();
        self.child = None;
    }

    fn exit_status(&mut self, pid: u32) -> Option<std::process::ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(
                    component = COMPONENT,
                    pid,
                    error = %error,
                    "collector exit status could not be polled"
                );
                None
            }
        }
    }
}

/// Owns the lifecycle of one external collector process.
///
/// `start` and `stop` serialize on a single lock around the [`SupervisedProcess`]
/// record, so concurrent callers never observe a half-updated identifier. The
/// supervisor does not watch the child: if the collector exits on its own the
/// record still says running until the next `stop`, which then reports
/// [`SupervisorError::ProcessNotFound`] without signalling anything.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    signals: Arc<dyn SignalSender>,
    slot: Mutex<CollectorSlot>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_signal_sender(config, Arc::new(SigtermSender))
    }

    pub fn with_signal_sender(config: SupervisorConfig, signals: Arc<dyn SignalSender>) -> Self {
        Self {
            config,
            signals,
            slot: Mutex::new(CollectorSlot::default()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Returns a copy of the current record.
    pub fn snapshot(&self) -> SupervisedProcess {
        self.lock_slot().record
    }

    /// Regenerates the collector config and spawns the collector, returning its process id.
    ///
    /// Must be called from within a Tokio runtime; dropped children are reaped by it.
    pub fn start(&self) -> Result<u32, SupervisorError> {
        let mut slot = self.lock_slot();
        let previous = slot.record.identifier();
        if let Some(pid) = previous {
            if self.config.start_policy == StartPolicy::RejectWhileRunning {
                tracing::warn!(
                    component = COMPONENT,
                    pid,
                    "start rejected: collector already running"
                );
                return Err(SupervisorError::AlreadyRunning { pid });
            }
        }

        tracing::info!(
            component = COMPONENT,
            executable = %self.config.executable.display(),
            config_path = %self.config.config_path.display(),
            "starting collector"
        );

        let has_credential = write_collector_config(&self.config.collector, &self.config.config_path)
            .map_err(|source| {
                let error = SupervisorError::ConfigWriteFailed {
                    path: self.config.config_path.display().to_string(),
                    source,
                };
                log_failure("start", &error);
                error
            })?;
        if !has_credential {
            tracing::warn!(
                component = COMPONENT,
                credential_env = %self.config.collector.credential_env,
                "collector credential not set; exporting to file only"
            );
        }

        let (pid, child) = self
            .spawn_collector()
            .inspect_err(|error| log_failure("start", error))?;
        if let Some(orphaned) = previous {
            tracing::warn!(
                component = COMPONENT,
                pid,
                orphaned_pid = orphaned,
                "collector started while another was recorded; previous process is no longer tracked"
            );
        }
        slot.record = SupervisedProcess::started(pid);
        slot.child = Some(child);
        tracing::info!(component = COMPONENT, pid, "collector started");
        Ok(pid)
    }

    /// Sends SIGTERM to the recorded collector and clears the record once delivered.
    ///
    /// A collector that already exited is reported as
    /// [`SupervisorError::ProcessNotFound`] and is not signalled. A failed
    /// delivery leaves the record intact so the caller can retry.
    pub fn stop(&self) -> Result<u32, SupervisorError> {
        let mut slot = self.lock_slot();
        let Some(pid) = slot.record.identifier() else {
            let error = SupervisorError::NotRunning;
            log_failure("stop", &error);
            return Err(error);
        };

        if let Some(status) = slot.exit_status(pid) {
            tracing::warn!(
                component = COMPONENT,
                pid,
                status = %status,
                "collector exited before stop"
            );
            slot.clear();
            let error = SupervisorError::ProcessNotFound { pid };
            log_failure("stop", &error);
            return Err(error);
        }

        tracing::info!(component = COMPONENT, pid, "stopping collector");
        match self.signals.terminate(pid) {
            Ok(()) => {
                slot.clear();
                tracing::info!(component = COMPONENT, pid, "collector stopped");
                Ok(pid)
            }
            Err(error @ SupervisorError::ProcessNotFound { .. }) => {
                // ESRCH: nothing left to track.
                slot.clear();
                log_failure("stop", &error);
                Err(error)
            }
            Err(error) => {
                log_failure("stop", &error);
                Err(error)
            }
        }
    }

    /// Stops the collector if one is recorded. Failures are logged, never returned.
    pub fn shutdown(&self) {
        if !self.snapshot().is_running() {
            return;
        }
        if let Err(error) = self.stop() {
            tracing::warn!(
                component = COMPONENT,
                code = error.code(),
                error = %error,
                "collector stop during shutdown failed"
            );
        }
    }

    fn spawn_collector(&self) -> Result<(u32, Child), SupervisorError> {
        let executable = self.config.executable.display().to_string();
        let child = tokio::process::Command::new(&self.config.executable)
            .arg(format!("--config={}", self.config.config_path.display()))
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                executable: executable.clone(),
                source,
            })?;
        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            executable,
            source: std::io::Error::other("collector exited before its process id was observed"),
        })?;
        Ok((pid, child))
    }

    fn lock_slot(&self) -> MutexGuard<'_, CollectorSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver_sigterm(pid: u32) -> Result<(), SupervisorError> {
    let raw_pid = i32::try_from(pid).map_err(|_| SupervisorError::ProcessNotFound { pid })?;
    if raw_pid <= 0 {
        return Err(SupervisorError::ProcessNotFound { pid });
    }
    kill(Pid::from_raw(raw_pid), Signal::SIGTERM).map_err(|errno| classify_signal_error(pid, errno))
}

fn classify_signal_error(pid: u32, errno: Errno) -> SupervisorError {
    match errno {
        Errno::ESRCH => SupervisorError::ProcessNotFound { pid },
        errno => SupervisorError::SignalFailed { pid, errno },
    }
}

fn log_failure(operation: &str, error: &SupervisorError) {
    tracing::error!(
        component = COMPONENT,
        operation,
        code = error.code(),
        error = %error,
        "collector {operation} failed"
    );
}
