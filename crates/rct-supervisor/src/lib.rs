//! Lifecycle supervision for the locally spawned telemetry collector.
//!
//! Exposes [`ProcessSupervisor`], which owns exactly one external collector
//! process tracked by its OS process identifier, and the YAML configuration
//! generator the supervisor regenerates before every start.

pub mod collector_config;
pub mod process_supervisor;

pub use collector_config::{
    build_collector_config_document, render_collector_config, CollectorConfigDocument,
    CollectorConfigError, CollectorConfigSpec,
};
pub use process_supervisor::{
    ProcessSupervisor, SigtermSender, SignalSender, StartPolicy, SupervisedProcess,
    SupervisorConfig, SupervisorError,
};
