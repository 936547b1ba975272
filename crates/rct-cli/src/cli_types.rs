use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliLogFormat {
    Compact,
    Json,
}

impl CliLogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            CliLogFormat::Compact => "compact",
            CliLogFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliStartPolicy {
    /// Spawn a second collector and track only the newest one.
    Respawn,
    /// Refuse to start while a collector is recorded as running.
    Reject,
}

impl CliStartPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CliStartPolicy::Respawn => "respawn",
            CliStartPolicy::Reject => "reject",
        }
    }
}
