use rct_protocol::{decode_command_frame, Command, ProtocolError};
use rct_supervisor::{ProcessSupervisor, SupervisorError};

const COMPONENT: &str = "command_dispatch";

/// Applies decoded commands. The duplex session calls it once per frame, in arrival order.
pub trait CommandHandler: Send + Sync {
    fn apply(&self, command: Command) -> Result<(), SupervisorError>;
}

impl CommandHandler for ProcessSupervisor {
    fn apply(&self, command: Command) -> Result<(), SupervisorError> {
        match command {
            Command::Start => self.start().map(|_| ()),
            Command::Stop => self.stop().map(|_| ()),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Applied(Command),
    Failed {
        command: Command,
        error: SupervisorError,
    },
    Skipped(ProtocolError),
}

/// Decodes one text frame and hands the command to `handler`.
///
/// Neither undecodable frames nor handler failures end the session; both are logged here.
pub fn dispatch_text_frame(handler: &dyn CommandHandler, raw: &str) -> DispatchOutcome {
    let command = match decode_command_frame(raw) {
        Ok(command) => command,
        Err(error) => {
            tracing::warn!(
                component = COMPONENT,
                error = %error,
                "skipping undecodable control frame"
            );
            return DispatchOutcome::Skipped(error);
        }
    };

    match handler.apply(command) {
        Ok(()) => {
            tracing::info!(component = COMPONENT, command = command.as_str(), "command applied");
            DispatchOutcome::Applied(command)
        }
        Err(error) => {
            tracing::error!(
                component = COMPONENT,
                command = command.as_str(),
                code = error.code(),
                error = %error,
                "command failed"
            );
            DispatchOutcome::Failed { command, error }
        }
    }
}
