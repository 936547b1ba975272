//! Duplex control protocol shared by the controller and the fleet-edge client.
//!
//! The controller relays a two-valued [`Command`] to the client as a single
//! UTF-8 text frame with no envelope. Both sides use the `"run"`/`"stop"`
//! literal pair; encoding and decoding live here so the two binaries cannot
//! drift apart.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire literal relayed for [`Command::Start`].
pub const WIRE_START: &str = "run";
/// Wire literal relayed for [`Command::Stop`].
pub const WIRE_STOP: &str = "stop";
/// Close code sent with the closing handshake.
pub const NORMAL_CLOSURE_CODE: u16 = 1000;
/// Upgrade path served by the controller's duplex listener.
pub const DUPLEX_ENDPOINT: &str = "/ws";

const MAX_REPORTED_FRAME_CHARS: usize = 64;

/// Error raised while decoding an inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown control frame '{0}'; expected 'run' or 'stop'")]
    UnknownFrame(String),
    #[error("control frame must be valid UTF-8")]
    InvalidUtf8,
}

/// Telemetry-collection toggle relayed from controller to client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    /// Text frame payload for this command.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Start => WIRE_START,
            Self::Stop => WIRE_STOP,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    /// Maps an admin HTTP verb to a command. `POST` starts, `DELETE` stops.
    pub fn from_admin_method(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("POST") {
            Some(Self::Start)
        } else if method.eq_ignore_ascii_case("DELETE") {
            Some(Self::Stop)
        } else {
            None
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Decodes a text frame into a command.
pub fn decode_command_frame(raw: &str) -> Result<Command, ProtocolError> {
    match raw.trim_matches(|ch: char| ch.is_ascii_whitespace()) {
        WIRE_START => Ok(Command::Start),
        WIRE_STOP => Ok(Command::Stop),
        other => Err(ProtocolError::UnknownFrame(truncate_for_report(other))),
    }
}

/// Decodes a binary payload carrying a UTF-8 text frame.
pub fn decode_command_bytes(raw: &[u8]) -> Result<Command, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
    decode_command_frame(text)
}

/// Encodes a command as the text frame payload.
pub fn encode_command_frame(command: Command) -> String {
    command.as_wire_str().to_string()
}

fn truncate_for_report(raw: &str) -> String {
    if raw.chars().count() <= MAX_REPORTED_FRAME_CHARS {
        return raw.to_string();
    }
    let mut truncated = raw
        .chars()
        .take(MAX_REPORTED_FRAME_CHARS)
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_encode_uses_run_stop_literal_pair() {
        assert_eq!(encode_command_frame(Command::Start), "run");
        assert_eq!(encode_command_frame(Command::Stop), "stop");
    }

    #[test]
    fn unit_decode_accepts_wire_literals_with_surrounding_whitespace() {
        assert_eq!(decode_command_frame("run"), Ok(Command::Start));
        assert_eq!(decode_command_frame(" stop\n"), Ok(Command::Stop));
        assert_eq!(decode_command_bytes(b"run"), Ok(Command::Start));
    }

    #[test]
    fn regression_decode_rejects_legacy_start_literal() {
        let error = decode_command_frame("start").expect_err("legacy literal");
        assert_eq!(error, ProtocolError::UnknownFrame("start".to_string()));
        assert!(error.to_string().contains("expected 'run' or 'stop'"));
    }

    #[test]
    fn regression_decode_is_case_sensitive_and_rejects_envelopes() {
        assert!(decode_command_frame("RUN").is_err());
        assert!(decode_command_frame("{\"command\":\"run\"}").is_err());
        assert!(decode_command_frame("").is_err());
    }

    #[test]
    fn regression_decode_bytes_rejects_invalid_utf8() {
        assert_eq!(
            decode_command_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        );
    }

    #[test]
    fn regression_unknown_frame_report_is_truncated() {
        let raw = "x".repeat(500);
        let ProtocolError::UnknownFrame(reported) =
            decode_command_frame(&raw).expect_err("oversized frame")
        else {
            panic!("expected unknown frame error");
        };
        assert_eq!(reported.chars().count(), MAX_REPORTED_FRAME_CHARS + 3);
        assert!(reported.ends_with("..."));
    }

    #[test]
    fn unit_admin_methods_map_to_commands() {
        assert_eq!(Command::from_admin_method("POST"), Some(Command::Start));
        assert_eq!(Command::from_admin_method("DELETE"), Some(Command::Stop));
        assert_eq!(Command::from_admin_method("GET"), None);
        assert_eq!(Command::from_admin_method("PUT"), None);
    }

    #[test]
    fn unit_command_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&Command::Start).expect("serialize"),
            "\"start\""
        );
        assert_eq!(Command::Stop.to_string(), "stop");
    }
}
