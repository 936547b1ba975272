//! Single inbound duplex connection exposed as a readiness gate.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{Sink, SinkExt, StreamExt};
use rct_core::current_unix_timestamp_ms;
use rct_protocol::{encode_command_frame, Command, NORMAL_CLOSURE_CODE};
use serde::Serialize;
use thiserror::Error;

use crate::server_bootstrap::ServerState;

const COMPONENT: &str = "control_channel";

/// Write half of an accepted duplex connection.
pub type OutboundSink = Pin<Box<dyn Sink<WsMessage, Error = axum::Error> + Send>>;

/// Identifies one accepted duplex connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to write '{command}' frame: {reason}")]
    WriteFailed { command: Command, reason: String },
}

/// Read-only view of the channel's readiness bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub ready: bool,
    pub connection_id: Option<ConnectionId>,
    pub accepted_connections: u64,
    pub closed_connections: u64,
    pub last_transition_unix_ms: u64,
    pub relayed_frames: u64,
    pub last_relayed: Option<Command>,
}

/// Changes only when a connection is established or lost.
#[derive(Debug, Default)]
struct ReadinessState {
    ready: bool,
    connection_id: Option<ConnectionId>,
    accepted_connections: u64,
    closed_connections: u64,
    last_transition_unix_ms: u64,
}

#[derive(Debug, Default)]
struct RelayStats {
    relayed_frames: u64,
    last_relayed: Option<Command>,
}

struct AttachedSink {
    connection_id: ConnectionId,
    sink: OutboundSink,
}

/// Owns the client's duplex connection and the readiness flag derived from it.
///
/// Readiness flips to true when a connection is accepted and back to false when
/// that same connection is released. A second simultaneous connection replaces
/// the first as the relay target; the design assumes one logical client.
pub struct ControlChannel {
    readiness: Mutex<ReadinessState>,
    relays: Mutex<RelayStats>,
    outbound: tokio::sync::Mutex<Option<AttachedSink>>,
    next_connection_id: AtomicU64,
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlChannel {
    pub fn new() -> Self {
        Self {
            readiness: Mutex::new(ReadinessState::default()),
            relays: Mutex::new(RelayStats::default()),
            outbound: tokio::sync::Mutex::new(None),
            next_connection_id: AtomicU64::new(0),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.lock_readiness().ready
    }

    pub fn status(&self) -> ChannelStatus {
        let (relayed_frames, last_relayed) = {
            let relays = lock(&self.relays);
            (relays.relayed_frames, relays.last_relayed)
        };
        let readiness = self.lock_readiness();
        ChannelStatus {
            ready: readiness.ready,
            connection_id: readiness.connection_id,
            accepted_connections: readiness.accepted_connections,
            closed_connections: readiness.closed_connections,
            last_transition_unix_ms: readiness.last_transition_unix_ms,
            relayed_frames,
            last_relayed,
        }
    }

    /// Attaches the write half of a freshly accepted connection and marks the channel ready.
    pub async fn accept(&self, sink: OutboundSink) -> ConnectionId {
        let connection_id =
            ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut outbound = self.outbound.lock().await;
        if let Some(replaced) = outbound.as_ref() {
            tracing::warn!(
                component = COMPONENT,
                connection_id = connection_id.get(),
                replaced_connection_id = replaced.connection_id.get(),
                "second duplex connection accepted; relaying to the newest one"
            );
        }
        *outbound = Some(AttachedSink {
            connection_id,
            sink,
        });

        let mut readiness = self.lock_readiness();
        readiness.ready = true;
        readiness.connection_id = Some(connection_id);
        readiness.accepted_connections = readiness.accepted_connections.saturating_add(1);
        readiness.last_transition_unix_ms = current_unix_timestamp_ms();
        drop(readiness);

        tracing::info!(
            component = COMPONENT,
            connection_id = connection_id.get(),
            "duplex connection established"
        );
        connection_id
    }

    /// Marks `connection_id` terminated. Returns true only for the call that flipped readiness off.
    pub async fn release(&self, connection_id: ConnectionId) -> bool {
        let mut outbound = self.outbound.lock().await;
        if outbound
            .as_ref()
            .is_some_and(|attached| attached.connection_id == connection_id)
        {
            *outbound = None;
        }
        drop(outbound);

        let mut readiness = self.lock_readiness();
        if !readiness.ready || readiness.connection_id != Some(connection_id) {
            return false;
        }
        readiness.ready = false;
        readiness.connection_id = None;
        readiness.closed_connections = readiness.closed_connections.saturating_add(1);
        readiness.last_transition_unix_ms = current_unix_timestamp_ms();
        drop(readiness);

        tracing::error!(
            component = COMPONENT,
            connection_id = connection_id.get(),
            "duplex connection lost"
        );
        true
    }

    /// Writes `command` as a single text frame to the attached connection.
    ///
    /// Failures never touch readiness; the connection's own release does that.
    pub async fn send(&self, command: Command) -> Result<(), ChannelError> {
        let mut outbound = self.outbound.lock().await;
        let Some(attached) = outbound.as_mut() else {
            return Err(ChannelError::WriteFailed {
                command,
                reason: "no duplex connection attached".to_string(),
            });
        };

        let frame = encode_command_frame(command);
        let connection_id = attached.connection_id;
        if let Err(error) = attached.sink.send(WsMessage::Text(frame.into())).await {
            tracing::error!(
                component = COMPONENT,
                connection_id = connection_id.get(),
                command = command.as_str(),
                error = %error,
                "failed to write control frame"
            );
            return Err(ChannelError::WriteFailed {
                command,
                reason: error.to_string(),
            });
        }
        drop(outbound);

        {
            let mut relays = lock(&self.relays);
            relays.relayed_frames = relays.relayed_frames.saturating_add(1);
            relays.last_relayed = Some(command);
        }
        tracing::info!(
            component = COMPONENT,
            connection_id = connection_id.get(),
            command = command.as_str(),
            "control frame written"
        );
        Ok(())
    }

    /// Sends a normal-closure close frame to `connection_id` if it is still attached.
    pub async fn close(&self, connection_id: ConnectionId) {
        let mut outbound = self.outbound.lock().await;
        let Some(attached) = outbound
            .as_mut()
            .filter(|attached| attached.connection_id == connection_id)
        else {
            return;
        };
        let close = WsMessage::Close(Some(CloseFrame {
            code: NORMAL_CLOSURE_CODE,
            reason: "controller shutting down".into(),
        }));
        if let Err(error) = attached.sink.send(close).await {
            tracing::warn!(
                component = COMPONENT,
                connection_id = connection_id.get(),
                error = %error,
                "failed to send close frame"
            );
        }
    }

    fn lock_readiness(&self) -> MutexGuard<'_, ReadinessState> {
        lock(&self.readiness)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) async fn handle_duplex_upgrade(
    State(state): State<Arc<ServerState>>,
    websocket: WebSocketUpgrade,
) -> Response {
    websocket.on_upgrade(move |socket| run_duplex_connection(state, socket))
}

/// Drives one accepted connection. Inbound frames only prove liveness.
pub(crate) async fn run_duplex_connection(state: Arc<ServerState>, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let connection_id = state.channel.accept(Box::pin(sink)).await;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    None => {
                        tracing::info!(
                            component = COMPONENT,
                            connection_id = connection_id.get(),
                            "duplex stream ended"
                        );
                        break;
                    }
                    Some(Err(error)) => {
                        tracing::error!(
                            component = COMPONENT,
                            connection_id = connection_id.get(),
                            error = %error,
                            "failed to read from duplex connection"
                        );
                        break;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        tracing::info!(
                            component = COMPONENT,
                            connection_id = connection_id.get(),
                            code = frame.as_ref().map(|frame| frame.code),
                            "client closed duplex connection"
                        );
                        break;
                    }
                    Some(Ok(_)) => {
                        tracing::debug!(
                            component = COMPONENT,
                            connection_id = connection_id.get(),
                            "inbound frame observed"
                        );
                    }
                }
            }
            _ = state.shutdown.cancelled() => {
                state.channel.close(connection_id).await;
                break;
            }
        }
    }

    state.channel.release(connection_id).await;
}
