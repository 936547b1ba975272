//! Outbound duplex session to the controller.
//!
//! One dial per session, no reconnect. The dial itself yields to the shutdown
//! token. Once connected, a reader task decodes frames and applies them
//! strictly in arrival order while the session loop observes a health ticker
//! and the shutdown token. On shutdown the session sends a normal-closure
//! close frame and gives the reader a bounded grace period to observe the
//! peer's close before returning. The reader task never outlives `run`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use rct_core::ShutdownToken;
use rct_protocol::NORMAL_CLOSURE_CODE;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

use crate::command_dispatch::{dispatch_text_frame, CommandHandler};

const COMPONENT: &str = "duplex_session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexSessionConfig {
    pub url: String,
    pub health_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for DuplexSessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8081/ws".to_string(),
            health_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to dial controller at '{url}': {reason}")]
    DialFailed { url: String, reason: String },
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested before the controller accepted the upgrade.
    InterruptedWhileDialing,
    /// The controller closed the connection or the stream ended.
    PeerClosed,
    /// Reading from the connection failed.
    ReadFailed(String),
    /// Shutdown was requested. `drained` reports whether the reader finished inside the grace period.
    Interrupted { drained: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReaderExit {
    PeerClosed,
    Failed(String),
}

/// Counts a live reader task for as long as the task's future exists.
struct ReaderGuard(Arc<AtomicUsize>);

impl ReaderGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct DuplexSession {
    config: DuplexSessionConfig,
    handler: Arc<dyn CommandHandler>,
    frames_received: Arc<AtomicU64>,
    active_readers: Arc<AtomicUsize>,
}

impl DuplexSession {
    pub fn new(config: DuplexSessionConfig, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            config,
            handler,
            frames_received: Arc::new(AtomicU64::new(0)),
            active_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Reader tasks whose futures have not been dropped yet. Zero whenever `run` is not executing.
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst)
    }

    /// Dials the controller once and drives the session until it ends.
    pub async fn run(&self, shutdown: ShutdownToken) -> Result<SessionEnd, SessionError> {
        let url = self.config.url.as_str();
        let dialed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!(component = COMPONENT, url, "interrupt received while dialing controller");
                return Ok(SessionEnd::InterruptedWhileDialing);
            }
            dialed = connect_async(url) => dialed,
        };
        let (stream, _response) = match dialed {
            Ok(connected) => connected,
            Err(error) => {
                tracing::error!(
                    component = COMPONENT,
                    url,
                    error = %error,
                    "failed to dial controller"
                );
                return Err(SessionError::DialFailed {
                    url: url.to_string(),
                    reason: error.to_string(),
                });
            }
        };
        tracing::info!(component = COMPONENT, url, "connected to controller");

        let (mut sink, source) = stream.split();
        let guard = ReaderGuard::enter(&self.active_readers);
        let handler = Arc::clone(&self.handler);
        let frames_received = Arc::clone(&self.frames_received);
        let mut reader = tokio::spawn(async move {
            let _guard = guard;
            read_frames(source, handler, frames_received).await
        });

        let mut health = tokio::time::interval_at(
            Instant::now() + self.config.health_interval,
            self.config.health_interval,
        );
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            tokio::select! {
                exit = &mut reader => {
                    break session_end_from_reader(exit);
                }
                _ = health.tick() => {
                    tracing::debug!(
                        component = COMPONENT,
                        frames_received = self.frames_received(),
                        "session health check"
                    );
                }
                _ = shutdown.cancelled() => {
                    tracing::info!(component = COMPONENT, "interrupt received; closing session");
                    let close = WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::from(NORMAL_CLOSURE_CODE),
                        reason: "client shutting down".into(),
                    }));
                    if let Err(error) = sink.send(close).await {
                        tracing::warn!(
                            component = COMPONENT,
                            error = %error,
                            "failed to send close frame"
                        );
                    }
                    let drained = drain_reader(&mut reader, self.config.shutdown_grace).await;
                    break SessionEnd::Interrupted { drained };
                }
            }
        };

        match &end {
            SessionEnd::ReadFailed(reason) => tracing::error!(
                component = COMPONENT,
                error = %reason,
                "session ended after read failure"
            ),
            other => tracing::info!(component = COMPONENT, end = ?other, "session ended"),
        }
        Ok(end)
    }
}

/// Waits up to `grace` for the reader, then aborts it and waits for the abort to land.
async fn drain_reader(reader: &mut JoinHandle<ReaderExit>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut *reader).await {
        Ok(_) => true,
        Err(_) => {
            tracing::warn!(
                component = COMPONENT,
                grace_ms = grace.as_millis() as u64,
                "controller did not complete close handshake within grace period"
            );
            reader.abort();
            if let Err(error) = (&mut *reader).await {
                if !error.is_cancelled() {
                    tracing::warn!(component = COMPONENT, error = %error, "reader task failed");
                }
            }
            false
        }
    }
}

fn session_end_from_reader(exit: Result<ReaderExit, tokio::task::JoinError>) -> SessionEnd {
    match exit {
        Ok(ReaderExit::PeerClosed) => SessionEnd::PeerClosed,
        Ok(ReaderExit::Failed(reason)) => SessionEnd::ReadFailed(reason),
        Err(error) => SessionEnd::ReadFailed(format!("reader task failed: {error}")),
    }
}

async fn read_frames<S>(
    mut source: S,
    handler: Arc<dyn CommandHandler>,
    frames_received: Arc<AtomicU64>,
) -> ReaderExit
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(message) = source.next().await {
        let message = match message {
            Ok(message) => message,
            Err(WsError::ConnectionClosed) => return ReaderExit::PeerClosed,
            Err(error) => return ReaderExit::Failed(error.to_string()),
        };
        match message {
            WsMessage::Text(text) => {
                frames_received.fetch_add(1, Ordering::Relaxed);
                dispatch_text_frame(handler.as_ref(), text.as_str());
            }
            WsMessage::Close(frame) => {
                tracing::info!(
                    component = COMPONENT,
                    code = frame.as_ref().map(|frame| u16::from(frame.code)),
                    "controller closed the connection"
                );
                return ReaderExit::PeerClosed;
            }
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {
                tracing::trace!(component = COMPONENT, "non-text frame observed");
            }
        }
    }
    ReaderExit::PeerClosed
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures_util::stream;
    use rct_protocol::Command;
    use rct_supervisor::SupervisorError;

    use super::*;

    #[derive(Default)]
    struct RecordingHandler {
        applied: Mutex<Vec<Command>>,
    }

    impl CommandHandler for RecordingHandler {
        fn apply(&self, command: Command) -> Result<(), SupervisorError> {
            self.applied.lock().expect("applied lock").push(command);
            Ok(())
        }
    }

    fn text(value: &str) -> Result<WsMessage, WsError> {
        Ok(WsMessage::Text(value.into()))
    }

    #[tokio::test]
    async fn functional_reader_applies_commands_in_arrival_order() {
        let handler = Arc::new(RecordingHandler::default());
        let frames = Arc::new(AtomicU64::new(0));
        let source = stream::iter(vec![text("run"), text("stop"), text("run")]);

        let exit = read_frames(source, handler.clone(), Arc::clone(&frames)).await;
        assert_eq!(exit, ReaderExit::PeerClosed);
        assert_eq!(
            *handler.applied.lock().expect("applied lock"),
            vec![Command::Start, Command::Stop, Command::Start]
        );
        assert_eq!(frames.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn regression_duplicate_run_frames_are_not_coalesced() {
        let handler = Arc::new(RecordingHandler::default());
        let source = stream::iter(vec![text("run"), text("run")]);
        read_frames(source, handler.clone(), Arc::new(AtomicU64::new(0))).await;
        assert_eq!(
            *handler.applied.lock().expect("applied lock"),
            vec![Command::Start, Command::Start]
        );
    }

    #[tokio::test]
    async fn regression_reader_skips_unknown_and_stops_at_close() {
        let handler = Arc::new(RecordingHandler::default());
        let source = stream::iter(vec![
            text("reboot"),
            Ok(WsMessage::Binary(vec![1_u8, 2, 3].into())),
            text("stop"),
            Ok(WsMessage::Close(None)),
            text("run"),
        ]);
        let exit = read_frames(source, handler.clone(), Arc::new(AtomicU64::new(0))).await;
        assert_eq!(exit, ReaderExit::PeerClosed);
        assert_eq!(
            *handler.applied.lock().expect("applied lock"),
            vec![Command::Stop]
        );
    }

    #[tokio::test]
    async fn regression_reader_reports_transport_errors_as_failures() {
        let handler = Arc::new(RecordingHandler::default());
        let source = stream::iter(vec![text("run"), Err(WsError::AlreadyClosed)]);
        let exit = read_frames(source, handler.clone(), Arc::new(AtomicU64::new(0))).await;
        assert!(matches!(exit, ReaderExit::Failed(_)));
        assert_eq!(
            *handler.applied.lock().expect("applied lock"),
            vec![Command::Start]
        );
    }

    #[test]
    fn unit_session_end_maps_join_results() {
        assert_eq!(
            session_end_from_reader(Ok(ReaderExit::PeerClosed)),
            SessionEnd::PeerClosed
        );
        assert_eq!(
            session_end_from_reader(Ok(ReaderExit::Failed("reset".to_string()))),
            SessionEnd::ReadFailed("reset".to_string())
        );
    }

    #[tokio::test]
    async fn regression_dial_failure_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
        let addr = listener.local_addr().expect("reserved addr");
        drop(listener);

        let session = DuplexSession::new(
            DuplexSessionConfig {
                url: format!("ws://{addr}/ws"),
                ..DuplexSessionConfig::default()
            },
            Arc::new(RecordingHandler::default()),
        );
        let error = session
            .run(ShutdownToken::new())
            .await
            .expect_err("nothing listening");
        let SessionError::DialFailed { url, .. } = error;
        assert_eq!(url, format!("ws://{addr}/ws"));
        assert_eq!(session.active_readers(), 0);
    }

    #[tokio::test]
    async fn regression_cancelled_token_skips_dial() {
        let shutdown = ShutdownToken::new();
        shutdown.cancel();
        let session = DuplexSession::new(
            DuplexSessionConfig {
                url: "ws://192.0.2.1:9/ws".to_string(),
                ..DuplexSessionConfig::default()
            },
            Arc::new(RecordingHandler::default()),
        );
        let end = tokio::time::timeout(Duration::from_secs(1), session.run(shutdown))
            .await
            .expect("returns without dialing")
            .expect("interrupt is not a dial failure");
        assert_eq!(end, SessionEnd::InterruptedWhileDialing);
    }

    #[tokio::test]
    async fn unit_reader_guard_tracks_task_lifetime() {
        let active = Arc::new(AtomicUsize::new(0));
        let guard = ReaderGuard::enter(&active);
        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        assert_eq!(active.load(Ordering::SeqCst), 1);
        task.abort();
        assert!(task.await.expect_err("aborted").is_cancelled());
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
