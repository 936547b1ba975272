use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rct_protocol::Command;
use thiserror::Error;

use crate::control_channel::{ChannelError, ChannelStatus, ControlChannel};
use crate::server_bootstrap::ServerState;

const COMPONENT: &str = "admin_endpoint";

pub const ADMIN_CONTROL_ENDPOINT: &str = "/control";
pub const ADMIN_STATUS_ENDPOINT: &str = "/control/status";

pub const TURNED_ON_BODY: &str = "Turned on";
pub const TURNED_OFF_BODY: &str = "Turned off";
pub const NOT_READY_BODY: &str = "Client not ready";
pub const METHOD_NOT_ALLOWED_BODY: &str = "Method not allowed";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("method '{method}' is not supported on /control")]
    MethodNotAllowed { method: String },
    #[error("no client duplex connection is established")]
    ChannelNotReady,
    #[error("failed to relay command: {0}")]
    RelayFailed(#[from] ChannelError),
}

impl AdminError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdminError::MethodNotAllowed { .. } => StatusCode::BAD_REQUEST,
            AdminError::ChannelNotReady | AdminError::RelayFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> String {
        match self {
            AdminError::MethodNotAllowed { .. } => METHOD_NOT_ALLOWED_BODY.to_string(),
            AdminError::ChannelNotReady => NOT_READY_BODY.to_string(),
            AdminError::RelayFailed(error) => error.to_string(),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (self.status_code(), self.body()).into_response()
    }
}

/// Maps an admin request method onto a relayed command.
///
/// The method check precedes the readiness check, so a wrong method is a 400
/// even while the client is disconnected.
pub async fn relay_admin_command(
    channel: &ControlChannel,
    method: &Method,
) -> Result<&'static str, AdminError> {
    let Some(command) = Command::from_admin_method(method.as_str()) else {
        return Err(AdminError::MethodNotAllowed {
            method: method.to_string(),
        });
    };
    if !channel.is_ready() {
        return Err(AdminError::ChannelNotReady);
    }
    channel.send(command).await?;
    Ok(match command {
        Command::Start => TURNED_ON_BODY,
        Command::Stop => TURNED_OFF_BODY,
    })
}

pub(crate) async fn handle_admin_control(
    State(state): State<Arc<ServerState>>,
    method: Method,
) -> Response {
    match relay_admin_command(&state.channel, &method).await {
        Ok(body) => {
            tracing::info!(
                component = COMPONENT,
                method = %method,
                body,
                "admin command relayed"
            );
            (StatusCode::OK, body).into_response()
        }
        Err(error) => {
            match &error {
                AdminError::ChannelNotReady => tracing::info!(
                    component = COMPONENT,
                    method = %method,
                    "admin command refused; client not connected"
                ),
                AdminError::MethodNotAllowed { .. } => tracing::warn!(
                    component = COMPONENT,
                    method = %method,
                    "admin command refused; unsupported method"
                ),
                AdminError::RelayFailed(_) => tracing::error!(
                    component = COMPONENT,
                    method = %method,
                    error = %error,
                    "admin command relay failed"
                ),
            }
            error.into_response()
        }
    }
}

pub(crate) async fn handle_admin_status(
    State(state): State<Arc<ServerState>>,
) -> Json<ChannelStatus> {
    Json(state.channel.status())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use axum::body::{to_bytes, Body};
    use axum::extract::ws::Message as WsMessage;
    use axum::http::Request;
    use futures_util::sink;
    use rct_core::ShutdownToken;
    use tower::ServiceExt;

    use super::*;
    use crate::control_channel::OutboundSink;
    use crate::server_bootstrap::build_admin_router;

    fn recording_sink() -> (OutboundSink, Arc<StdMutex<Vec<String>>>) {
        let recorded = Arc::new(StdMutex::new(Vec::new()));
        let target = Arc::clone(&recorded);
        let sink = sink::unfold(target, |target, message: WsMessage| async move {
            if let WsMessage::Text(text) = message {
                target
                    .lock()
                    .expect("recorded lock")
                    .push(text.as_str().to_string());
            }
            Ok::<_, axum::Error>(target)
        });
        (Box::pin(sink), recorded)
    }

    async fn call(state: Arc<ServerState>, method: Method, uri: &str) -> (StatusCode, String) {
        let response = build_admin_router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body bytes");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[test]
    fn unit_admin_error_status_codes() {
        assert_eq!(
            AdminError::MethodNotAllowed {
                method: "GET".to_string()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AdminError::ChannelNotReady.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn functional_post_before_connect_reports_not_ready() {
        let state = ServerState::new(ShutdownToken::new());
        let (status, body) = call(state, Method::POST, ADMIN_CONTROL_ENDPOINT).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, NOT_READY_BODY);
    }

    #[tokio::test]
    async fn functional_post_and_delete_relay_commands_when_ready() {
        let state = ServerState::new(ShutdownToken::new());
        let (sink, recorded) = recording_sink();
        state.channel.accept(sink).await;

        let (status, body) = call(Arc::clone(&state), Method::POST, ADMIN_CONTROL_ENDPOINT).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, TURNED_ON_BODY));
        let (status, body) =
            call(Arc::clone(&state), Method::DELETE, ADMIN_CONTROL_ENDPOINT).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, TURNED_OFF_BODY));

        assert_eq!(
            *recorded.lock().expect("recorded lock"),
            vec!["run".to_string(), "stop".to_string()]
        );
    }

    #[tokio::test]
    async fn regression_other_methods_are_bad_request_even_when_not_ready() {
        let state = ServerState::new(ShutdownToken::new());
        for method in [Method::GET, Method::PUT, Method::PATCH] {
            let (status, body) = call(Arc::clone(&state), method, ADMIN_CONTROL_ENDPOINT).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, METHOD_NOT_ALLOWED_BODY);
        }
    }

    #[tokio::test]
    async fn regression_post_after_release_reports_not_ready_again() {
        let state = ServerState::new(ShutdownToken::new());
        let (sink, recorded) = recording_sink();
        let connection_id = state.channel.accept(sink).await;
        state.channel.release(connection_id).await;

        let (status, _) = call(Arc::clone(&state), Method::POST, ADMIN_CONTROL_ENDPOINT).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(recorded.lock().expect("recorded lock").is_empty());
    }

    #[tokio::test]
    async fn functional_status_endpoint_reports_channel_state() {
        let state = ServerState::new(ShutdownToken::new());
        let (sink, _) = recording_sink();
        state.channel.accept(sink).await;

        let (status, body) = call(state, Method::GET, ADMIN_STATUS_ENDPOINT).await;
        assert_eq!(status, StatusCode::OK);
        let payload: serde_json::Value = serde_json::from_str(&body).expect("status json");
        assert_eq!(payload["ready"], true);
        assert_eq!(payload["accepted_connections"], 1);
        assert_eq!(payload["connection_id"], 1);
    }
}
