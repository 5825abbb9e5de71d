//! Router and handlers for the relay's HTTP surface.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use clarity_relay::{Relay, RelayError, RpcRequest};

/// Log target for HTTP handling.
const HTTP_TARGET: &str = "clarity_relayd::http";

/// Shared handler state: the single relay instance built at process start.
#[derive(Clone)]
pub struct AppState {
    relay: Relay,
}

/// Builds the daemon router around the given relay.
pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/health", get(health))
        .with_state(AppState { relay })
}

/// Error payload: a success flag and a message, never a backtrace.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

/// Maps relay failures onto HTTP statuses: 503 while the worker is not
/// ready, 500 for everything else (timeout, death, delivery failure).
fn status_for(error: &RelayError) -> StatusCode {
    match error {
        RelayError::NotReady | RelayError::AlreadyRunning => StatusCode::SERVICE_UNAVAILABLE,
        RelayError::Timeout { .. }
        | RelayError::ProcessDied
        | RelayError::WriteFailure { .. }
        | RelayError::BinaryNotFound { .. }
        | RelayError::SpawnFailed { .. }
        | RelayError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn rpc(
    State(state): State<AppState>,
    body: Result<Json<RpcRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let relay = state.relay.clone();
    let outcome = tokio::task::spawn_blocking(move || relay.submit(&request)).await;

    match outcome {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(error)) => {
            warn!(target: HTTP_TARGET, error = %error, "rpc relay failed");
            error_response(status_for(&error), error.to_string())
        }
        Err(join_error) => {
            warn!(target: HTTP_TARGET, error = %join_error, "rpc relay task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "relay task failed")
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    state: clarity_relay::WorkerState,
    timestamp: String,
    pending: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    Json(HealthBody {
        state: state.relay.worker_state(),
        timestamp,
        pending: state.relay.pending(),
    })
}
