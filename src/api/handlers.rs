//! Request handlers.
//!
//! Success shapes vary per endpoint (the session endpoints return the pool
//! records, the snapshot endpoint returns the raw snapshot JSON), but every
//! failure is `{Status: "error", Message: ...}` with the status code the
//! contract prescribes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::types::{ConnectionInfo, ConnectionRequest, SessionRequest};

use super::ApiContext;

// ============================================================================
// Response envelopes
// ============================================================================

#[derive(Debug, Serialize)]
struct StatusMessage {
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Message")]
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(StatusMessage {
            status: "error",
            message: message.into(),
        }),
    )
        .into_response()
}

fn ok_message(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(StatusMessage {
            status: "ok",
            message: message.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Session management
// ============================================================================

/// Successful create: the committed pool record.
#[derive(Debug, Serialize)]
struct ConnectResponse {
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Connection")]
    connection: ConnectionInfo,
}

/// POST /api/v1/connect - validate an endpoint's probe and create a session
pub async fn create_connection(
    State(context): State<ApiContext>,
    Json(request): Json<ConnectionRequest>,
) -> Response {
    if request.endpoint_url.is_empty() || request.model.is_empty() {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "EndpointURL and Model are required",
        );
    }

    match context.sessions.create(request).await {
        Ok(connection) => (
            StatusCode::OK,
            Json(ConnectResponse {
                status: "ok",
                connection,
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Pool listing.
#[derive(Debug, Serialize)]
struct PoolResponse {
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "PoolSize")]
    pool_size: usize,
    #[serde(rename = "Connections")]
    connections: Vec<ConnectionInfo>,
}

/// GET /api/v1/connect - list the session pool
pub async fn get_connections(State(context): State<ApiContext>) -> Response {
    let connections = context.sessions.get_all();
    (
        StatusCode::OK,
        Json(PoolResponse {
            status: "ok",
            pool_size: connections.len(),
            connections,
        }),
    )
        .into_response()
}

/// DELETE /api/v1/connect - delete a session and stop its poller
pub async fn delete_connection(
    State(context): State<ApiContext>,
    Json(request): Json<SessionRequest>,
) -> Response {
    match context.sessions.delete(&request.session_id) {
        Ok(()) => ok_message(format!("session '{}' deleted", request.session_id)),
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// Health-check response; the connection record reflects the refreshed flags.
#[derive(Debug, Serialize)]
struct CheckResponse {
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Message", skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(rename = "Connection")]
    connection: ConnectionInfo,
}

/// POST /api/v1/connect/check - probe a session's endpoint health
pub async fn check_connection(
    State(context): State<ApiContext>,
    Json(request): Json<SessionRequest>,
) -> Response {
    match context.sessions.check(&request.session_id).await {
        Ok(outcome) => match outcome.error {
            None => (
                StatusCode::OK,
                Json(CheckResponse {
                    status: "healthy",
                    message: None,
                    connection: outcome.info,
                }),
            )
                .into_response(),
            Some(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(CheckResponse {
                    status: "unhealthy",
                    message: Some(e.to_string()),
                    connection: outcome.info,
                }),
            )
                .into_response(),
        },
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

// ============================================================================
// Polling lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PollingStartParams {
    interval: Option<String>,
}

/// GET /api/v1/polling/start?interval=<ms> - start polling for every healthy
/// session at the given interval
pub async fn start_polling(
    State(context): State<ApiContext>,
    Query(params): Query<PollingStartParams>,
) -> Response {
    let Some(raw) = params.interval else {
        return error_response(StatusCode::BAD_REQUEST, "missing 'interval' query parameter");
    };
    let interval_ms: u64 = match raw.parse() {
        Ok(value) if value > 0 => value,
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid polling interval '{raw}': expected a positive integer of milliseconds"),
            );
        }
    };

    let connections = context.sessions.get_all();
    let interval = Duration::from_millis(interval_ms);
    info!(
        interval_ms,
        sessions = connections.len(),
        "Global polling start requested"
    );

    match context.scheduler.start_all(&connections, interval) {
        Ok(()) => ok_message(format!(
            "polling started for {} session(s) at {interval_ms}ms",
            connections.iter().filter(|c| c.is_healthy).count()
        )),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /api/v1/polling/stop - stop every active poller
pub async fn stop_polling(State(context): State<ApiContext>) -> Response {
    context.scheduler.stop_all();
    info!("Global polling stopped");
    ok_message("polling stopped")
}

// ============================================================================
// Snapshots
// ============================================================================

/// GET /api/:machineId/current - latest snapshot for a machine
pub async fn get_machine_current(
    State(context): State<ApiContext>,
    Path(machine_id): Path<String>,
) -> Response {
    match context.store.get(&machine_id) {
        Some(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("no snapshot found for machine '{machine_id}'"),
        ),
    }
}
