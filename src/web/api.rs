//! Defines the Axum API routes and handlers.

use crate::gateway::parse_command;
use crate::web::controller_channel::ControllerRequest;
use crate::web::models::ActionResponse;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::mpsc::Sender;

pub type AppState = Sender<ControllerRequest>;

/// Helper to create a JSON error response with a tag and status code
fn json_error(tag: &str, status: StatusCode) -> axum::response::Response {
    (status, Json(ActionResponse::error(tag))).into_response()
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(controller_tx: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/action", post(post_action))
        .with_state(controller_tx)
}

/// Handler to get the current job status.
async fn get_status(State(controller_tx): State<AppState>) -> axum::response::Response {
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if controller_tx
        .send(ControllerRequest::GetStatus { respond_to: resp_tx })
        .await
        .is_err()
    {
        return json_error("controller_unavailable", StatusCode::INTERNAL_SERVER_ERROR);
    }
    match resp_rx.await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(_) => json_error("controller_unavailable", StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Handler for start, stop and emergency commands.
///
/// The body is parsed here so malformed requests are answered without touching the
/// controller.
async fn post_action(State(controller_tx): State<AppState>, body: String) -> axum::response::Response {
    let command = match parse_command(&body) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!("Rejected action: {}", e);
            return json_error(e.tag(), StatusCode::BAD_REQUEST);
        }
    };
    let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
    if controller_tx
        .send(ControllerRequest::Action {
            command,
            respond_to: resp_tx,
        })
        .await
        .is_err()
    {
        return json_error("controller_unavailable", StatusCode::INTERNAL_SERVER_ERROR);
    }
    match resp_rx.await {
        Ok(reply) if reply.ok => (StatusCode::OK, Json(reply)).into_response(),
        Ok(reply) => (StatusCode::CONFLICT, Json(reply)).into_response(),
        Err(_) => json_error("controller_unavailable", StatusCode::INTERNAL_SERVER_ERROR),
    }
}
