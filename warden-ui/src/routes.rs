//! HTTP route handlers for the UI API.

use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use tracing::warn;
use warden::rpc::{RpcRequest, RpcResponse, dispatch};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/rpc", post(rpc))
}

async fn health() -> &'static str {
    "ok"
}

/// POST /api/rpc - run one gateway operation against the selected workspace.
///
/// Gateway failures are still `200 OK` with `success: false`; only a body that
/// is not a known request is answered with `400`.
async fn rpc(
    State(state): State<AppState>,
    request: Result<Json<RpcRequest>, JsonRejection>,
) -> (StatusCode, Json<RpcResponse>) {
    let Json(request) = match request {
        Ok(request) => request,
        Err(rejection) => {
            warn!(err = %rejection.body_text(), "malformed rpc request");
            return (
                StatusCode::BAD_REQUEST,
                Json(RpcResponse::failure(rejection.body_text(), "INVALID_REQUEST")),
            );
        }
    };
    (StatusCode::OK, Json(dispatch(&state.host, request).await))
}
