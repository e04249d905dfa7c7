use super::{handle_execute, handle_plan, ApiResponse, ApiState};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/plan", post(plan))
        .route("/execute", post(execute))
        .with_state(state)
}

pub async fn serve(state: Arc<ApiState>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

fn api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn into_response(response: ApiResponse) -> Response {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

fn join_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "ok": false,
            "error": { "code": "internal_error", "message": "request task failed" },
        })),
    )
        .into_response()
}

// Handlers are synchronous (blocking HTTP clients inside), so each request
// moves to the blocking pool.
async fn execute(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = api_key(&headers);
    let result = tokio::task::spawn_blocking(move || {
        handle_execute(state.as_ref(), key.as_deref(), &body)
    })
    .await;
    match result {
        Ok(response) => into_response(response),
        Err(_) => join_error(),
    }
}

async fn plan(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = api_key(&headers);
    let result =
        tokio::task::spawn_blocking(move || handle_plan(state.as_ref(), key.as_deref(), &body))
            .await;
    match result {
        Ok(response) => into_response(response),
        Err(_) => join_error(),
    }
}
