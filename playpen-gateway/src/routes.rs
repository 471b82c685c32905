//! HTTP routes
//!
//! Status mapping: 200 for a successful run, 400 with a structured body for
//! user-attributable failures, 429 for rate limiting (queue saturation or a
//! failed Turnstile check), 500 for infrastructure faults. Error bodies
//! never carry internal details.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::{error, warn};

use playpen_common::{ExecutionRequest, ExecutionResponse, Language};
use playpen_sandbox::SandboxError;

use crate::dispatch::{DispatchError, Dispatcher};
use crate::store::{ShareStore, StoreError};
use crate::turnstile::TurnstileVerifier;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub store: Arc<ShareStore>,
    pub turnstile: Option<Arc<TurnstileVerifier>>,
}

/// Build the gateway router. `public_dir` is served read-only and holds
/// nothing but captured run artifacts.
pub fn create_router(state: AppState, public_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/run", post(handle_run))
        .route("/api/v1/share/get/:id", get(handle_share_get))
        .route("/api/v1/share/create", post(handle_share_create))
        .nest_service("/public", ServeDir::new(public_dir))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
pub struct RunPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: Option<String>,
}

async fn handle_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RunPayload>,
) -> Response {
    if let Some(verifier) = &state.turnstile {
        let token = header_str(&headers, "x-turnstile-token");
        let remote_ip = remote_ip(&headers);
        if !verifier.verify(token, remote_ip).await {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }

    let language = match payload.language.as_deref() {
        None => None,
        Some("js") | Some("javascript") => Some(Language::JavaScript),
        Some(other) => {
            let err = SandboxError::UnsupportedLanguage(other.to_string());
            return (
                StatusCode::BAD_REQUEST,
                Json(ExecutionResponse::error(err.to_string())),
            )
                .into_response();
        }
    };

    let request = ExecutionRequest {
        code: payload.code,
        language,
    };

    match state.dispatcher.dispatch(request).await {
        Ok(response) => {
            let status = if response.is_success() {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(response)).into_response()
        }
        Err(DispatchError::Busy) => {
            warn!("execution queue is full, rejecting request");
            StatusCode::TOO_MANY_REQUESTS.into_response()
        }
        Err(err) => {
            error!(error = %err, "run request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal server error" })),
            )
                .into_response()
        }
    }
}

async fn handle_share_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.get(&id).await {
        Ok(code) => Json(json!({ "code": code })).into_response(),
        Err(StoreError::NotFound) => (StatusCode::NOT_FOUND, Json(json!({}))).into_response(),
        Err(err) => {
            error!(error = %err, "could not get share key");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SharePayload {
    #[serde(default)]
    pub code: String,
}

async fn handle_share_create(
    State(state): State<AppState>,
    Json(payload): Json<SharePayload>,
) -> Response {
    match state.store.create(&payload.code).await {
        Ok(key) => Json(json!({ "key": key })).into_response(),
        Err(StoreError::TooLarge) => (StatusCode::BAD_REQUEST, Json(json!({}))).into_response(),
        Err(err) => {
            error!(error = %err, "could not create share key");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response()
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// First hop of X-Forwarded-For, as set by the ingress.
fn remote_ip(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
