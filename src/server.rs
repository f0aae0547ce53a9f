use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::dict::{Dict, LdapDict, LookupResult};
use crate::error::DictError;

#[derive(Deserialize)]
pub struct LookupRequest {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub key: String,
    pub status: String,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
}

#[derive(Clone)]
struct AppState {
    dict: Arc<LdapDict>,
    // wakes the driver after a submit
    wake: Arc<Notify>,
}

/// Map a lookup result onto the HTTP status and body sent for it.
pub fn respond(key: String, result: LookupResult, elapsed_ms: f64) -> (StatusCode, LookupResponse) {
    let (code, status, value, error) = match result {
        LookupResult::Found(value) => (StatusCode::OK, "found", Some(value), None),
        LookupResult::Null => (StatusCode::OK, "null", None, None),
        LookupResult::NotFound => (StatusCode::OK, "not_found", None, None),
        LookupResult::Failed(e) => {
            let code = match e {
                DictError::NoSuchKey(_) => StatusCode::NOT_FOUND,
                DictError::Directory(_) | DictError::Connect(_) => StatusCode::BAD_GATEWAY,
                DictError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
                DictError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                DictError::Config(_) | DictError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (code, "error", None, Some(e.to_string()))
        }
    };
    (code, LookupResponse { key, status: status.into(), elapsed_ms, value, error })
}

/// One task drives the dict for all requests, so concurrent lookups never
/// wait on the same instance twice.
fn spawn_driver(dict: Arc<LdapDict>) -> Arc<Notify> {
    let wake = Arc::new(Notify::new());
    let signal = Arc::clone(&wake);
    tokio::spawn(async move {
        loop {
            signal.notified().await;
            if dict.is_closed() {
                break;
            }
            if let Err(e) = dict.drain().await {
                warn!(error = %e, "dict driver stopped");
                break;
            }
        }
    });
    wake
}

async fn lookup(State(state): State<AppState>, Query(req): Query<LookupRequest>) -> (StatusCode, Json<LookupResponse>) {
    let started = Instant::now();
    let handle = state.dict.submit(&req.key);
    state.wake.notify_one();
    let result = handle.await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    let (code, body) = respond(req.key, result, elapsed_ms);
    if code.is_success() {
        info!(key = %body.key, status = %body.status, ms = elapsed_ms, "lookup complete");
    } else {
        warn!(key = %body.key, code = code.as_u16(), error = body.error.as_deref().unwrap_or_default(), "lookup error");
    }
    (code, Json(body))
}

async fn set(State(state): State<AppState>, Json(req): Json<SetRequest>) -> (StatusCode, Json<LookupResponse>) {
    let result = match state.dict.set(&req.key, &req.value) {
        Ok(()) => LookupResult::Found(req.value),
        Err(e) => LookupResult::Failed(e),
    };
    let (code, body) = respond(req.key, result, 0.0);
    (code, Json(body))
}

/// Build the HTTP front for `dict`. Must be called from within a tokio
/// runtime, which hosts the driver task.
pub fn router(dict: Arc<LdapDict>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let wake = spawn_driver(Arc::clone(&dict));
    Router::new()
        .route("/v1/lookup", get(lookup))
        .route("/v1/set", post(set))
        .with_state(AppState { dict, wake })
        .layer(cors)
}
