use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kmscrypt::{KeyProvider, KeyProviderError};
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    provider: Arc<KeyProvider>,
    permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(provider: KeyProvider, max_concurrent_requests: usize) -> Self {
        Self {
            provider: Arc::new(provider),
            permits: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/v1/wrapkey", post(wrap_key))
        .route("/v1/unwrapkey", post(unwrap_key))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn wrap_key(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    log::info!("got WrapKey");
    serve(state, body, |provider, input| provider.handle_wrap(input)).await
}

async fn unwrap_key(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    log::info!("got UnWrapKey");
    serve(state, body, |provider, input| provider.handle_unwrap(input)).await
}

/// Run one operation on the blocking pool, since the KMS round trip blocks.
async fn serve<F>(state: AppState, body: Bytes, op: F) -> Result<Response, AppError>
where
    F: FnOnce(&KeyProvider, &[u8]) -> kmscrypt::Result<Vec<u8>> + Send + 'static,
{
    let permit = state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| AppError::Internal("server is shutting down".into()))?;

    // The permit lives as long as the KMS call, even if the client hangs up
    // and this future is dropped.
    let provider = state.provider.clone();
    let output = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        op(&provider, &body)
    })
    .await
    .map_err(|e| AppError::Internal(format!("request task failed: {e}")))??;

    Ok(([(header::CONTENT_TYPE, "application/json")], output).into_response())
}

#[derive(Debug)]
pub enum AppError {
    KeyProvider(KeyProviderError),
    Internal(String),
}

impl From<KeyProviderError> for AppError {
    fn from(err: KeyProviderError) -> Self {
        Self::KeyProvider(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::KeyProvider(err) if err.is_request_error() => {
                (StatusCode::BAD_REQUEST, err.to_string())
            }
            Self::KeyProvider(err @ KeyProviderError::Backend(_)) => {
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            Self::KeyProvider(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        log::warn!("request failed ({status}): {message}");
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
