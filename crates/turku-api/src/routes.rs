//! HTTP transport for the `/v1` protocol.
//!
//! Every operation is a `POST` with a JSON body and a JSON response. Errors
//! are returned as plain text with the status from [`ApiError::status`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;

use crate::broker::types::{
    AgentCheckinResponse, AgentRequest, AgentRestoreResponse, HealthResponse, SourceUpdateRequest,
    SourceUpdateResponse, StorageCheckinRequest, StorageCheckinResponse,
    StorageUpdateConfigRequest, StorageUpdateConfigResponse, UpdateConfigRequest,
    UpdateConfigResponse,
};
use crate::broker::{ApiError, Broker};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
}

/// A JSON request body.
///
/// Unlike [`axum::Json`], every rejection becomes [`ApiError::Transport`]
/// so clients always get a 400 with the parser's message.
pub struct JsonBody<T>(pub T);

fn is_json(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_json(&req) {
            return Err(ApiError::Transport(
                "Bad Content-Type (expected application/json)".to_string(),
            ));
        }
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::Transport(e.body_text()))?;
        serde_json::from_slice(&body)
            .map(Self)
            .map_err(|e| ApiError::Transport(e.to_string()))
    }
}

/// `POST /v1/update_config`
async fn update_config(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<UpdateConfigRequest>,
) -> Result<Json<UpdateConfigResponse>, ApiError> {
    state.broker.update_config(req).await.map(Json)
}

/// `POST /v1/agent_ping_checkin`
async fn agent_ping_checkin(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AgentRequest>,
) -> Result<Json<AgentCheckinResponse>, ApiError> {
    state.broker.agent_ping_checkin(req).await.map(Json)
}

/// `POST /v1/agent_ping_restore`
async fn agent_ping_restore(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<AgentRequest>,
) -> Result<Json<AgentRestoreResponse>, ApiError> {
    state.broker.agent_ping_restore(req).await.map(Json)
}

/// `POST /v1/storage_ping_checkin`
async fn storage_ping_checkin(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<StorageCheckinRequest>,
) -> Result<Json<StorageCheckinResponse>, ApiError> {
    state.broker.storage_ping_checkin(req).await.map(Json)
}

/// `POST /v1/storage_ping_source_update`
async fn storage_ping_source_update(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<SourceUpdateRequest>,
) -> Result<Json<SourceUpdateResponse>, ApiError> {
    state.broker.storage_ping_source_update(req).await.map(Json)
}

/// `POST /v1/storage_update_config`
async fn storage_update_config(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<StorageUpdateConfigRequest>,
) -> Result<Json<StorageUpdateConfigResponse>, ApiError> {
    state.broker.storage_update_config(req).await.map(Json)
}

/// `GET|POST /v1/health`
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state.broker.health().await.map(Json)
}

/// Build the application router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/update_config", post(update_config))
        .route("/v1/agent_ping_checkin", post(agent_ping_checkin))
        .route("/v1/agent_ping_restore", post(agent_ping_restore))
        .route("/v1/storage_ping_checkin", post(storage_ping_checkin))
        .route("/v1/storage_ping_source_update", post(storage_ping_source_update))
        .route("/v1/storage_update_config", post(storage_update_config))
        .route("/v1/health", get(health).post(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
