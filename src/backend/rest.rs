//! Thin config-CRUD REST surface toward the UI: publishes config
//! messages onto the event fabric rather than mutating any state
//! itself. Grounded on
//! `original_source/backend/app/api/routers/{cloud_config,
//! suspicion_config,sse}.py`.

use super::{sse::sse_handler, ws::ws_handler, BackendState};
use crate::broker::{CloudProviderConfigMessage, SuspicionConfigMessage};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// The UI consuming this REST/SSE/WS surface is an external collaborator
/// (out of scope per spec.md §1) served from its own origin, so the
/// browser needs CORS enabled on every route here.
pub fn build_router(state: BackendState) -> Router {
    Router::new()
        .route("/api/register_provider", post(register_provider))
        .route("/api/delete_provider", delete(delete_provider))
        .route("/api/suspicion_config", post(suspicion_config))
        .route("/api/sse", get(sse_handler))
        .route("/ws/video", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
struct RegisterProviderRequest {
    provider_name: String,
    connection_ip: String,
    server_certification: String,
}

async fn register_provider(
    State(state): State<BackendState>,
    Json(request): Json<RegisterProviderRequest>,
) -> impl IntoResponse {
    let message = CloudProviderConfigMessage {
        provider_name: request.provider_name,
        connection_ip: request.connection_ip,
        server_certification: request.server_certification,
        delete: false,
    };
    match state.broker.publish_cloud_provider_config(&message).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteProviderRequest {
    provider_name: String,
}

async fn delete_provider(
    State(state): State<BackendState>,
    Json(request): Json<DeleteProviderRequest>,
) -> impl IntoResponse {
    let message = CloudProviderConfigMessage {
        provider_name: request.provider_name,
        connection_ip: String::new(),
        server_certification: String::new(),
        delete: true,
    };
    match state.broker.publish_cloud_provider_config(&message).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))),
    }
}

#[derive(Debug, Deserialize)]
struct SuspicionConfigRequest {
    suspicion_level: i64,
    #[serde(default)]
    class_weights: std::collections::HashMap<String, f64>,
}

async fn suspicion_config(
    State(state): State<BackendState>,
    Json(request): Json<SuspicionConfigRequest>,
) -> impl IntoResponse {
    let message = SuspicionConfigMessage {
        threshold: request.suspicion_level,
        class_weights: request.class_weights,
    };
    match state.broker.publish_suspicion_config(&message).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))),
        Err(e) => (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))),
    }
}
