//! Administrative HTTP surface: liveness, backend readiness and runtime
//! schema mapping.

use crate::cancel::CancelRegistry;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use pgbridge_bridge::Bridge;
use pgbridge_core::{SchemaMapping, SchemaMappingHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AdminState {
    pub bridge: Arc<Bridge>,
    pub mapping: SchemaMappingHandle,
    pub cancel: Arc<CancelRegistry>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/schema-mapping", get(get_mapping).put(put_mapping))
        .with_state(state)
}

pub async fn serve(addr: &str, state: AdminState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "admin listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub sessions: usize,
    pub pool_idle: usize,
    pub pool_in_use: usize,
}

pub async fn ready(State(state): State<AdminState>) -> (StatusCode, Json<Readiness>) {
    let probe = state.bridge.health().await;
    let pool = state.bridge.pool_status();
    let (status, latency_ms, error) = match probe {
        Ok(latency) => (StatusCode::OK, Some(latency.as_millis() as u64), None),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, None, Some(err.to_string())),
    };
    let body = Readiness {
        ready: status == StatusCode::OK,
        latency_ms,
        error,
        sessions: state.cancel.len(),
        pool_idle: pool.idle,
        pool_in_use: pool.in_use,
    };
    (status, Json(body))
}

pub async fn get_mapping(State(state): State<AdminState>) -> Json<SchemaMapping> {
    Json(state.mapping.get())
}

/// Either `backend_schema` alone (remaps `public`) or both names.
#[derive(Debug, Default, Deserialize)]
pub struct MappingUpdate {
    pub backend_schema: Option<String>,
    pub client_schema: Option<String>,
}

pub async fn put_mapping(
    State(state): State<AdminState>,
    Json(update): Json<MappingUpdate>,
) -> Result<Json<SchemaMapping>, (StatusCode, String)> {
    let pair = update
        .client_schema
        .as_deref()
        .zip(update.backend_schema.as_deref());
    state
        .mapping
        .configure(update.backend_schema.as_deref(), pair)
        .map(Json)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))
}
