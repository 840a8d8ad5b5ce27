//! Trigger routes.
//!
//! The external scheduler drives the engine through `POST /tick`. The
//! response carries the tick summary, or a machine-readable
//! `already_running` status when another orchestrator holds the lease.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use chime_dispatch::TickOrchestrator;
use chime_store::{StateManager, Store};

use crate::WebError;

/// Shared state for the trigger surface.
pub struct AppState {
    pub orchestrator: Arc<TickOrchestrator>,
    pub store: Arc<dyn Store>,
}

/// Create the trigger router.
pub fn create_router(orchestrator: Arc<TickOrchestrator>, store: Arc<dyn Store>) -> Router {
    let state = Arc::new(AppState {
        orchestrator,
        store,
    });

    Router::new()
        .route("/health", get(health))
        .route("/tick", post(tick))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Run one tick and report what it did.
async fn tick(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, WebError> {
    let outcome = state.orchestrator.run_tick().await?;
    Ok(Json(outcome))
}

/// Last-tick bookkeeping plus ledger counts, for dashboards.
async fn status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, WebError> {
    let last_tick_at = StateManager::new(Arc::clone(&state.store))
        .last_tick_at()
        .await?;
    let occurrences = state.store.status_counts().await?;

    Ok(Json(json!({
        "lastTickAt": last_tick_at,
        "occurrences": occurrences,
    })))
}
