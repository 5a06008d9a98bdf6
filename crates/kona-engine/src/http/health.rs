use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with build, uptime and scheduler settings.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let scheduler = &state.config.scheduler;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "build": env!("KONA_GIT_SHA"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "job_types": state.scheduler.registered_job_types().len(),
        "poll_frequency": scheduler.frequency,
        "claim_ttl_secs": scheduler.claim_ttl_secs,
    }))
}
