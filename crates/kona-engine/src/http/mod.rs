pub mod health;
pub mod jobs;

use axum::{http::StatusCode, Json};
use kona_scheduler::SchedulerError;
use serde_json::{json, Value};

/// Error half of every admin handler's return type.
pub type ApiError = (StatusCode, Json<Value>);

/// Map a scheduler error onto the platform error body and its HTTP status.
pub fn api_error(e: SchedulerError) -> ApiError {
    let status =
        StatusCode::from_u16(e.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %e, "request failed");
    }
    (
        status,
        Json(json!({
            "error": e.code(),
            "error_description": e.to_string(),
        })),
    )
}
