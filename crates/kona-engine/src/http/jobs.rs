//! Job administration endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use kona_scheduler::{Job, JobDraft, JobPatch, JobStatus};
use kona_store::Criteria;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{api_error, ApiError};
use crate::app::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<JobStatus>,
    pub group: Option<String>,
    pub code: Option<String>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl ListQuery {
    fn criteria(&self) -> Criteria {
        let mut criteria = Criteria::new();
        if let Some(status) = self.status {
            criteria = criteria.eq("status", status);
        }
        if let Some(group) = &self.group {
            criteria = criteria.eq("group", group.as_str());
        }
        if let Some(code) = &self.code {
            criteria = criteria.eq("code", code.as_str());
        }
        criteria
    }
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    state
        .scheduler
        .find(&query.criteria(), query.skip, query.limit)
        .map(Json)
        .map_err(api_error)
}

/// POST /jobs
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<JobDraft>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = state.scheduler.create(draft).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state.scheduler.get(&id).map(Json).map_err(api_error)
}

/// PATCH /jobs/{id}
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<JobPatch>,
) -> Result<Json<Value>, ApiError> {
    let updated = state.scheduler.update(id, patch).map_err(api_error)?;
    Ok(Json(json!(updated)))
}

/// DELETE /jobs/{id}
pub async fn remove_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = state.scheduler.remove(&id).map_err(api_error)?;
    Ok(Json(json!({ "id": id })))
}

/// GET /job-types
pub async fn list_job_types(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.scheduler.registered_job_types()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecRequest {
    /// Stored job to run the type against; an unsaved one when absent.
    pub job_id: Option<String>,
    pub params: Option<Value>,
}

/// POST /job-types/{code}/exec
///
/// Runs the handler inline and returns its result. The job's stored status
/// is not touched.
pub async fn exec_job_type(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<Value>, ApiError> {
    let job = match &request.job_id {
        Some(id) => state.scheduler.get(id).map_err(api_error)?,
        None => Job::transient(&code, None),
    };
    info!(code = %code, job_id = %job.id, "direct job type execution");
    let result = state
        .scheduler
        .exec(&code, &job, request.params)
        .await
        .map_err(api_error)?;
    Ok(Json(json!(result)))
}
