//! Job handlers this binary offers to `scheduler.job_types` entries.

use kona_scheduler::{handler_fn, HandlerCatalog, JobResult};
use serde_json::Value;
use tracing::info;

/// Every handler reference a configured job type may name.
pub fn catalog() -> HandlerCatalog {
    HandlerCatalog::new().with(
        "log",
        handler_fn(|_ctx, job| async move {
            let params = job.params.unwrap_or(Value::Null);
            info!(job_id = %job.id, code = %job.code, %params, "{}", job.name);
            Ok(JobResult::Completed)
        }),
    )
}
