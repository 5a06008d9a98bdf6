use axum::{
    routing::{get, post},
    Router,
};
use kona_core::config::KonaConfig;
use kona_scheduler::Scheduler;
use std::sync::Arc;
use std::time::Instant;

/// State shared by every admin handler.
pub struct AppState {
    pub config: KonaConfig,
    pub scheduler: Arc<Scheduler>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: KonaConfig, scheduler: Arc<Scheduler>) -> Self {
        Self {
            config,
            scheduler,
            started_at: Instant::now(),
        }
    }
}

/// Assemble the admin router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, jobs};

    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/jobs/{id}",
            get(jobs::get_job)
                .patch(jobs::update_job)
                .delete(jobs::remove_job),
        )
        .route("/job-types", get(jobs::list_job_types))
        .route("/job-types/{code}/exec", post(jobs::exec_job_type))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
