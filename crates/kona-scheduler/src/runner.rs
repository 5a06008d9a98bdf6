use std::sync::Arc;

use async_trait::async_trait;
use kona_store::{AuditLog, Criteria};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::jobs::JobStore;
use crate::queue::JobStarter;
use crate::registry::{JobContext, JobTypeRegistry};
use crate::types::{Job, JobPatch, JobResult, JobStatus};

const AUDIT_CONTEXT: &str = "scheduler";

/// Executes one job and persists its outcome.
///
/// Never fails towards its caller: handler errors and panics become a
/// `failed` job, store errors during bookkeeping are logged.
pub struct JobRunner {
    jobs: JobStore,
    registry: Arc<JobTypeRegistry>,
    ctx: JobContext,
    audit: AuditLog,
    /// User id written into audit entries.
    actor: String,
}

impl JobRunner {
    pub fn new(
        jobs: JobStore,
        registry: Arc<JobTypeRegistry>,
        ctx: JobContext,
        audit: AuditLog,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            registry,
            ctx,
            audit,
            actor: actor.into(),
        }
    }

    pub async fn run_job(&self, job: Job) {
        if let Err(e) = self.jobs.update_one(&job.id, JobPatch::status(JobStatus::Running)) {
            error!(job_id = %job.id, error = %e, "could not mark job running");
            self.fail(&job, Value::String(e.to_string()));
            return;
        }
        self.audit(&job, "started");
        info!(job_id = %job.id, job_type = %job.job_type, group = %job.group, "job started");

        match self.execute(&job).await {
            JobResult::Completed => self.complete(&job),
            JobResult::Failed { error } => self.fail(&job, error),
            JobResult::Reschedule { state } => self.reschedule(&job, state),
        }
    }

    /// Run the handler on its own task so a panic is contained.
    async fn execute(&self, job: &Job) -> JobResult {
        let registry = Arc::clone(&self.registry);
        let ctx = self.ctx.clone();
        let task_job = job.clone();
        let outcome = tokio::spawn(async move {
            registry.exec(&task_job.job_type, &ctx, &task_job).await
        })
        .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => JobResult::failed(e.to_string()),
            Err(e) => JobResult::failed(format!("Job handler aborted: {e}")),
        }
    }

    fn complete(&self, job: &Job) {
        self.audit(job, "completed");
        info!(job_id = %job.id, "job completed");
        if let Err(e) = self.jobs.update_one(&job.id, JobPatch::status(JobStatus::Completed)) {
            error!(job_id = %job.id, error = %e, "could not mark job completed");
        }
    }

    fn fail(&self, job: &Job, error: Value) {
        self.audit(job, "failed");
        warn!(job_id = %job.id, error = %error, "job failed");
        if let Err(e) = self.jobs.update_one(&job.id, JobPatch::failed(error)) {
            error!(job_id = %job.id, error = %e, "could not mark job failed");
        }
    }

    fn reschedule(&self, job: &Job, state: Option<Value>) {
        let Some(state) = state else {
            warn!(job_id = %job.id, "reschedule requested without state; job left running");
            return;
        };
        let patch = JobPatch::status(JobStatus::Ready).clear_claim().with_state(state);
        match self.jobs.update_where(&Criteria::by_id(&job.id), patch) {
            Ok(_) => info!(job_id = %job.id, "job rescheduled"),
            Err(e) => error!(job_id = %job.id, error = %e, "could not reschedule job"),
        }
    }

    fn audit(&self, job: &Job, verb: &str) {
        let message = format!("{} {verb}", job.label());
        if let Err(e) = self.audit.record(&self.actor, AUDIT_CONTEXT, &message) {
            warn!(job_id = %job.id, error = %e, "audit write failed");
        }
    }
}

#[async_trait]
impl JobStarter for JobRunner {
    async fn start(&self, job: Job) {
        self.run_job(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::handler_fn;
    use crate::types::JobDraft;
    use kona_events::EventBus;
    use kona_store::{AuditLog, DocumentStore, Page, SqliteStore};
    use serde_json::json;

    struct Fixture {
        jobs: JobStore,
        audit: AuditLog,
        runner: JobRunner,
        registry: Arc<JobTypeRegistry>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let jobs = JobStore::new(Arc::clone(&store), "system");
        let audit = AuditLog::new(Arc::clone(&store), "system");
        let registry = Arc::new(JobTypeRegistry::new());
        let ctx = JobContext {
            events: Arc::new(EventBus::new()),
            store,
        };
        let runner = JobRunner::new(jobs.clone(), Arc::clone(&registry), ctx, audit.clone(), "system");
        Fixture {
            jobs,
            audit,
            runner,
            registry,
        }
    }

    fn with_result(f: &Fixture, result: JobResult) -> Job {
        f.registry.register(
            "Fixed",
            "fixed",
            handler_fn(move |_, _| {
                let result = result.clone();
                async move { Ok(result) }
            }),
        );
        let draft: JobDraft = serde_json::from_value(json!({
            "name": "Nightly",
            "type": "fixed",
            "run": {"model": "now"}
        }))
        .unwrap();
        f.jobs.create(draft).unwrap()
    }

    fn audit_messages(f: &Fixture) -> Vec<String> {
        f.audit
            .find(&Criteria::new(), Page::all())
            .unwrap()
            .into_iter()
            .map(|d| d.data["message"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn completed_job_is_marked_and_audited() {
        let f = fixture();
        let job = with_result(&f, JobResult::Completed);
        f.runner.start(job.clone()).await;

        assert_eq!(f.jobs.get(&job.id).unwrap().status, JobStatus::Completed);
        let messages = audit_messages(&f);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].ends_with("started"));
        assert_eq!(messages[1], format!("Nightly ({}) [fixed] completed", job.id));
    }

    #[tokio::test]
    async fn failed_result_stores_error() {
        let f = fixture();
        let job = with_result(&f, JobResult::failed("boom"));
        f.runner.start(job.clone()).await;

        let stored = f.jobs.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error, Some(json!("boom")));
        let messages = audit_messages(&f);
        assert!(messages.iter().any(|m| m.contains("Nightly") && m.ends_with("failed")));
    }

    #[tokio::test]
    async fn reschedule_releases_claim_and_keeps_state() {
        let f = fixture();
        let job = with_result(&f, JobResult::reschedule(json!({"step": 2})));
        f.jobs
            .update_one(&job.id, JobPatch::claimed("c1", chrono::Utc::now()))
            .unwrap();
        f.runner.start(job.clone()).await;

        let stored = f.jobs.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Ready);
        assert_eq!(stored.claim, None);
        assert_eq!(stored.state, Some(json!({"step": 2})));
    }

    #[tokio::test]
    async fn reschedule_without_state_leaves_job_running() {
        let f = fixture();
        let job = with_result(&f, JobResult::Reschedule { state: None });
        f.runner.start(job.clone()).await;
        assert_eq!(f.jobs.get(&job.id).unwrap().status, JobStatus::Running);
    }

    #[tokio::test]
    async fn handler_error_and_unknown_type_fail_the_job() {
        let f = fixture();
        let job = with_result(&f, JobResult::Completed);
        f.registry.register(
            "Fixed",
            "fixed",
            handler_fn(|_, _| async {
                Err::<JobResult, _>(crate::SchedulerError::InvalidRequest("no input".into()))
            }),
        );
        f.runner.start(job.clone()).await;
        let stored = f.jobs.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().as_str().unwrap().contains("no input"));

        f.registry.deregister("fixed");
        f.jobs.update_one(&job.id, JobPatch::status(JobStatus::Ready)).unwrap();
        f.runner.start(job.clone()).await;
        let stored = f.jobs.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().as_str().unwrap().contains("not registered"));
    }

    struct Exploding;

    #[async_trait]
    impl crate::registry::JobHandler for Exploding {
        async fn handle(&self, _ctx: &JobContext, _job: &Job) -> crate::Result<JobResult> {
            panic!("handler exploded")
        }
    }

    #[tokio::test]
    async fn handler_panic_fails_the_job() {
        let f = fixture();
        let job = with_result(&f, JobResult::Completed);
        f.registry.register("Fixed", "fixed", Arc::new(Exploding));
        f.runner.start(job.clone()).await;
        assert_eq!(f.jobs.get(&job.id).unwrap().status, JobStatus::Failed);
    }
}
