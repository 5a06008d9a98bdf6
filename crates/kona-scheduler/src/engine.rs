use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kona_core::config::{SchedulerConfig, SystemConfig};
use kona_events::{EventBus, TickHandler};
use kona_store::{AuditLog, Criteria, DocumentStore};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::jobs::{JobSelector, JobStore, UpdateResult};
use crate::queue::JobQueue;
use crate::registry::{HandlerCatalog, JobContext, JobHandler, JobTypeRegistry, SignalHandler, SIGNAL_JOB_TYPE};
use crate::runner::JobRunner;
use crate::types::{Job, JobDraft, JobPatch, JobResult, JobStatus};
use crate::validator::validate_version;

/// The job scheduler.
///
/// Polls the store for ready jobs, claims each one through a compare-and-swap
/// on its status so that several processes can share one database, and hands
/// claimed jobs to the throttled queue of their group.
pub struct Scheduler {
    config: SchedulerConfig,
    jobs: JobStore,
    registry: Arc<JobTypeRegistry>,
    ctx: JobContext,
    runner: Arc<JobRunner>,
    queues: DashMap<String, Arc<JobQueue>>,
    /// Held for the duration of one poll.
    polling: tokio::sync::Mutex<()>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        system: &SystemConfig,
        store: Arc<dyn DocumentStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let jobs = JobStore::new(Arc::clone(&store), system.account.clone());
        let audit = AuditLog::new(Arc::clone(&store), system.account.clone());
        let registry = Arc::new(JobTypeRegistry::new());
        let ctx = JobContext { events, store };
        let runner = Arc::new(JobRunner::new(
            jobs.clone(),
            Arc::clone(&registry),
            ctx.clone(),
            audit,
            system.user_id.clone(),
        ));

        Self {
            config,
            jobs,
            registry,
            ctx,
            runner,
            queues: DashMap::new(),
            polling: tokio::sync::Mutex::new(()),
        }
    }

    /// Register the built-in and configured job types, then load the
    /// configured jobs. Any failure here is a configuration error.
    pub fn init(&self, catalog: &HandlerCatalog) -> Result<()> {
        self.registry.register("Signal", SIGNAL_JOB_TYPE, Arc::new(SignalHandler));

        for (code, job_type) in &self.config.job_types {
            let handler = catalog.get(&job_type.handler).ok_or_else(|| {
                SchedulerError::System(format!(
                    "Job type {code} references unknown handler {}",
                    job_type.handler
                ))
            })?;
            self.registry.register(&job_type.name, code, handler);
        }

        self.load_jobs()?;
        info!(
            job_types = self.registry.registered().len(),
            configured_jobs = self.config.jobs.len(),
            "scheduler initialised"
        );
        Ok(())
    }

    /// Create or refresh every job defined under `scheduler.jobs`.
    ///
    /// A job whose code already exists is only rewritten when the configured
    /// version is newer than the stored one.
    fn load_jobs(&self) -> Result<()> {
        for (code, definition) in &self.config.jobs {
            let configuration = |e: SchedulerError| SchedulerError::Config(format!("Job {code}: {e}"));

            let mut draft: JobDraft = serde_json::from_value(definition.clone())
                .map_err(|e| SchedulerError::Config(format!("Job {code} is malformed: {e}")))?;
            draft.code = Some(code.clone());
            let version = match draft.version.as_ref().filter(|v| !v.is_null()) {
                Some(v) => validate_version(v).map_err(configuration)?,
                None => 1,
            };

            match self.jobs.find_one(&Criteria::new().eq("code", code.as_str())) {
                Ok(existing) if existing.version < version => {
                    self.jobs
                        .update_one(&existing.id, JobPatch::from(draft))
                        .map_err(configuration)?;
                    info!(code = %code, from = existing.version, to = version, "configured job updated");
                }
                Ok(existing) => {
                    debug!(code = %code, version = existing.version, "configured job up to date");
                }
                Err(e) if e.is_not_found() => {
                    let job = self.jobs.create(draft).map_err(configuration)?;
                    info!(code = %code, job_id = %job.id, "configured job created");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn create(&self, draft: JobDraft) -> Result<String> {
        Ok(self.jobs.create(draft)?.id)
    }

    pub fn find(&self, criteria: &Criteria, skip: Option<usize>, limit: Option<usize>) -> Result<Vec<Job>> {
        self.jobs.find(criteria, skip, limit)
    }

    pub fn get(&self, id: &str) -> Result<Job> {
        self.jobs.get(id)
    }

    pub fn update(&self, selector: impl Into<JobSelector>, patch: JobPatch) -> Result<UpdateResult> {
        self.jobs.update(selector, patch)
    }

    pub fn remove(&self, id: &str) -> Result<String> {
        self.jobs.remove(id)
    }

    pub fn register_job_type(&self, name: &str, code: &str, handler: Arc<dyn JobHandler>) {
        self.registry.register(name, code, handler);
    }

    pub fn deregister_job_type(&self, code: &str) -> bool {
        self.registry.deregister(code)
    }

    pub fn registered_job_types(&self) -> BTreeMap<String, String> {
        self.registry.registered()
    }

    /// Run job type `code` directly against `job`, outside the queues.
    /// `params`, when given, replace the job's own.
    pub async fn exec(&self, code: &str, job: &Job, params: Option<Value>) -> Result<JobResult> {
        let mut job = job.clone();
        if let Some(params) = params {
            job.params = Some(params);
        }
        self.registry.exec(code, &self.ctx, &job).await
    }

    /// Jobs waiting in `group`'s queue.
    pub fn queue_len(&self, group: &str) -> usize {
        self.queues.get(group).map_or(0, |q| q.len())
    }

    /// One scheduling pass. Returns how many jobs were handed to a queue.
    ///
    /// A pass that starts while the previous one is still running is skipped.
    pub async fn poll(&self) -> usize {
        let Ok(_guard) = self.polling.try_lock() else {
            debug!("previous poll still running; skipping");
            return 0;
        };

        if let Err(e) = self.promote_due(Utc::now()) {
            error!(error = %e, "promoting waiting jobs failed");
        }

        let ready = match self.jobs.find(&Criteria::new().eq("status", JobStatus::Ready), None, None) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "finding ready jobs failed");
                return 0;
            }
        };

        let mut scheduled = 0;
        for job in ready {
            let id = job.id.clone();
            match self.schedule(job) {
                Ok(true) => scheduled += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = %id, error = %e, "scheduling job failed"),
            }
        }
        if scheduled > 0 {
            info!(scheduled, "jobs scheduled");
        }
        scheduled
    }

    /// Move waiting jobs whose activation time has passed to `ready`.
    fn promote_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let waiting = self
            .jobs
            .find(&Criteria::new().eq("status", JobStatus::Waiting), None, None)?;

        let mut promoted = 0;
        for job in waiting.iter().filter(|j| j.activate.map_or(true, |at| at <= now)) {
            let cas = Criteria::by_id(&job.id).eq("status", JobStatus::Waiting);
            promoted += self
                .jobs
                .update_where(&cas, JobPatch::status(JobStatus::Ready))?
                .modified;
        }
        if promoted > 0 {
            debug!(promoted, "waiting jobs now ready");
        }
        Ok(promoted)
    }

    /// Claim `job` and hand it to its group queue. `Ok(false)` when another
    /// scheduler won the claim or the queue refused the job.
    fn schedule(&self, job: Job) -> Result<bool> {
        let claim = Uuid::new_v4().to_string();
        let expire = claim_expiry(Utc::now(), self.config.claim_ttl_secs);

        let cas = Criteria::by_id(&job.id).eq("status", JobStatus::Ready);
        let counts = self.jobs.update_where(&cas, JobPatch::claimed(claim.as_str(), expire))?;
        if counts.modified == 0 {
            debug!(job_id = %job.id, "job no longer ready; claim abandoned");
            return Ok(false);
        }

        let mut claimed = match self.jobs.find_one(&Criteria::by_id(&job.id).eq("claim", claim.as_str())) {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                warn!(job_id = %job.id, %claim, "claim lost to another scheduler");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.jobs
            .update_one(&claimed.id, JobPatch::status(JobStatus::Scheduled))?;
        claimed.status = JobStatus::Scheduled;

        let id = claimed.id.clone();
        if !self.queue(claimed) {
            debug!(job_id = %id, "queue refused job; back to ready");
            self.jobs.update_one(&id, JobPatch::status(JobStatus::Ready))?;
            return Ok(false);
        }
        Ok(true)
    }

    fn queue(&self, job: Job) -> bool {
        let queue = Arc::clone(
            self.queues
                .entry(job.group.clone())
                .or_insert_with(|| {
                    let throttle = self.config.throttle_secs(&job.group);
                    info!(group = %job.group, throttle_secs = throttle, "job queue created");
                    Arc::new(JobQueue::new(
                        job.group.clone(),
                        Duration::from_secs(throttle),
                        Arc::clone(&self.runner) as Arc<dyn crate::queue::JobStarter>,
                    ))
                })
                .value(),
        );
        queue.queue(job)
    }
}

/// `now + ttl_secs`, saturating at the latest representable instant.
fn claim_expiry(now: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Heartbeat subscriber that triggers [`Scheduler::poll`].
pub struct PollTick(pub Arc<Scheduler>);

#[async_trait]
impl TickHandler for PollTick {
    async fn tick(&self) {
        self.0.poll().await;
    }
}
