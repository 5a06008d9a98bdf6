use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kona_events::EventBus;
use kona_store::DocumentStore;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, SchedulerError};
use crate::types::{Job, JobResult};

/// Code of the built-in job type that raises an event.
pub const SIGNAL_JOB_TYPE: &str = "signal";

/// Services available to a running job.
#[derive(Clone)]
pub struct JobContext {
    pub events: Arc<EventBus>,
    pub store: Arc<dyn DocumentStore>,
}

/// The work behind a job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext, job: &Job) -> Result<JobResult>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobResult>> + Send + 'static,
{
    async fn handle(&self, ctx: &JobContext, job: &Job) -> Result<JobResult> {
        (self.0)(ctx.clone(), job.clone()).await
    }
}

/// Adapt an async closure into a [`JobHandler`].
///
/// ```ignore
/// let handler = handler_fn(|_ctx, job| async move {
///     tracing::info!(job = %job.name, "tick");
///     Ok(JobResult::Completed)
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobResult>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Raises `params.event` on the event bus with `params` as payload.
pub struct SignalHandler;

#[async_trait]
impl JobHandler for SignalHandler {
    async fn handle(&self, ctx: &JobContext, job: &Job) -> Result<JobResult> {
        let params = job.params.clone().unwrap_or(Value::Null);
        let event = params
            .get("event")
            .and_then(Value::as_str)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| SchedulerError::InvalidRequest("Event parameter required for this job".to_string()))?
            .to_string();
        ctx.events.signal(&event, params);
        Ok(JobResult::Completed)
    }
}

struct JobType {
    name: String,
    handler: Arc<dyn JobHandler>,
}

/// Job types by code.
pub struct JobTypeRegistry {
    types: RwLock<HashMap<String, JobType>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` under `code`, replacing any previous registration.
    pub fn register(&self, name: &str, code: &str, handler: Arc<dyn JobHandler>) {
        let mut types = self.types.write().expect("job type registry poisoned");
        let replaced = types
            .insert(
                code.to_string(),
                JobType {
                    name: name.to_string(),
                    handler,
                },
            )
            .is_some();
        info!(code, name, replaced, "job type registered");
    }

    /// Returns false when `code` was not registered.
    pub fn deregister(&self, code: &str) -> bool {
        let removed = self
            .types
            .write()
            .expect("job type registry poisoned")
            .remove(code)
            .is_some();
        if removed {
            info!(code, "job type deregistered");
        }
        removed
    }

    /// `{code: name}` of every registered type.
    pub fn registered(&self) -> BTreeMap<String, String> {
        self.types
            .read()
            .expect("job type registry poisoned")
            .iter()
            .map(|(code, t)| (code.clone(), t.name.clone()))
            .collect()
    }

    pub fn handler(&self, code: &str) -> Option<Arc<dyn JobHandler>> {
        self.types
            .read()
            .expect("job type registry poisoned")
            .get(code)
            .map(|t| Arc::clone(&t.handler))
    }

    /// Run the handler registered for `code` and return its result unchanged.
    pub async fn exec(&self, code: &str, ctx: &JobContext, job: &Job) -> Result<JobResult> {
        let handler = self
            .handler(code)
            .ok_or_else(|| SchedulerError::System(format!("Job type {code} not registered")))?;
        debug!(code, job_id = %job.id, "executing job handler");
        handler.handle(ctx, job).await
    }
}

impl Default for JobTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handlers the host offers for configured job types, keyed by the
/// reference used in `scheduler.job_types.<code>.handler`.
#[derive(Default, Clone)]
pub struct HandlerCatalog {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.insert(reference, handler);
        self
    }

    pub fn insert(&mut self, reference: &str, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(reference.to_string(), handler);
    }

    pub fn get(&self, reference: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(reference).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kona_events::EventHandler;
    use kona_store::SqliteStore;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn ctx() -> JobContext {
        JobContext {
            events: Arc::new(EventBus::new()),
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
        }
    }

    fn constant(result: JobResult) -> Arc<dyn JobHandler> {
        handler_fn(move |_, _| {
            let result = result.clone();
            async move { Ok(result) }
        })
    }

    #[tokio::test]
    async fn exec_unknown_type_is_system_error() {
        let registry = JobTypeRegistry::new();
        let err = registry.exec("nope", &ctx(), &Job::transient("nope", None)).await.unwrap_err();
        assert_eq!(err.code(), "system_error");
    }

    #[tokio::test]
    async fn reregistering_overwrites() {
        let registry = JobTypeRegistry::new();
        registry.register("First", "t", constant(JobResult::Completed));
        registry.register("Second", "t", constant(JobResult::failed("boom")));

        let result = registry.exec("t", &ctx(), &Job::transient("t", None)).await.unwrap();
        assert_eq!(result, JobResult::failed("boom"));
        assert_eq!(registry.registered().get("t").map(String::as_str), Some("Second"));
    }

    #[tokio::test]
    async fn deregistered_type_is_gone() {
        let registry = JobTypeRegistry::new();
        registry.register("T", "t", constant(JobResult::Completed));
        assert!(registry.deregister("t"));
        assert!(!registry.deregister("t"));
        assert!(registry.registered().is_empty());
    }

    struct Forward(mpsc::UnboundedSender<Value>);

    #[async_trait]
    impl EventHandler for Forward {
        async fn handle(&self, _event: &str, payload: &Value) -> kona_events::Result<()> {
            let _ = self.0.send(payload.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn signal_raises_event_with_params() {
        let ctx = ctx();
        let (tx, mut rx) = mpsc::unbounded_channel();
        ctx.events.subscribe("report.ready", Arc::new(Forward(tx)));

        let job = Job::transient(SIGNAL_JOB_TYPE, Some(json!({"event": "report.ready", "day": 3})));
        assert_eq!(SignalHandler.handle(&ctx, &job).await.unwrap(), JobResult::Completed);

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload["day"], 3);
    }

    #[tokio::test]
    async fn signal_without_event_is_invalid_request() {
        let err = SignalHandler
            .handle(&ctx(), &Job::transient(SIGNAL_JOB_TYPE, Some(json!({"day": 3}))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn catalog_lookup() {
        let catalog = HandlerCatalog::new().with("log", constant(JobResult::Completed));
        assert!(catalog.get("log").is_some());
        assert!(catalog.get("mail").is_none());
    }
}
