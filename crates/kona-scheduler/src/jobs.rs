use std::sync::Arc;

use chrono::{DateTime, Utc};
use kona_core::util::strip;
use kona_store::{Criteria, Document, DocumentStore, Page, Record, UpdateCounts};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::schedule::next_activation;
use crate::types::{ClaimUpdate, Job, JobDraft, JobPatch, JobStatus, RunSpec};
use crate::validator::{validate_code, validate_group, validate_run, validate_status, validate_version};

pub const JOBS_COLLECTION: &str = "_jobs";
pub const DEFAULT_GROUP: &str = "default";

/// Which records an update applies to.
#[derive(Debug, Clone)]
pub enum JobSelector {
    /// Exactly one job; `NotFound` otherwise.
    Id(String),
    /// Every job matching the criteria.
    Criteria(Criteria),
}

impl From<&str> for JobSelector {
    fn from(id: &str) -> Self {
        JobSelector::Id(id.to_string())
    }
}

impl From<String> for JobSelector {
    fn from(id: String) -> Self {
        JobSelector::Id(id)
    }
}

impl From<Criteria> for JobSelector {
    fn from(criteria: Criteria) -> Self {
        JobSelector::Criteria(criteria)
    }
}

/// What an update touched: the id, or the match counts for a criteria update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UpdateResult {
    Id { id: String },
    Counts(UpdateCounts),
}

/// Typed access to the `_jobs` collection.
///
/// Sanitizes and validates every write against the job schema; records are
/// owned by the configured system account.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<dyn DocumentStore>,
    owner: String,
}

impl JobStore {
    pub fn new(store: Arc<dyn DocumentStore>, owner: impl Into<String>) -> Self {
        Self {
            store,
            owner: owner.into(),
        }
    }

    #[instrument(skip(self, draft), fields(code = ?draft.code))]
    pub fn create(&self, draft: JobDraft) -> Result<Job> {
        let record = sanitize_create(draft, Utc::now())?;
        let doc = self.store.create(JOBS_COLLECTION, &self.owner, record)?;
        let job = to_job(doc)?;
        info!(job_id = %job.id, code = %job.code, status = %job.status, "job created");
        Ok(job)
    }

    pub fn get(&self, id: &str) -> Result<Job> {
        match self.store.get(JOBS_COLLECTION, id) {
            Ok(doc) => to_job(doc),
            Err(e) if e.is_not_found() => Err(SchedulerError::JobNotFound { id: id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn find(&self, criteria: &Criteria, skip: Option<usize>, limit: Option<usize>) -> Result<Vec<Job>> {
        self.store
            .find(JOBS_COLLECTION, criteria, Page::new(skip, limit))?
            .into_iter()
            .map(to_job)
            .collect()
    }

    /// First job matching `criteria`; `not_found` when none does.
    pub fn find_one(&self, criteria: &Criteria) -> Result<Job> {
        to_job(self.store.find_one(JOBS_COLLECTION, criteria)?)
    }

    pub fn update(&self, selector: impl Into<JobSelector>, patch: JobPatch) -> Result<UpdateResult> {
        match selector.into() {
            JobSelector::Id(id) => self.update_one(&id, patch).map(|id| UpdateResult::Id { id }),
            JobSelector::Criteria(criteria) => self.update_where(&criteria, patch).map(UpdateResult::Counts),
        }
    }

    #[instrument(skip(self, patch))]
    pub fn update_one(&self, id: &str, patch: JobPatch) -> Result<String> {
        let record = sanitize_update(patch, Utc::now())?;
        match self.store.update(JOBS_COLLECTION, id, record) {
            Ok(id) => Ok(id),
            Err(e) if e.is_not_found() => Err(SchedulerError::JobNotFound { id: id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic filter-and-write; the basis of the claim compare-and-swap.
    #[instrument(skip(self, patch))]
    pub fn update_where(&self, criteria: &Criteria, patch: JobPatch) -> Result<UpdateCounts> {
        let record = sanitize_update(patch, Utc::now())?;
        let counts = self.store.update_all(JOBS_COLLECTION, criteria, record)?;
        debug!(found = counts.found, modified = counts.modified, "jobs updated");
        Ok(counts)
    }

    pub fn remove(&self, id: &str) -> Result<String> {
        match self.store.remove(JOBS_COLLECTION, id) {
            Ok(id) => {
                info!(job_id = %id, "job removed");
                Ok(id)
            }
            Err(e) if e.is_not_found() => Err(SchedulerError::JobNotFound { id: id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }
}

fn to_job(doc: Document) -> Result<Job> {
    Ok(serde_json::from_value(Value::Object(doc.into_record()))?)
}

fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

fn millis(ts: DateTime<Utc>) -> Value {
    Value::from(ts.timestamp_millis())
}

fn generate_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("job-{}", &id[..10])
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Apply defaults, validate and compute `activate` for a new job.
fn sanitize_create(draft: JobDraft, now: DateTime<Utc>) -> Result<Record> {
    let name = non_empty(draft.name).ok_or_else(|| SchedulerError::Validation("Job name must be specified".into()))?;
    let job_type =
        non_empty(draft.job_type).ok_or_else(|| SchedulerError::Validation("Job type must be specified".into()))?;
    let run = validate_run(draft.run.as_ref())?;

    let version = match draft.version.filter(|v| !v.is_null()) {
        Some(v) => validate_version(&v)?,
        None => 1,
    };
    let code = non_empty(draft.code).unwrap_or_else(generate_code);
    validate_code(&code)?;
    let group = non_empty(draft.group).unwrap_or_else(|| DEFAULT_GROUP.to_string());
    validate_group(&group)?;

    let activate = next_activation(&run, now);
    // Anything already due starts ready, whatever status was asked for.
    let status = if activate <= now {
        JobStatus::Ready
    } else {
        match non_empty(draft.status) {
            Some(s) => validate_status(&s)?,
            None => JobStatus::Waiting,
        }
    };

    let record = into_record(json!({
        "version": version,
        "code": code,
        "group": group,
        "type": job_type,
        "name": name,
        "description": draft.description,
        "status": status,
        "run": run,
        "activate": millis(activate),
        "params": draft.params,
        "meta": draft.meta,
        "state": draft.state,
    }));
    Ok(strip(record))
}

/// Validate the fields present in `patch` and turn it into a store patch.
///
/// Empty values are dropped, never written. Explicit clears (`null`) are
/// emitted for `error` whenever the status moves away from `failed`, and for
/// the claim fields when a job is released.
fn sanitize_update(patch: JobPatch, now: DateTime<Utc>) -> Result<Record> {
    let version = patch
        .version
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
        .map(|v| validate_version(&v))
        .transpose()?;
    let code = non_empty(patch.code);
    if let Some(code) = &code {
        validate_code(code)?;
    }
    let group = non_empty(patch.group);
    if let Some(group) = &group {
        validate_group(group)?;
    }
    let status = non_empty(patch.status).map(|s| validate_status(&s)).transpose()?;
    let run: Option<RunSpec> = match patch.run.filter(|v| !v.is_null()) {
        Some(v) => Some(validate_run(Some(&v))?),
        None => None,
    };
    let activate = run.as_ref().map(|run| millis(next_activation(run, now)));

    let mut record = strip(into_record(json!({
        "version": version,
        "code": code,
        "group": group,
        "type": patch.job_type,
        "name": patch.name,
        "description": patch.description,
        "status": status,
        "run": run,
        "activate": activate,
        "params": patch.params,
        "meta": patch.meta,
        "state": patch.state,
    })));

    match status {
        Some(JobStatus::Failed) => {
            if let Some(error) = patch.error.filter(|e| !e.is_null()) {
                record.insert("error".into(), error);
            }
        }
        Some(_) => {
            record.insert("error".into(), Value::Null);
        }
        None => {}
    }

    let claim = match (patch.claim, status) {
        (Some(claim), _) => Some(claim),
        // Back in the pool: nobody owns it.
        (None, Some(JobStatus::Ready | JobStatus::Waiting)) => Some(ClaimUpdate::Clear),
        (None, _) => None,
    };
    match claim {
        Some(ClaimUpdate::Set { claim, expire }) => {
            record.insert("claim".into(), Value::String(claim));
            record.insert("claim_expire".into(), millis(expire));
        }
        Some(ClaimUpdate::Clear) => {
            record.insert("claim".into(), Value::Null);
            record.insert("claim_expire".into(), Value::Null);
        }
        None => {}
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kona_store::SqliteStore;

    fn jobs() -> JobStore {
        JobStore::new(Arc::new(SqliteStore::open_in_memory().unwrap()), "system")
    }

    fn draft(v: Value) -> JobDraft {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn create_applies_defaults() {
        let store = jobs();
        let job = store
            .create(draft(json!({"name": "Ping", "type": "signal", "run": {"model": "now"}})))
            .unwrap();
        assert_eq!(job.version, 1);
        assert_eq!(job.group, "default");
        assert!(job.code.starts_with("job-"));
        assert_eq!(job.status, JobStatus::Ready);
        assert!(job.activate.unwrap() <= Utc::now());
        assert_eq!(job.owner, "system");
        assert_eq!(store.get(&job.id).unwrap(), job);
    }

    #[test]
    fn create_future_job_waits() {
        let tomorrow = (Utc::now() + Duration::days(1)).format("%-d/%-m/%Y %-H:%M").to_string();
        let job = jobs()
            .create(draft(json!({
                "name": "Later",
                "type": "signal",
                "status": "ready",
                "run": {"model": [tomorrow]}
            })))
            .unwrap();
        assert_eq!(job.status, JobStatus::Ready);

        let job = jobs()
            .create(draft(json!({"name": "Later", "type": "signal", "run": {"model": [
                (Utc::now() + Duration::days(1)).format("%-d/%-m/%Y %-H:%M").to_string()
            ]}})))
            .unwrap();
        assert_eq!(job.status, JobStatus::Waiting);
        assert!(job.activate.unwrap() > Utc::now());
    }

    #[test]
    fn create_rejects_invalid_input() {
        let store = jobs();
        for bad in [
            json!({"type": "signal", "run": {"model": "now"}}),
            json!({"name": "x", "run": {"model": "now"}}),
            json!({"name": "x", "type": "signal"}),
            json!({"name": "x", "type": "signal", "run": {"model": "banana"}}),
            json!({"name": "x", "type": "signal", "run": {"model": "now"}, "version": "abc"}),
            json!({"name": "x", "type": "signal", "run": {"model": ["1/1/2999 0:00"]}, "status": "paused"}),
        ] {
            let err = store.create(draft(bad.clone())).expect_err(&bad.to_string());
            assert_eq!(err.code(), "validation_error", "{bad}");
        }
        assert!(store.find(&Criteria::new(), None, None).unwrap().is_empty());
    }

    #[test]
    fn update_by_id_requires_existing_job() {
        let err = jobs()
            .update("missing", JobPatch::status(JobStatus::Locked))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn error_only_sticks_to_failed_status() {
        let store = jobs();
        let job = store
            .create(draft(json!({"name": "x", "type": "signal", "run": {"model": "now"}})))
            .unwrap();

        store.update(job.id.as_str(), JobPatch::failed(json!("boom"))).unwrap();
        assert_eq!(store.get(&job.id).unwrap().error, Some(json!("boom")));

        store.update(job.id.as_str(), JobPatch::status(JobStatus::Completed)).unwrap();
        assert_eq!(store.get(&job.id).unwrap().error, None);

        // An error without a failed status is ignored.
        let patch = JobPatch {
            error: Some(json!("ignored")),
            ..JobPatch::default()
        };
        store.update(job.id.as_str(), patch).unwrap();
        assert_eq!(store.get(&job.id).unwrap().error, None);
    }

    #[test]
    fn claim_is_set_then_released() {
        let store = jobs();
        let job = store
            .create(draft(json!({"name": "x", "type": "signal", "run": {"model": "now"}})))
            .unwrap();
        let expire = Utc::now() + Duration::minutes(5);

        let cas = Criteria::by_id(&job.id).eq("status", "ready");
        let counts = store.update_where(&cas, JobPatch::claimed("c1", expire)).unwrap();
        assert_eq!(counts, UpdateCounts { found: 1, modified: 1 });
        let claimed = store.get(&job.id).unwrap();
        assert_eq!(claimed.status, JobStatus::Claimed);
        assert_eq!(claimed.claim.as_deref(), Some("c1"));
        assert_eq!(claimed.claim_expire.unwrap().timestamp_millis(), expire.timestamp_millis());

        // Second claim attempt finds nothing and touches nothing.
        let counts = store.update_where(&cas, JobPatch::claimed("c2", expire)).unwrap();
        assert_eq!(counts, UpdateCounts::default());
        assert_eq!(store.get(&job.id).unwrap().claim.as_deref(), Some("c1"));

        store.update(job.id.as_str(), JobPatch::status(JobStatus::Ready)).unwrap();
        let released = store.get(&job.id).unwrap();
        assert_eq!(released.claim, None);
        assert_eq!(released.claim_expire, None);
    }

    #[test]
    fn criteria_update_reports_counts() {
        let store = jobs();
        for name in ["a", "b"] {
            store
                .create(draft(json!({"name": name, "type": "signal", "group": "mail", "run": {"model": "now"}})))
                .unwrap();
        }
        let result = store
            .update(Criteria::new().eq("group", "mail"), JobPatch::status(JobStatus::Locked))
            .unwrap();
        assert_eq!(result, UpdateResult::Counts(UpdateCounts { found: 2, modified: 2 }));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"found": 2, "modified": 2})
        );
    }

    #[test]
    fn patching_run_recomputes_activation() {
        let store = jobs();
        let job = store
            .create(draft(json!({"name": "x", "type": "signal", "run": {"model": "now"}})))
            .unwrap();
        let patch = JobPatch {
            run: Some(json!({"model": "daily", "at": "03:00"})),
            ..JobPatch::default()
        };
        store.update(job.id.as_str(), patch).unwrap();
        let updated = store.get(&job.id).unwrap();
        assert!(updated.activate.unwrap() >= job.activate.unwrap());
        assert_eq!(updated.run.unwrap().at.unwrap().format("%H:%M").to_string(), "03:00");
    }

    #[test]
    fn find_and_remove() {
        let store = jobs();
        let job = store
            .create(draft(json!({"name": "x", "code": "nightly", "type": "signal", "run": {"model": "now"}})))
            .unwrap();
        let found = store.find_one(&Criteria::new().eq("code", "nightly")).unwrap();
        assert_eq!(found.id, job.id);

        store.remove(&job.id).unwrap();
        assert!(store.get(&job.id).unwrap_err().is_not_found());
        assert!(store.remove(&job.id).unwrap_err().is_not_found());
        assert!(store.find_one(&Criteria::new().eq("code", "nightly")).unwrap_err().is_not_found());
    }
}
