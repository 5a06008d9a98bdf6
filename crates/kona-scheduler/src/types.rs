use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::validator::RawRunSpec;

/// When a job becomes due. Validated form of the `run.model` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunModel {
    /// Due immediately.
    Now,
    /// Every day at `at`.
    Daily,
    /// On each listed weekday at `at`.
    Weekly(Vec<Weekday>),
    /// On this day of every month at `at`.
    DayOfMonth(u32),
    /// On this day and month of every year at `at`.
    DayOfYear { day: u32, month: u32 },
    /// Once, at an explicit UTC date and time.
    Date(NaiveDateTime),
}

/// How many times a daily job repeats within its day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Forever,
    Times(u32),
}

/// A validated run specification.
///
/// Persisted in its JSON shape (`{"model": "daily", "at": "09:00"}`); use
/// [`crate::validator::validate_run`] to build one from untrusted input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRunSpec", into = "RawRunSpec")]
pub struct RunSpec {
    pub model: RunModel,
    /// Time of day (UTC). Required by every calendar model except `Date`.
    pub at: Option<NaiveTime>,
    /// Minutes between repetitions.
    pub delay: Option<u32>,
    /// Only kept for the daily model.
    pub repeat: Option<Repeat>,
}

impl RunSpec {
    pub fn now() -> Self {
        Self {
            model: RunModel::Now,
            at: None,
            delay: None,
            repeat: None,
        }
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Activation time not reached yet.
    Waiting,
    /// Due; any scheduler may claim it.
    Ready,
    /// Handed to a group queue.
    Scheduled,
    /// Owned by one scheduler through its claim token.
    Claimed,
    Running,
    Failed,
    Completed,
    /// Parked by an operator; never picked up.
    Locked,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Ready => "ready",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Claimed => "claimed",
            JobStatus::Running => "running",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
            JobStatus::Locked => "locked",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "ready" => Ok(JobStatus::Ready),
            "scheduled" => Ok(JobStatus::Scheduled),
            "claimed" => Ok(JobStatus::Claimed),
            "running" => Ok(JobStatus::Running),
            "failed" => Ok(JobStatus::Failed),
            "completed" => Ok(JobStatus::Completed),
            "locked" => Ok(JobStatus::Locked),
            other => Err(SchedulerError::Validation(format!(
                "Invalid job status: {other}"
            ))),
        }
    }
}

impl From<JobStatus> for Value {
    fn from(status: JobStatus) -> Self {
        Value::String(status.as_str().to_string())
    }
}

/// A persisted job record, as read back from the `_jobs` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned id; immutable.
    #[serde(alias = "_id")]
    pub id: String,
    pub version: u32,
    pub code: String,
    pub group: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSpec>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub activate: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub claim_expire: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, alias = "_owner")]
    pub owner: String,
    /// Epoch millis.
    #[serde(default, alias = "_created")]
    pub created: i64,
    /// Epoch millis.
    #[serde(default, alias = "_updated")]
    pub updated: i64,
}

impl Job {
    /// An unsaved job used to invoke a job type directly.
    pub fn transient(job_type: &str, params: Option<Value>) -> Self {
        Self {
            id: String::new(),
            version: 1,
            code: String::new(),
            group: "default".to_string(),
            job_type: job_type.to_string(),
            name: job_type.to_string(),
            description: None,
            status: JobStatus::Running,
            run: None,
            activate: None,
            claim: None,
            claim_expire: None,
            params,
            meta: None,
            state: None,
            error: None,
            owner: String::new(),
            created: 0,
            updated: 0,
        }
    }

    /// `"<name> (<id>) [<type>]"`, the prefix used in audit messages.
    pub fn label(&self) -> String {
        format!("{} ({}) [{}]", self.name, self.id, self.job_type)
    }
}

/// Untrusted input for a new job (API body or static configuration).
///
/// Everything is optional here; [`crate::jobs::JobStore::create`] applies
/// defaults and validation. Loosely typed fields (`version`, `status`, `run`)
/// stay raw so that bad values surface as validation errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// Claim bookkeeping carried by a [`JobPatch`]. Never accepted from API input.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimUpdate {
    Set {
        claim: String,
        expire: DateTime<Utc>,
    },
    Clear,
}

/// Partial update of a job.
///
/// Deserializable from API bodies; the scheduler builds its own through the
/// constructor helpers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(rename = "type", default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub run: Option<Value>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub meta: Option<Value>,
    #[serde(default)]
    pub state: Option<Value>,
    /// Only persisted together with `status = failed`.
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(skip)]
    pub claim: Option<ClaimUpdate>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn failed(error: Value) -> Self {
        Self {
            error: Some(error),
            ..Self::status(JobStatus::Failed)
        }
    }

    /// Take ownership of a job: `claimed` plus a fresh claim token.
    pub fn claimed(claim: impl Into<String>, expire: DateTime<Utc>) -> Self {
        Self {
            claim: Some(ClaimUpdate::Set {
                claim: claim.into(),
                expire,
            }),
            ..Self::status(JobStatus::Claimed)
        }
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn clear_claim(mut self) -> Self {
        self.claim = Some(ClaimUpdate::Clear);
        self
    }
}

/// Re-applying a static job definition keeps its runtime status.
impl From<JobDraft> for JobPatch {
    fn from(draft: JobDraft) -> Self {
        Self {
            version: draft.version,
            code: draft.code,
            group: draft.group,
            job_type: draft.job_type,
            name: draft.name,
            description: draft.description,
            status: None,
            run: draft.run,
            params: draft.params,
            meta: draft.meta,
            state: draft.state,
            error: None,
            claim: None,
        }
    }
}

/// Outcome reported by a job handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResult {
    Completed,
    Failed {
        #[serde(default)]
        error: Value,
    },
    /// Put the job back to `ready`, persisting `state` for the next run.
    Reschedule {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
    },
}

impl JobResult {
    pub fn failed(error: impl Into<Value>) -> Self {
        JobResult::Failed {
            error: error.into(),
        }
    }

    pub fn reschedule(state: Value) -> Self {
        JobResult::Reschedule { state: Some(state) }
    }
}
