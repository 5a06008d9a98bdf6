//! `kona-scheduler`: persistent job scheduler with per-group throttled queues.
//!
//! # Overview
//!
//! Jobs live in the `_jobs` collection of a [`kona_store::DocumentStore`].
//! On every poll the [`engine::Scheduler`] promotes due `waiting` jobs,
//! claims each `ready` job with a compare-and-swap on its status and hands it
//! to the [`queue::JobQueue`] of its group. The queue starts jobs one at a
//! time through the [`runner::JobRunner`], which invokes the handler
//! registered for the job type and persists the outcome.
//!
//! # Run models
//!
//! | Model              | Due                                           |
//! |--------------------|-----------------------------------------------|
//! | `"now"`            | immediately                                   |
//! | `"daily"`          | every day at `at` (UTC)                       |
//! | `["mon", "wed"]`   | on each listed weekday at `at`                |
//! | `["15"]`           | on that day of every month at `at`            |
//! | `["29/2"]`         | on that day and month of every year at `at`   |
//! | `["1/3/2030 9:05"]`| once, at that date and time                   |

pub mod engine;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod types;
pub mod validator;

pub use engine::{PollTick, Scheduler};
pub use error::{Result, SchedulerError};
pub use jobs::{JobSelector, JobStore, UpdateResult};
pub use registry::{handler_fn, HandlerCatalog, JobContext, JobHandler, JobTypeRegistry};
pub use types::{Job, JobDraft, JobPatch, JobResult, JobStatus, RunModel, RunSpec};
