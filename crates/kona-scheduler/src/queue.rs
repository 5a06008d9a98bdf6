use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::types::Job;

/// Starts a job handed over by a queue. Implemented by the job runner.
#[async_trait]
pub trait JobStarter: Send + Sync {
    async fn start(&self, job: Job);
}

#[derive(Default)]
struct QueueState {
    /// Stack: the most recently queued job runs first.
    pending: Vec<Job>,
    /// Ids running or inside their throttle window.
    locks: HashSet<String>,
    draining: bool,
}

/// Throttled run queue for one job group.
///
/// At most one job of the group runs at a time, and consecutive starts are at
/// least `throttle` apart. Draining happens on a background task that exits
/// when the queue is empty and is restarted by the next accepted job.
pub struct JobQueue {
    group: String,
    throttle: Duration,
    starter: Arc<dyn JobStarter>,
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(group: impl Into<String>, throttle: Duration, starter: Arc<dyn JobStarter>) -> Self {
        Self {
            group: group.into(),
            throttle,
            starter,
            state: Mutex::new(QueueState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().expect("job queue state poisoned")
    }

    /// Accept `job` unless the same id is already pending or locked.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn queue(self: &Arc<Self>, job: Job) -> bool {
        let mut state = self.lock();
        if state.locks.contains(&job.id) || state.pending.iter().any(|p| p.id == job.id) {
            debug!(group = %self.group, job_id = %job.id, "job already queued or locked");
            return false;
        }
        debug!(group = %self.group, job_id = %job.id, depth = state.pending.len() + 1, "job queued");
        state.pending.push(job);

        if !state.draining {
            state.draining = true;
            tokio::spawn(Arc::clone(self).drain());
        }
        true
    }

    /// Jobs waiting to start.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.lock().locks.contains(id)
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let job = {
                let mut state = self.lock();
                match state.pending.pop() {
                    Some(job) => {
                        state.locks.insert(job.id.clone());
                        job
                    }
                    None => {
                        state.draining = false;
                        break;
                    }
                }
            };

            let id = job.id.clone();
            let started = Instant::now();
            let starter = Arc::clone(&self.starter);
            // A panicking runner must not take the drain loop down with it.
            if let Err(e) = tokio::spawn(async move { starter.start(job).await }).await {
                error!(group = %self.group, job_id = %id, error = %e, "job runner aborted");
            }

            let remaining = self.throttle.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
            self.lock().locks.remove(&id);
        }
        debug!(group = %self.group, "queue drained");
    }
}
