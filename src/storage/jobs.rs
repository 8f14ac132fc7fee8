use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::models::config::MIN_JOB_RETENTION;
use crate::models::{Job, JobStatus};

/// In-memory job collection bounded by `retention`, oldest evicted first.
///
/// Every operation takes the single store lock for its own duration only;
/// callers never hold it across process or network I/O.
pub struct JobStore {
    retention: usize,
    jobs: Mutex<VecDeque<Job>>,
}

impl JobStore {
    /// Create a store. `retention` is floored at [`MIN_JOB_RETENTION`].
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(MIN_JOB_RETENTION),
            jobs: Mutex::new(VecDeque::new()),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Insert a job, evicting the oldest ones while over capacity.
    pub async fn insert(&self, job: Job) {
        let mut jobs = self.jobs.lock().await;
        jobs.push_back(job);
        while jobs.len() > self.retention {
            if let Some(evicted) = jobs.pop_front() {
                tracing::debug!("Evicted job {} ({})", evicted.id, evicted.status);
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        let jobs = self.jobs.lock().await;
        jobs.iter().find(|j| j.id == id).cloned()
    }

    /// Most recently inserted first, at most `limit` jobs.
    pub async fn list(&self, limit: usize) -> Vec<Job> {
        let jobs = self.jobs.lock().await;
        jobs.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Append a timestamped line. Unknown ids are ignored.
    pub async fn append_log(&self, id: &str, message: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.push_log(message);
        }
    }

    /// Apply a status transition. Returns `false` when the id is unknown or
    /// the transition is not permitted from the current status.
    pub async fn set_status(&self, id: &str, status: JobStatus, error: Option<String>) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
            return false;
        };
        if !job.status.can_transition_to(status) {
            tracing::warn!(
                "Rejected status change for job {}: {} -> {}",
                id,
                job.status,
                status
            );
            return false;
        }
        job.status = status;
        job.error = error;
        job.updated_at = Utc::now();
        true
    }
}
