use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of log lines kept per job. Older lines are dropped.
pub const MAX_LOG_LINES: usize = 300;

/// Logged at creation when the job will delete registry source tags.
pub const CLEANUP_ENABLED_LOG: &str = "[cleanup] registry source tag cleanup is enabled.";
/// Logged once every cleanup target was handled.
pub const CLEANUP_FINISHED_LOG: &str = "[cleanup] finished.";
pub const CLEANUP_SKIPPED_LOG: &str = "[cleanup] skipped because job is not successful.";
pub const CLEANUP_FAILED_LOG: &str = "[cleanup] registry cleanup failed:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Mirror,
    LocalPush,
    RemotePrefixRename,
    RepositoryDelete,
}

/// How the runner reacts to a failing plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop at the first failing step.
    FailFast,
    /// Run every step, count failures, fail the job at the end if any.
    ContinueOnError,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Mirror => "mirror",
            JobKind::LocalPush => "local-push",
            JobKind::RemotePrefixRename => "remote-prefix-rename",
            JobKind::RepositoryDelete => "repository-delete",
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        match self {
            JobKind::Mirror | JobKind::LocalPush => FailurePolicy::FailFast,
            JobKind::RemotePrefixRename | JobKind::RepositoryDelete => {
                FailurePolicy::ContinueOnError
            }
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Allowed moves: `running -> success|failed`, plus `success -> failed`
    /// when post-run registry cleanup downgrades a finished job.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Running, JobStatus::Success)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Success, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub source_label: String,
    pub target_label: String,
    pub total_items: usize,
    pub status: JobStatus,
    pub logs: VecDeque<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        kind: JobKind,
        source_label: impl Into<String>,
        target_label: impl Into<String>,
        total_items: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_job_id(),
            kind,
            source_label: source_label.into(),
            target_label: target_label.into(),
            total_items,
            status: JobStatus::Running,
            logs: VecDeque::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a log line prefixed with the current UTC wall-clock time,
    /// dropping the oldest lines beyond [`MAX_LOG_LINES`].
    pub fn push_log(&mut self, message: &str) {
        let now = Utc::now();
        self.logs
            .push_back(format!("{} {}", now.format("%H:%M:%S"), message));
        while self.logs.len() > MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.updated_at = now;
    }

    /// True while the cleanup coordinator may still write to this job: it
    /// was enabled and none of its closing lines is in the log yet. A job
    /// whose notice rotated out of the capped log counts as done.
    pub fn cleanup_pending(&self) -> bool {
        let enabled = self.logs.iter().any(|l| l.ends_with(CLEANUP_ENABLED_LOG));
        enabled
            && !self.logs.iter().any(|l| {
                l.ends_with(CLEANUP_FINISHED_LOG)
                    || l.ends_with(CLEANUP_SKIPPED_LOG)
                    || l.contains(CLEANUP_FAILED_LOG)
            })
    }
}

/// Short opaque id: the first 12 hex chars of a random UUID.
pub fn new_job_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

// ---------------------------------------------------------------------------
// Create requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRequest {
    pub source_image: String,
    #[serde(default)]
    pub target_repository: Option<String>,
    #[serde(default)]
    pub target_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPushRequest {
    pub image_refs: Vec<String>,
    #[serde(default = "default_none_mode")]
    pub prefix_mode: String,
    #[serde(default)]
    pub prefix_value: String,
    #[serde(default = "default_arch_mode")]
    pub arch_mode: String,
    #[serde(default)]
    pub arch_value: String,
    #[serde(default)]
    pub target_registry_host: Option<String>,
    #[serde(default)]
    pub cleanup_local_tag: bool,
    #[serde(default)]
    pub cleanup_registry_source_tag: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePrefixRequest {
    pub repositories: Vec<String>,
    #[serde(default = "default_add_mode")]
    pub prefix_mode: String,
    #[serde(default)]
    pub prefix_value: String,
    #[serde(default)]
    pub cleanup_source_tag: bool,
    #[serde(default)]
    pub target_registry_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDeleteRequest {
    pub repositories: Vec<String>,
}

fn default_none_mode() -> String {
    "none".to_string()
}

fn default_add_mode() -> String {
    "add".to_string()
}

fn default_arch_mode() -> String {
    "auto".to_string()
}
