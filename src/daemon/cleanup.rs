use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;
use crate::models::job::{CLEANUP_FAILED_LOG, CLEANUP_FINISHED_LOG, CLEANUP_SKIPPED_LOG};
use crate::models::JobStatus;
use crate::registry::RegistryApi;
use crate::storage::JobStore;

/// Deletes superseded source tags from the registry once a job succeeded.
#[derive(Clone)]
pub struct CleanupCoordinator {
    store: Arc<JobStore>,
    registry: Arc<dyn RegistryApi>,
    poll_interval: Duration,
}

enum TagOutcome {
    Deleted,
    Missing,
    AlreadyRemoved,
}

impl CleanupCoordinator {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<dyn RegistryApi>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            poll_interval,
        }
    }

    pub fn spawn(
        &self,
        job_id: String,
        targets: Vec<(String, String)>,
    ) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run(&job_id, targets).await })
    }

    /// Wait for the job to leave `running`, then delete `targets` if it
    /// succeeded. Stops silently if the job was evicted meanwhile.
    pub async fn run(&self, job_id: &str, targets: Vec<(String, String)>) {
        let status = loop {
            match self.store.get(job_id).await {
                None => {
                    tracing::debug!("Job {} evicted before cleanup", job_id);
                    return;
                }
                Some(job) if job.status == JobStatus::Running => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Some(job) => break job.status,
            }
        };

        if status != JobStatus::Success {
            self.store
                .append_log(job_id, CLEANUP_SKIPPED_LOG)
                .await;
            tracing::warn!("Skipping registry cleanup for failed job {}", job_id);
            return;
        }

        let mut seen = HashSet::new();
        for (repository, tag) in targets {
            if !seen.insert((repository.clone(), tag.clone())) {
                continue;
            }
            let message = match self.delete_source_tag(&repository, &tag).await {
                Ok(TagOutcome::Deleted) => {
                    format!("[cleanup] deleted source tag {}:{}", repository, tag)
                }
                Ok(TagOutcome::Missing) => {
                    format!("[cleanup] skip missing tag {}:{}", repository, tag)
                }
                Ok(TagOutcome::AlreadyRemoved) => {
                    format!("[cleanup] already removed {}:{}", repository, tag)
                }
                Err(e) => {
                    self.store
                        .append_log(job_id, &format!("{} {}", CLEANUP_FAILED_LOG, e))
                        .await;
                    self.store
                        .set_status(
                            job_id,
                            JobStatus::Failed,
                            Some(format!("Registry cleanup failed: {}", e)),
                        )
                        .await;
                    tracing::warn!("Registry cleanup for job {} failed: {}", job_id, e);
                    return;
                }
            };
            self.store.append_log(job_id, &message).await;
        }
        self.store.append_log(job_id, CLEANUP_FINISHED_LOG).await;
    }

    async fn delete_source_tag(&self, repository: &str, tag: &str) -> Result<TagOutcome> {
        let digest = match self.registry.resolve_digest(repository, tag).await {
            Ok(digest) => digest,
            Err(e) if e.is_not_found() => return Ok(TagOutcome::Missing),
            Err(e) => return Err(e),
        };
        match self.registry.delete_manifest(repository, &digest).await {
            Ok(()) => Ok(TagOutcome::Deleted),
            Err(e) if e.is_not_found() => Ok(TagOutcome::AlreadyRemoved),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobKind};
    use crate::registry::MemoryRegistry;

    async fn setup(status: JobStatus) -> (CleanupCoordinator, Arc<JobStore>, Arc<MemoryRegistry>, String) {
        let store = Arc::new(JobStore::new(20));
        let registry = Arc::new(MemoryRegistry::new());
        let job = Job::new(JobKind::LocalPush, "1 local images", "registry.local:5000", 1);
        let id = job.id.clone();
        store.insert(job).await;
        if status != JobStatus::Running {
            store.set_status(&id, status, None).await;
        }
        let coordinator = CleanupCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&registry) as Arc<dyn RegistryApi>,
            Duration::from_millis(10),
        );
        (coordinator, store, registry, id)
    }

    fn target(repo: &str, tag: &str) -> (String, String) {
        (repo.to_string(), tag.to_string())
    }

    fn messages(job: &Job) -> Vec<String> {
        job.logs.iter().map(|l| l[9..].to_string()).collect()
    }

    #[tokio::test]
    async fn test_cleanup_deletes_deduplicated_targets() {
        let (coordinator, store, registry, id) = setup(JobStatus::Success).await;
        registry.add_tag("app", "1.0").await;

        coordinator
            .run(&id, vec![target("app", "1.0"), target("app", "1.0"), target("gone", "2")])
            .await;

        assert_eq!(registry.deleted().await.len(), 1);
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(
            messages(&job),
            vec![
                "[cleanup] deleted source tag app:1.0",
                "[cleanup] skip missing tag gone:2",
                "[cleanup] finished.",
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_skipped_for_failed_job() {
        let (coordinator, store, registry, id) = setup(JobStatus::Failed).await;
        registry.add_tag("app", "1.0").await;

        coordinator.run(&id, vec![target("app", "1.0")]).await;

        assert!(registry.deleted().await.is_empty());
        let job = store.get(&id).await.unwrap();
        assert_eq!(messages(&job), vec!["[cleanup] skipped because job is not successful."]);
    }

    #[tokio::test]
    async fn test_cleanup_waits_for_running_job() {
        let (coordinator, store, registry, id) = setup(JobStatus::Running).await;
        registry.add_tag("app", "1.0").await;

        let handle = coordinator.spawn(id.clone(), vec![target("app", "1.0")]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.deleted().await.is_empty());

        store.set_status(&id, JobStatus::Success, None).await;
        handle.await.unwrap();
        assert_eq!(registry.deleted().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_downgrades_job() {
        let (coordinator, store, registry, id) = setup(JobStatus::Success).await;
        registry.add_tag("broken", "1").await;
        registry.add_tag("later", "1").await;
        registry.fail_repository("broken").await;

        coordinator
            .run(&id, vec![target("broken", "1"), target("later", "1")])
            .await;

        // Remaining targets are not attempted after a failure.
        assert!(registry.deleted().await.is_empty());
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .starts_with("Registry cleanup failed: "));
        assert!(messages(&job)[0].starts_with("[cleanup] registry cleanup failed: "));
    }

    #[tokio::test]
    async fn test_cleanup_stops_when_job_evicted() {
        let (coordinator, _store, registry, _id) = setup(JobStatus::Success).await;
        registry.add_tag("app", "1.0").await;
        coordinator.run("not-there", vec![target("app", "1.0")]).await;
        assert!(registry.deleted().await.is_empty());
    }
}
