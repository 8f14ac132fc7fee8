use std::sync::Arc;
use std::time::Duration;

use crate::daemon::cleanup::CleanupCoordinator;
use crate::daemon::executor::Executor;
use crate::errors::{Result, SyncError};
use crate::models::job::CLEANUP_ENABLED_LOG;
use crate::models::{Job, JobKind, LocalImage, LocalPushRequest, RemotePrefixRequest, Settings};
use crate::plan::{self, Plan, PlanContext};
use crate::process::{docker, CommandSpawner};
use crate::reference::detect_arch_label;
use crate::registry::RegistryApi;
use crate::storage::JobStore;

/// Entry point for creating and querying transfer jobs.
///
/// Each `create_*` call validates and plans synchronously, records the job,
/// then hands the plan to a detached runner. Validation failures never leave
/// a job behind.
pub struct JobManager {
    store: Arc<JobStore>,
    registry: Arc<dyn RegistryApi>,
    executor: Executor,
    cleanup: CleanupCoordinator,
    plan_ctx: PlanContext,
}

impl JobManager {
    pub fn new(
        settings: &Settings,
        registry: Arc<dyn RegistryApi>,
        spawner: Arc<dyn CommandSpawner>,
    ) -> Self {
        let store = Arc::new(JobStore::new(settings.retention()));
        let executor = Executor::new(Arc::clone(&store), Arc::clone(&registry), spawner);
        let cleanup = CleanupCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Duration::from_millis(settings.cleanup_poll_interval_ms),
        );
        Self {
            store,
            registry,
            executor,
            cleanup,
            plan_ctx: PlanContext {
                docker_bin: settings.docker_bin.clone(),
                push_host: settings.push_host(),
                api_url: settings.api_url(),
            },
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<dyn RegistryApi> {
        &self.registry
    }

    pub fn push_host(&self) -> &str {
        &self.plan_ctx.push_host
    }

    pub async fn create_mirror_job(
        &self,
        source_image: &str,
        target_repository: Option<&str>,
        target_tag: Option<&str>,
    ) -> Result<Job> {
        let plan =
            plan::build_mirror_plan(&self.plan_ctx, source_image, target_repository, target_tag)?;
        Ok(self.start(JobKind::Mirror, plan).await)
    }

    pub async fn create_local_push_job(&self, request: &LocalPushRequest) -> Result<Job> {
        let plan = plan::build_local_push_plan(&self.plan_ctx, request, &detect_arch_label())?;
        Ok(self.start(JobKind::LocalPush, plan).await)
    }

    pub async fn create_remote_prefix_job(&self, request: &RemotePrefixRequest) -> Result<Job> {
        let plan =
            plan::build_remote_prefix_plan(&self.plan_ctx, self.registry.as_ref(), request).await?;
        Ok(self.start(JobKind::RemotePrefixRename, plan).await)
    }

    pub async fn create_repository_delete_job(&self, repositories: &[String]) -> Result<Job> {
        let plan = plan::build_repository_delete_plan(&self.plan_ctx, repositories)?;
        Ok(self.start(JobKind::RepositoryDelete, plan).await)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| SyncError::UnknownJob(id.to_string()))
    }

    pub async fn list_jobs(&self, limit: usize) -> Vec<Job> {
        self.store.list(limit).await
    }

    pub async fn list_local_images(&self, limit: usize) -> Result<Vec<LocalImage>> {
        docker::list_local_images(&self.plan_ctx.docker_bin, limit).await
    }

    /// Record the job with its plan preamble and launch the runner, plus the
    /// cleanup coordinator when the plan carries registry cleanup targets.
    async fn start(&self, kind: JobKind, plan: Plan) -> Job {
        let mut job = Job::new(
            kind,
            plan.source_label.clone(),
            plan.target_label.clone(),
            plan.total_items,
        );
        job.push_log(&format!(
            "[init] type={} source={} target={}",
            kind, plan.source_label, plan.target_label
        ));
        if let Some(summary) = &plan.summary {
            job.push_log(&format!("[plan] {}", summary));
        }
        for line in plan.mapping_log_lines() {
            job.push_log(&line);
        }
        for note in &plan.notes {
            job.push_log(note);
        }
        let with_cleanup = !plan.cleanup_targets.is_empty();
        if with_cleanup {
            job.push_log(CLEANUP_ENABLED_LOG);
        }

        let snapshot = job.clone();
        let job_id = job.id.clone();
        self.store.insert(job).await;
        tracing::info!(
            "Created {} job {} ({} steps, {} items)",
            kind,
            job_id,
            plan.steps.len(),
            plan.total_items
        );

        // Completion is observed through the store.
        let _ = self
            .executor
            .spawn_plan(job_id.clone(), kind.failure_policy(), plan.steps);
        if with_cleanup {
            let _ = self.cleanup.spawn(job_id, plan.cleanup_targets);
        }
        snapshot
    }
}
