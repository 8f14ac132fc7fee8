use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::{Result, SyncError};
use crate::models::{FailurePolicy, JobStatus};
use crate::plan::PlanStep;
use crate::process::CommandSpawner;
use crate::registry::{delete_tag, RegistryApi};
use crate::storage::JobStore;

/// Runs plans against the container CLI and the registry, streaming output
/// into the job log.
#[derive(Clone)]
pub struct Executor {
    store: Arc<JobStore>,
    registry: Arc<dyn RegistryApi>,
    spawner: Arc<dyn CommandSpawner>,
}

impl Executor {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<dyn RegistryApi>,
        spawner: Arc<dyn CommandSpawner>,
    ) -> Self {
        Self {
            store,
            registry,
            spawner,
        }
    }

    /// Run `steps` on a detached task. The job must already be in the store.
    pub fn spawn_plan(
        &self,
        job_id: String,
        policy: FailurePolicy,
        steps: Vec<PlanStep>,
    ) -> tokio::task::JoinHandle<JobStatus> {
        let executor = self.clone();
        tokio::spawn(async move { executor.run_plan(&job_id, policy, &steps).await })
    }

    /// Execute every step in order and finalize the job status.
    pub async fn run_plan(
        &self,
        job_id: &str,
        policy: FailurePolicy,
        steps: &[PlanStep],
    ) -> JobStatus {
        let total = steps.len();
        let mut failed = 0usize;
        let mut first_error: Option<String> = None;

        for step in steps {
            if let Err(e) = self.run_step(job_id, step).await {
                match policy {
                    FailurePolicy::FailFast => {
                        first_error = Some(e.to_string());
                        break;
                    }
                    FailurePolicy::ContinueOnError => {
                        self.store.append_log(job_id, &format!("[error] {}", e)).await;
                        failed += 1;
                    }
                }
            }
        }

        let error = match policy {
            FailurePolicy::FailFast => first_error,
            FailurePolicy::ContinueOnError => {
                (failed > 0).then(|| format!("{} of {} steps failed", failed, total))
            }
        };

        match error {
            None => {
                self.store
                    .append_log(job_id, "[done] Job finished successfully.")
                    .await;
                self.store.set_status(job_id, JobStatus::Success, None).await;
                tracing::info!("Job {} finished successfully", job_id);
                JobStatus::Success
            }
            Some(reason) => {
                self.store.append_log(job_id, &format!("[error] {}", reason)).await;
                self.store
                    .set_status(job_id, JobStatus::Failed, Some(reason.clone()))
                    .await;
                tracing::warn!("Job {} failed: {}", job_id, reason);
                JobStatus::Failed
            }
        }
    }

    async fn run_step(&self, job_id: &str, step: &PlanStep) -> Result<()> {
        match step {
            PlanStep::Command(argv) => self.run_command(job_id, argv).await,
            PlanStep::DeleteRepository(repository) => {
                self.delete_repository(job_id, repository).await
            }
        }
    }

    async fn run_command(&self, job_id: &str, argv: &[String]) -> Result<()> {
        let printable = argv.join(" ");
        self.store
            .append_log(job_id, &format!("[run] {}", printable))
            .await;

        let (output_tx, mut output_rx) = mpsc::channel::<String>(256);
        let spawner = Arc::clone(&self.spawner);
        let argv = argv.to_vec();
        let command = printable.clone();

        // Blocking read loop: the spawner API is synchronous.
        let read_handle = tokio::task::spawn_blocking(move || -> Result<i32> {
            let mut process = spawner
                .spawn(&argv)
                .map_err(|e| SyncError::Command(format!("Failed to spawn {}: {}", command, e)))?;
            loop {
                match process.next_line() {
                    Ok(Some(line)) => {
                        if output_tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!("Output read error for '{}': {}", command, e);
                        break;
                    }
                }
            }
            drop(output_tx);
            process
                .wait()
                .map_err(|e| SyncError::Command(format!("Failed to wait for {}: {}", command, e)))
        });

        while let Some(line) = output_rx.recv().await {
            let line = line.trim_end();
            if !line.is_empty() {
                self.store.append_log(job_id, line).await;
            }
        }

        let exit_code = read_handle
            .await
            .map_err(|e| SyncError::Internal(format!("Command task failed: {}", e)))??;
        if exit_code != 0 {
            return Err(SyncError::Command(format!(
                "Command failed ({}): {}",
                exit_code, printable
            )));
        }
        Ok(())
    }

    /// Delete every tag of `repository` by manifest digest.
    async fn delete_repository(&self, job_id: &str, repository: &str) -> Result<()> {
        self.store
            .append_log(job_id, &format!("[run] delete repository {}", repository))
            .await;
        let tags = self.registry.list_tags(repository).await?;
        if tags.is_empty() {
            self.store
                .append_log(job_id, &format!("[delete] {} has no tags", repository))
                .await;
            return Ok(());
        }

        let total = tags.len();
        let mut failures = 0usize;
        for tag in tags {
            match delete_tag(self.registry.as_ref(), repository, &tag).await {
                Ok(digest) => {
                    self.store
                        .append_log(
                            job_id,
                            &format!("[delete] {}:{} ({})", repository, tag, digest),
                        )
                        .await;
                }
                // Another tag pointing at the same manifest already took it.
                Err(e) if e.is_not_found() => {
                    self.store
                        .append_log(job_id, &format!("[delete] already removed {}:{}", repository, tag))
                        .await;
                }
                Err(e) => {
                    failures += 1;
                    self.store
                        .append_log(job_id, &format!("[error] {}:{}: {}", repository, tag, e))
                        .await;
                }
            }
        }

        if failures > 0 {
            return Err(SyncError::Command(format!(
                "Failed to delete {} of {} tags in {}",
                failures, total, repository
            )));
        }
        Ok(())
    }
}
