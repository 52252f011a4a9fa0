//! Publication runner
//!
//! Stages the uploads of one request, queues the reductions the content
//! type needs and waits for them to finish.

use super::{JobDetail, JobResult, JobRunner};
use crate::error::{EngineError, EngineResult};
use crate::paths::{extension_of, hash_file, ContentPaths};
use async_trait::async_trait;
use pubflow_store::{TaskStore, UnitOfWork};
use pubflow_types::{
    checksums_match, ContentItem, ContentRelatedFile, FileRef, JobId,
    PublicationRequest, ReductionAction, ReductionRelatedFiles, ReductionStatus, ReductionTask,
    SelectionGroup, UploadedRelatedFile,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Files a successful publication job produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicationOutput {
    pub live_ready_files: Vec<ContentRelatedFile>,
    pub reduction_related_files: Vec<ReductionRelatedFiles>,
}

/// Runs one publication request up to the point where it can be
/// post-processed
pub struct PublicationRunner {
    request: PublicationRequest,
    store: Arc<dyn TaskStore>,
    paths: ContentPaths,
    reduction_wake: Arc<Notify>,
    task_poll_interval: Duration,
}

/// Failure modes inside the runner before they become a `JobResult`
enum Stop {
    Failed(String),
    Canceled,
}

impl From<EngineError> for Stop {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Canceled => Stop::Canceled,
            other => Stop::Failed(other.to_string()),
        }
    }
}

impl From<pubflow_store::StorageError> for Stop {
    fn from(e: pubflow_store::StorageError) -> Self {
        Stop::Failed(e.to_string())
    }
}

impl PublicationRunner {
    pub fn new(
        request: PublicationRequest,
        store: Arc<dyn TaskStore>,
        paths: ContentPaths,
        reduction_wake: Arc<Notify>,
        task_poll_interval: Duration,
    ) -> Self {
        Self {
            request,
            store,
            paths,
            reduction_wake,
            task_poll_interval,
        }
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<PublicationOutput, Stop> {
        let item = self
            .store
            .get_content_item(&self.request.content_item_id)
            .await?
            .ok_or_else(|| {
                Stop::Failed(format!(
                    "Content item {} does not exist",
                    self.request.content_item_id
                ))
            })?;

        let exchange = self.paths.exchange_dir(self.request.job_id);
        tokio::fs::create_dir_all(&exchange)
            .await
            .map_err(EngineError::from)?;

        let mut live_ready_files = Vec::with_capacity(self.request.uploaded_files.len());
        for upload in &self.request.uploaded_files {
            if cancel.is_cancelled() {
                return Err(Stop::Canceled);
            }
            live_ready_files.push(stage_upload(upload, &exchange).await?);
        }

        let master = live_ready_files.iter().find(|f| f.is_master()).cloned();
        let reduction_related_files = match master {
            Some(master) if item.content_type.reduces => {
                let tasks = self.ensure_tasks(&item, &master).await?;
                self.reduction_wake.notify_one();
                let tasks = self.wait_for_tasks(tasks.len(), cancel).await?;
                collect_reduced(&tasks)?
            }
            _ => Vec::new(),
        };

        Ok(PublicationOutput {
            live_ready_files,
            reduction_related_files,
        })
    }

    /// One task per selection group, created together. A re-run after a
    /// restart reuses the tasks created the first time.
    async fn ensure_tasks(
        &self,
        item: &ContentItem,
        master: &ContentRelatedFile,
    ) -> Result<Vec<ReductionTask>, Stop> {
        let existing = self.store.list_tasks_for_request(&self.request.id).await?;
        if !existing.is_empty() {
            tracing::info!(
                request_id = %self.request.id,
                tasks = existing.len(),
                "Resuming existing reduction tasks"
            );
            return Ok(existing);
        }

        let mut work = UnitOfWork::new();
        let mut groups = self.store.list_selection_groups(&item.id).await?;
        if !groups.iter().any(|g| g.is_master) {
            let master_group = SelectionGroup::new(item.id, "Master", true);
            work.insert(master_group.clone());
            groups.insert(0, master_group);
        }
        let live = self.store.load_hierarchy(&item.id).await?;

        let mut staged_dirs = Vec::with_capacity(groups.len());
        let mut task_count = 0;
        for group in &groups {
            let job_id = JobId::generate();
            let action = if group.is_master {
                ReductionAction::HierarchyOnly
            } else {
                ReductionAction::HierarchyAndReduction
            };

            let selection = live.criteria_for(&group.selected_value_ids);
            if action.includes_reduction() && selection.is_empty() {
                tracing::debug!(
                    selection_group_id = %group.id,
                    "Selection group has no live selections; its reduced content will be empty"
                );
            }

            let dir = self.paths.exchange_dir(job_id);
            staged_dirs.push(dir.clone());
            let master_copy = match stage_master(&master.path, &dir).await {
                Ok(path) => path,
                Err(e) => {
                    remove_dirs(&staged_dirs).await;
                    return Err(e.into());
                }
            };
            let mut task = ReductionTask::new(item.id, group.id, job_id, action)
                .for_request(self.request.id)
                .with_master_file(FileRef {
                    path: master_copy,
                    checksum: master.checksum.clone(),
                })
                .with_selection(selection);
            task.set_status(ReductionStatus::Queued);
            work.insert(task);
            task_count += 1;
        }

        if let Err(e) = self.store.commit(work).await {
            remove_dirs(&staged_dirs).await;
            return Err(e.into());
        }

        tracing::info!(
            request_id = %self.request.id,
            tasks = task_count,
            "Queued reduction tasks"
        );
        Ok(self.store.list_tasks_for_request(&self.request.id).await?)
    }

    async fn wait_for_tasks(
        &self,
        expected: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReductionTask>, Stop> {
        loop {
            let tasks = self.store.list_tasks_for_request(&self.request.id).await?;
            if tasks.len() >= expected && tasks.iter().all(|t| t.status.is_terminal()) {
                if let Some(failed) = tasks.iter().find(|t| t.status == ReductionStatus::Error) {
                    return Err(Stop::Failed(format!(
                        "Reduction task {} failed: {}",
                        failed.id, failed.status_message
                    )));
                }
                return Ok(tasks);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Stop::Canceled),
                _ = tokio::time::sleep(self.task_poll_interval) => {}
            }
        }
    }
}

async fn stage_upload(upload: &UploadedRelatedFile, exchange: &Path) -> Result<ContentRelatedFile, Stop> {
    let source_name = if upload.original_file_name.is_empty() {
        upload.staged_path.as_path()
    } else {
        Path::new(&upload.original_file_name)
    };
    let dest = exchange.join(format!("{}{}", upload.purpose, extension_of(source_name)));

    tokio::fs::copy(&upload.staged_path, &dest).await.map_err(|e| {
        Stop::Failed(format!(
            "Uploaded file {} could not be staged: {}",
            upload.staged_path.display(),
            e
        ))
    })?;

    let actual = hash_file(&dest).await?;
    if !checksums_match(&actual, &upload.checksum) {
        return Err(Stop::Failed(format!(
            "Uploaded file {} failed integrity check",
            upload.original_file_name
        )));
    }

    Ok(ContentRelatedFile {
        purpose: upload.purpose.clone(),
        path: dest,
        checksum: actual,
        original_file_name: upload.original_file_name.clone(),
    })
}

async fn stage_master(master: &Path, dir: &Path) -> EngineResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let name = master
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("master"));
    let dest = dir.join(name);
    tokio::fs::copy(master, &dest).await?;
    Ok(dest)
}

async fn remove_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %dir.display(), error = %e, "Could not remove working directory");
            }
        }
    }
}

fn collect_reduced(tasks: &[ReductionTask]) -> Result<Vec<ReductionRelatedFiles>, Stop> {
    tasks
        .iter()
        .filter(|t| t.action.includes_reduction())
        .map(|t| {
            let reduced_file = t.result_file.clone().ok_or_else(|| {
                Stop::Failed(format!("Reduction task {} has no result file", t.id))
            })?;
            Ok(ReductionRelatedFiles {
                selection_group_id: t.selection_group_id,
                reduction_task_id: t.id,
                reduced_file,
            })
        })
        .collect()
}

#[async_trait]
impl JobRunner for PublicationRunner {
    type Request = PublicationRequest;
    type Output = PublicationOutput;

    async fn execute(
        self,
        cancel: CancellationToken,
    ) -> JobDetail<PublicationRequest, PublicationOutput> {
        let result = match self.run(&cancel).await {
            Ok(output) => JobResult::Success(output),
            Err(Stop::Failed(message)) => {
                tracing::warn!(request_id = %self.request.id, error = %message, "Publication failed");
                JobResult::Error(message)
            }
            Err(Stop::Canceled) => JobResult::Canceled,
        };
        JobDetail::new(self.request, result)
    }
}
