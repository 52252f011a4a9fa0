//! Orphan recovery
//!
//! Runs once at startup, before the monitors. A crash can strand work at any
//! point between "task finished" and "promotion committed"; everything the
//! pipeline needs to pick it up again is in the store, so recovery only
//! resets statuses that belonged to dead runners and re-signals the rest.
//! Leftover `.bak` files from an interrupted promotion are reconciled
//! against the checksums the store holds for the live files.

use crate::config::RecoveryConfig;
use crate::error::EngineResult;
use crate::golive::verify;
use crate::paths::{backup_target, ContentPaths};
use crate::queue::{GoLiveQueue, GoLiveSignal, PipelineSignals};
use chrono::Utc;
use pubflow_store::TaskStore;
use pubflow_types::{
    ContentItemId, PublicationRequest, PublicationStatus, ReductionStatus, ReductionTask,
    ReductionTaskId,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a startup recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `Reducing` tasks put back to `Queued`
    pub requeued_tasks: usize,
    /// Selection-group edits now watched for completion
    pub watched_tasks: usize,
    /// `Processing` requests put back to `Queued`
    pub requeued_requests: usize,
    /// Requests re-sent to post-processing
    pub post_processing_resumed: usize,
    /// Confirming requests re-sent to go-live
    pub go_live_resumed: usize,
    pub backups_removed: usize,
    pub backups_restored: usize,
}

/// How a go-live watcher ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The task reached `Reduced` and was signalled for promotion
    Signaled,
    /// The task left the pending statuses some other way
    Abandoned,
    /// Still pending after the maximum wait; left for manual intervention
    TimedOut,
    Canceled,
}

/// Result of a recovery pass
#[derive(Debug)]
pub struct Recovery {
    pub report: RecoveryReport,
    pub watchers: Vec<JoinHandle<WatchOutcome>>,
}

pub struct OrphanRecovery {
    store: Arc<dyn TaskStore>,
    paths: ContentPaths,
    config: RecoveryConfig,
    signals: PipelineSignals,
    auto_approve: bool,
}

impl OrphanRecovery {
    pub fn new(
        store: Arc<dyn TaskStore>,
        paths: ContentPaths,
        config: RecoveryConfig,
        signals: PipelineSignals,
        auto_approve: bool,
    ) -> Self {
        Self {
            store,
            paths,
            config,
            signals,
            auto_approve,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> EngineResult<Recovery> {
        let mut report = RecoveryReport::default();

        let (removed, restored) = self.reconcile_backups().await?;
        report.backups_removed = removed;
        report.backups_restored = restored;

        let watchers = self.recover_tasks(&mut report, cancel).await?;
        self.recover_requests(&mut report).await?;

        tracing::info!(
            requeued_tasks = report.requeued_tasks,
            watched_tasks = report.watched_tasks,
            requeued_requests = report.requeued_requests,
            post_processing_resumed = report.post_processing_resumed,
            go_live_resumed = report.go_live_resumed,
            backups_removed = report.backups_removed,
            backups_restored = report.backups_restored,
            "Orphan recovery finished"
        );
        Ok(Recovery { report, watchers })
    }

    async fn recover_tasks(
        &self,
        report: &mut RecoveryReport,
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<JoinHandle<WatchOutcome>>> {
        let cutoff = Utc::now() - self.config.lookback();
        let candidates = self
            .store
            .list_tasks_by_status(&[
                ReductionStatus::Queued,
                ReductionStatus::Reducing,
                ReductionStatus::Reduced,
            ])
            .await?;

        let mut watchers = Vec::new();
        for task in candidates.into_iter().filter(|t| t.created_at >= cutoff) {
            if let Some(request_id) = task.publication_request_id {
                match self.store.get_request(&request_id).await? {
                    Some(request) if !request.status.is_terminal() => {}
                    _ => continue,
                }
            }

            let Some(task) = self.requeue_if_reducing(task, report).await? else {
                continue;
            };

            // Request-owned tasks are awaited by their publication runner.
            if task.publication_request_id.is_none() {
                report.watched_tasks += 1;
                watchers.push(tokio::spawn(watch_task(
                    self.store.clone(),
                    self.signals.go_live.clone(),
                    task.id,
                    task.content_item_id,
                    self.config.watcher_poll(),
                    self.config.watcher_max_wait(),
                    cancel.child_token(),
                )));
            }
        }

        if report.requeued_tasks > 0 {
            self.signals.reduction_wake.notify_one();
        }
        Ok(watchers)
    }

    /// The runner that held a `Reducing` claim died with the process
    async fn requeue_if_reducing(
        &self,
        mut task: ReductionTask,
        report: &mut RecoveryReport,
    ) -> EngineResult<Option<ReductionTask>> {
        if task.status != ReductionStatus::Reducing {
            return Ok(Some(task));
        }
        task.set_status(ReductionStatus::Queued);
        match self.store.update_task(task).await {
            Ok(task) => {
                tracing::info!(task_id = %task.id, "Requeued orphaned reduction task");
                report.requeued_tasks += 1;
                Ok(Some(task))
            }
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn recover_requests(&self, report: &mut RecoveryReport) -> EngineResult<()> {
        let cutoff = Utc::now() - self.config.lookback();
        let requests = self
            .store
            .list_requests_by_status(&[
                PublicationStatus::Processing,
                PublicationStatus::PostProcessing,
                PublicationStatus::PostProcessReady,
                PublicationStatus::Confirming,
            ])
            .await?;

        for mut request in requests.into_iter().filter(|r| r.created_at >= cutoff) {
            let id = request.id;
            match request.status {
                PublicationStatus::Processing => {
                    request.set_status(PublicationStatus::Queued);
                    if self.reset(request).await? {
                        report.requeued_requests += 1;
                    }
                }
                PublicationStatus::PostProcessing => {
                    request.set_status(PublicationStatus::PostProcessReady);
                    if self.reset(request).await? {
                        self.signals.post_process.enqueue(id);
                        report.post_processing_resumed += 1;
                    }
                }
                PublicationStatus::PostProcessReady => {
                    self.signals.post_process.enqueue(id);
                    report.post_processing_resumed += 1;
                }
                PublicationStatus::Confirming if self.auto_approve => {
                    self.signals.go_live.enqueue(GoLiveSignal::Publication {
                        request: id,
                        content_item: request.content_item_id,
                    });
                    report.go_live_resumed += 1;
                }
                _ => {}
            }
        }

        if report.requeued_requests > 0 {
            self.signals.publication_wake.notify_one();
        }
        Ok(())
    }

    async fn reset(&self, request: PublicationRequest) -> EngineResult<bool> {
        let id = request.id;
        match self.store.update_request(request).await {
            Ok(request) => {
                tracing::info!(request_id = %id, status = %request.status, "Reset orphaned publication request");
                Ok(true)
            }
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve every `{live}.bak` under the content item root. A backup is
    /// stale when the live file matches what the store says is live;
    /// otherwise the promotion that made it never committed and the backup
    /// is restored.
    async fn reconcile_backups(&self) -> EngineResult<(usize, usize)> {
        let root = self.paths.content_item_root();
        if !tokio::fs::try_exists(root).await? {
            return Ok((0, 0));
        }

        let (mut removed, mut restored) = (0, 0);
        let mut items = tokio::fs::read_dir(root).await?;
        while let Some(entry) = items.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(item_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
                .map(ContentItemId::from_uuid)
            else {
                continue;
            };

            let backups = list_backups(&entry.path()).await?;
            if backups.is_empty() {
                continue;
            }

            let expected = self.live_checksums(item_id).await?;
            for (backup, live) in backups {
                let restore = match expected.get(&live) {
                    Some(checksum) => verify(&live, checksum).await.is_err(),
                    None => !tokio::fs::try_exists(&live).await?,
                };

                if restore {
                    tokio::fs::rename(&backup, &live).await?;
                    tracing::warn!(path = %live.display(), "Restored live file from backup");
                    restored += 1;
                } else {
                    tokio::fs::remove_file(&backup).await?;
                    tracing::debug!(path = %backup.display(), "Removed stale backup");
                    removed += 1;
                }
            }
        }

        Ok((removed, restored))
    }

    /// Live path → checksum, for every file the store says is live
    async fn live_checksums(&self, item_id: ContentItemId) -> EngineResult<HashMap<PathBuf, String>> {
        let mut expected = HashMap::new();
        if let Some(item) = self.store.get_content_item(&item_id).await? {
            for file in item.related_files {
                expected.insert(file.path, file.checksum);
            }
        }
        for group in self.store.list_selection_groups(&item_id).await? {
            if let (Some(url), Some(checksum)) = (group.content_url, group.reduced_checksum) {
                expected.insert(PathBuf::from(url), checksum);
            }
        }
        Ok(expected)
    }
}

async fn list_backups(dir: &Path) -> EngineResult<Vec<(PathBuf, PathBuf)>> {
    let mut backups = Vec::new();
    let mut files = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = files.next_entry().await? {
        let path = entry.path();
        if let Some(live) = backup_target(&path) {
            backups.push((path, live));
        }
    }
    Ok(backups)
}

/// Poll a selection-group edit until it is reduced, then signal go-live
async fn watch_task(
    store: Arc<dyn TaskStore>,
    go_live: Arc<GoLiveQueue>,
    task_id: ReductionTaskId,
    content_item: ContentItemId,
    poll: Duration,
    max_wait: Duration,
    cancel: CancellationToken,
) -> WatchOutcome {
    let deadline = Instant::now() + max_wait;
    loop {
        match store.get_task(&task_id).await {
            Ok(Some(task)) => match task.status {
                ReductionStatus::Reduced => {
                    go_live.enqueue(GoLiveSignal::SelectionGroup {
                        task: task_id,
                        content_item,
                    });
                    tracing::info!(task_id = %task_id, "Recovered task ready for go-live");
                    return WatchOutcome::Signaled;
                }
                ReductionStatus::Queued | ReductionStatus::Reducing => {}
                status => {
                    tracing::debug!(task_id = %task_id, status = %status, "Watched task left the pipeline");
                    return WatchOutcome::Abandoned;
                }
            },
            Ok(None) => return WatchOutcome::Abandoned,
            Err(e) => tracing::warn!(task_id = %task_id, error = %e, "Watcher could not read task"),
        }

        if Instant::now() >= deadline {
            tracing::warn!(
                task_id = %task_id,
                waited_secs = max_wait.as_secs(),
                "Gave up waiting for reduction, leaving task for manual intervention"
            );
            return WatchOutcome::TimedOut;
        }

        tokio::select! {
            _ = cancel.cancelled() => return WatchOutcome::Canceled,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}
