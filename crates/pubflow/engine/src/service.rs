//! Composition root
//!
//! `PublishingService` owns the shared pipeline state (store, signal queues,
//! wake-ups) and exposes the client operations. `start` runs orphan
//! recovery and then spawns every long-running component.

use crate::audit::{AuditLogger, TracingAuditLog};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::golive::{GoLiveOrchestrator, NoopLicenseReclaimer, PreviewLicenseReclaimer};
use crate::monitor::{JobMonitor, MonitorHandle, PublicationJobs, ReductionJobs};
use crate::paths::ContentPaths;
use crate::postprocess::PostProcessor;
use crate::queue::{GoLiveSignal, PipelineSignals};
use crate::recovery::{OrphanRecovery, RecoveryReport, WatchOutcome};
use pubflow_reducer::Reducer;
use pubflow_store::{TaskStore, UnitOfWork};
use pubflow_types::{
    ContentItem, ContentItemId, ContentType, FileRef, HierarchyValueId, JobId, PublicationRequest,
    PublicationRequestId, PublicationStatus, ReductionAction, ReductionStatus, ReductionTask,
    SelectionGroup, SelectionGroupId, UploadedRelatedFile,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MASTER_GROUP_NAME: &str = "Master";

pub struct PublishingService {
    store: Arc<dyn TaskStore>,
    reducer: Arc<dyn Reducer>,
    audit: Arc<dyn AuditLogger>,
    reclaimer: Arc<dyn PreviewLicenseReclaimer>,
    config: EngineConfig,
    paths: ContentPaths,
    signals: PipelineSignals,
}

impl PublishingService {
    pub fn new(store: Arc<dyn TaskStore>, reducer: Arc<dyn Reducer>, config: EngineConfig) -> Self {
        let paths = ContentPaths::from_config(&config.paths);
        Self {
            store,
            reducer,
            audit: Arc::new(TracingAuditLog),
            reclaimer: Arc::new(NoopLicenseReclaimer),
            config,
            paths,
            signals: PipelineSignals::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn PreviewLicenseReclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn paths(&self) -> &ContentPaths {
        &self.paths
    }

    pub fn signals(&self) -> &PipelineSignals {
        &self.signals
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a content item; reducing types get their master group up front
    pub async fn create_content_item(
        &self,
        name: impl Into<String>,
        content_type: ContentType,
    ) -> EngineResult<ContentItem> {
        let item = ContentItem::new(name, content_type);
        let mut work = UnitOfWork::new();
        work.insert(item.clone());
        if item.content_type.reduces {
            work.insert(SelectionGroup::new(item.id, MASTER_GROUP_NAME, true));
        }
        self.store.commit(work).await?;

        tracing::info!(content_item_id = %item.id, name = %item.name, "Created content item");
        self.require_item(&item.id).await
    }

    pub async fn create_selection_group(
        &self,
        content_item_id: ContentItemId,
        name: impl Into<String>,
    ) -> EngineResult<SelectionGroup> {
        let item = self.require_item(&content_item_id).await?;
        if !item.content_type.reduces {
            return Err(EngineError::InvalidState(format!(
                "content type {} does not support selection groups",
                item.content_type.name
            )));
        }
        let group = self
            .store
            .insert_selection_group(SelectionGroup::new(item.id, name, false))
            .await?;
        tracing::info!(selection_group_id = %group.id, content_item_id = %item.id, "Created selection group");
        Ok(group)
    }

    /// Queue new content for publication
    pub async fn submit_publication(
        &self,
        content_item_id: ContentItemId,
        uploads: Vec<UploadedRelatedFile>,
    ) -> EngineResult<PublicationRequest> {
        if uploads.is_empty() {
            return Err(EngineError::Validation(
                "a publication needs at least one file".to_string(),
            ));
        }
        let mut purposes = HashSet::new();
        for upload in &uploads {
            if !purposes.insert(upload.purpose.to_ascii_lowercase()) {
                return Err(EngineError::Validation(format!(
                    "more than one file uploaded for purpose {}",
                    upload.purpose
                )));
            }
        }
        self.require_item(&content_item_id).await?;

        let request = self
            .store
            .insert_request(PublicationRequest::new(content_item_id, uploads))
            .await?;
        self.signals.publication_wake.notify_one();

        tracing::info!(
            request_id = %request.id,
            content_item_id = %content_item_id,
            files = request.uploaded_files.len(),
            "Publication submitted"
        );
        Ok(request)
    }

    /// Send a confirming request to go-live
    pub async fn approve_go_live(&self, request_id: PublicationRequestId) -> EngineResult<()> {
        let request = self.require_request(&request_id).await?;
        if request.status != PublicationStatus::Confirming {
            return Err(EngineError::InvalidState(format!(
                "publication request {} is {}, not confirming",
                request_id, request.status
            )));
        }
        self.signals.go_live.enqueue(GoLiveSignal::Publication {
            request: request.id,
            content_item: request.content_item_id,
        });
        tracing::info!(request_id = %request_id, "Go-live approved");
        Ok(())
    }

    /// Withdraw a request that no runner has picked up yet
    pub async fn cancel_publication(
        &self,
        request_id: PublicationRequestId,
    ) -> EngineResult<PublicationRequest> {
        let mut request = self.require_request(&request_id).await?;
        if request.status != PublicationStatus::Queued {
            return Err(EngineError::InvalidState(format!(
                "publication request {} is {} and can no longer be canceled",
                request_id, request.status
            )));
        }

        request.set_status(PublicationStatus::Canceled);
        match self.store.update_request(request).await {
            Ok(request) => {
                tracing::info!(request_id = %request_id, "Publication canceled");
                Ok(request)
            }
            Err(e) if e.is_conflict() => Err(EngineError::InvalidState(format!(
                "publication request {} was picked up before it could be canceled",
                request_id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Record a new selection and queue a reduction of the live master for it
    pub async fn update_selection_group(
        &self,
        group_id: SelectionGroupId,
        value_ids: Vec<HierarchyValueId>,
    ) -> EngineResult<ReductionTask> {
        let mut group = self
            .store
            .get_selection_group(&group_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("selection group {}", group_id)))?;
        if group.is_master {
            return Err(EngineError::InvalidState(
                "the master selection group is never reduced".to_string(),
            ));
        }

        let item = self.require_item(&group.content_item_id).await?;
        let master = item.master_file().cloned().ok_or_else(|| {
            EngineError::InvalidState(format!("content item {} has no live master content", item.id))
        })?;

        let live = self.store.load_hierarchy(&item.id).await?;
        let known: HashSet<_> = live.values.iter().map(|v| v.id).collect();
        if let Some(unknown) = value_ids.iter().find(|id| !known.contains(id)) {
            return Err(EngineError::Validation(format!(
                "hierarchy value {} is not live for content item {}",
                unknown, item.id
            )));
        }
        group.set_selection(value_ids);

        let job_id = JobId::generate();
        let exchange = self.paths.exchange_dir(job_id);
        let master_copy = copy_master(&master.path, &exchange).await?;

        let mut task = ReductionTask::new(item.id, group.id, job_id, ReductionAction::HierarchyAndReduction)
            .with_master_file(FileRef {
                path: master_copy,
                checksum: master.checksum.clone(),
            })
            .with_selection(live.criteria_for(&group.selected_value_ids));
        task.set_status(ReductionStatus::Queued);

        let mut work = UnitOfWork::new();
        work.update(group).insert(task.clone());
        if let Err(e) = self.store.commit(work).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&exchange).await {
                tracing::warn!(path = %exchange.display(), error = %cleanup, "Could not remove working directory");
            }
            return Err(e.into());
        }
        self.signals.reduction_wake.notify_one();

        tracing::info!(
            selection_group_id = %group_id,
            task_id = %task.id,
            "Selection group update queued for reduction"
        );
        self.store
            .get_task(&task.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("reduction task {}", task.id)))
    }

    /// Run orphan recovery, then spawn the monitors, the post-processor and
    /// the go-live orchestrator
    pub async fn start(&self, cancel: CancellationToken) -> EngineResult<RunningService> {
        let (recovery, watchers) = if self.config.recovery.enabled {
            let recovered = OrphanRecovery::new(
                self.store.clone(),
                self.paths.clone(),
                self.config.recovery.clone(),
                self.signals.clone(),
                self.config.go_live.auto_approve,
            )
            .run(&cancel)
            .await?;
            (recovered.report, recovered.watchers)
        } else {
            (RecoveryReport::default(), Vec::new())
        };

        let monitor = &self.config.monitor;
        let reductions = JobMonitor::new(
            ReductionJobs::new(self.store.clone(), self.reducer.clone(), self.signals.go_live.clone()),
            monitor.max_concurrent_reductions,
            monitor.poll_interval(),
        )
        .with_wake(self.signals.reduction_wake.clone())
        .start(cancel.child_token());

        let publications = JobMonitor::new(
            PublicationJobs::new(
                self.store.clone(),
                self.paths.clone(),
                self.signals.post_process.clone(),
                self.signals.reduction_wake.clone(),
                monitor.task_poll_interval(),
            ),
            monitor.max_concurrent_publications,
            monitor.poll_interval(),
        )
        .with_wake(self.signals.publication_wake.clone())
        .start(cancel.child_token());

        let post_processor = PostProcessor::new(
            self.store.clone(),
            self.signals.post_process.clone(),
            self.signals.go_live.clone(),
            self.config.go_live.auto_approve,
        )
        .start(cancel.child_token());

        let orchestrator = Arc::new(
            GoLiveOrchestrator::new(
                self.store.clone(),
                self.audit.clone(),
                self.paths.clone(),
                &self.config.go_live,
            )
            .with_reclaimer(self.reclaimer.clone()),
        );
        let go_live = orchestrator
            .clone()
            .start(self.signals.go_live.clone(), cancel.child_token());

        tracing::info!(
            max_concurrent_reductions = monitor.max_concurrent_reductions,
            max_concurrent_publications = monitor.max_concurrent_publications,
            auto_approve = self.config.go_live.auto_approve,
            "Publishing pipeline started"
        );

        Ok(RunningService {
            cancel,
            recovery,
            reductions,
            publications,
            post_processor,
            go_live,
            orchestrator,
            watchers,
        })
    }

    async fn require_item(&self, id: &ContentItemId) -> EngineResult<ContentItem> {
        self.store
            .get_content_item(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("content item {}", id)))
    }

    async fn require_request(&self, id: &PublicationRequestId) -> EngineResult<PublicationRequest> {
        self.store
            .get_request(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("publication request {}", id)))
    }
}

async fn copy_master(master: &std::path::Path, dir: &std::path::Path) -> EngineResult<PathBuf> {
    if !tokio::fs::try_exists(master).await? {
        return Err(EngineError::InvalidState(format!(
            "live master file {} is missing",
            master.display()
        )));
    }
    tokio::fs::create_dir_all(dir).await?;
    let name = master
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("master"));
    let dest = dir.join(name);
    tokio::fs::copy(master, &dest).await?;
    Ok(dest)
}

/// Handles to every running pipeline component
pub struct RunningService {
    cancel: CancellationToken,
    recovery: RecoveryReport,
    reductions: MonitorHandle,
    publications: MonitorHandle,
    post_processor: JoinHandle<()>,
    go_live: JoinHandle<()>,
    orchestrator: Arc<GoLiveOrchestrator>,
    watchers: Vec<JoinHandle<WatchOutcome>>,
}

impl RunningService {
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn reductions(&self) -> &MonitorHandle {
        &self.reductions
    }

    pub fn publications(&self) -> &MonitorHandle {
        &self.publications
    }

    pub fn orchestrator(&self) -> &Arc<GoLiveOrchestrator> {
        &self.orchestrator
    }

    /// Cancel every component and wait for it to stop
    pub async fn shutdown(self) {
        tracing::info!("Shutting down publishing pipeline");
        self.cancel.cancel();

        if let Err(e) = self.reductions.join().await {
            tracing::error!(error = %e, "Reduction monitor ended abnormally");
        }
        if let Err(e) = self.publications.join().await {
            tracing::error!(error = %e, "Publication monitor ended abnormally");
        }
        if let Err(e) = self.post_processor.await {
            tracing::error!(error = %e, "Post-processor ended abnormally");
        }
        if let Err(e) = self.go_live.await {
            tracing::error!(error = %e, "Go-live orchestrator ended abnormally");
        }
        for watcher in self.watchers {
            if let Err(e) = watcher.await {
                tracing::error!(error = %e, "Recovery watcher ended abnormally");
            }
        }
        tracing::info!("Publishing pipeline stopped");
    }
}
