//! Go-live orchestration
//!
//! Promotes a confirming publication request, or a selection-group edit, into
//! the live state. Validation is read-only and runs first. Promotion then
//! places files under their live names and stages every record change in one
//! unit of work. If the commit fails, the file changes are rolled back.

mod promote;
mod reconcile;
mod validate;

pub use promote::{Backup, FileRollback, NoopLicenseReclaimer, PreviewLicenseReclaimer};
pub use reconcile::{diff_hierarchy, HierarchyDiff};
pub(crate) use validate::verify;
pub use validate::{
    validate_publication, ReducedContent, ValidatedPublication, LIVE_FILE_INTEGRITY_FAILED,
    REDUCED_INTEGRITY_FAILED,
};

use crate::audit::{AuditEvent, AuditEventKind, AuditLogger};
use crate::config::GoLiveConfig;
use crate::error::{EngineError, EngineResult};
use crate::paths::{extension_of, ContentPaths};
use crate::queue::{GoLiveQueue, GoLiveSignal};
use dashmap::{DashMap, DashSet};
use promote::remove_dir_if_present;
use pubflow_store::{TaskStore, UnitOfWork};
use pubflow_types::{
    ContentItem, ContentItemId, ContentRelatedFile, FileRef, PublicationRequest,
    PublicationRequestId, PublicationStatus, ReductionStatus, ReductionTask, ReductionTaskId,
    SelectionGroupId,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a promotion attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Files are live and the store reflects it
    Published,
    /// Validation or promotion failed; the message is on the owning record
    Rejected(String),
    /// Nothing to do: the record is not in a promotable status
    Skipped,
}

/// Record changes and side effects of a promotion, ready to commit
struct StagedPromotion {
    work: UnitOfWork,
    events: Vec<AuditEventKind>,
    working_dirs: Vec<PathBuf>,
}

pub struct GoLiveOrchestrator {
    store: Arc<dyn TaskStore>,
    audit: Arc<dyn AuditLogger>,
    paths: ContentPaths,
    reclaimer: Arc<dyn PreviewLicenseReclaimer>,
    item_locks: DashMap<ContentItemId, Arc<Mutex<()>>>,
    in_flight: DashSet<Uuid>,
    duplicates_dropped: AtomicU64,
    permits: Arc<Semaphore>,
}

impl GoLiveOrchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        audit: Arc<dyn AuditLogger>,
        paths: ContentPaths,
        config: &GoLiveConfig,
    ) -> Self {
        Self {
            store,
            audit,
            paths,
            reclaimer: Arc::new(NoopLicenseReclaimer),
            item_locks: DashMap::new(),
            in_flight: DashSet::new(),
            duplicates_dropped: AtomicU64::new(0),
            permits: Arc::new(Semaphore::new(config.max_concurrent_promotions.max(1))),
        }
    }

    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn PreviewLicenseReclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    /// Number of promotions currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Signals dropped because the same promotion was already running
    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    /// Drain the go-live queue until `cancel` fires. Promotions already
    /// running are allowed to finish.
    pub fn start(self: Arc<Self>, queue: Arc<GoLiveQueue>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Go-live orchestrator started");
            let mut running = JoinSet::new();

            loop {
                tokio::select! {
                    signal = queue.dequeue(&cancel) => {
                        let Some(signal) = signal else { break };
                        let key = signal.key();
                        if !self.in_flight.insert(key) {
                            self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(key = %key, "Promotion already in flight, dropping signal");
                            continue;
                        }

                        let permit = tokio::select! {
                            permit = self.permits.clone().acquire_owned() => permit,
                            _ = cancel.cancelled() => {
                                self.in_flight.remove(&key);
                                break;
                            }
                        };
                        let Ok(permit) = permit else {
                            self.in_flight.remove(&key);
                            break;
                        };

                        let this = self.clone();
                        running.spawn(async move {
                            let _permit = permit;
                            let result = this.promote(signal).await;
                            this.in_flight.remove(&key);
                            match result {
                                Ok(outcome) => tracing::debug!(key = %key, outcome = ?outcome, "Promotion finished"),
                                Err(e) => tracing::error!(key = %key, error = %e, "Promotion failed"),
                            }
                        });
                    }
                    Some(joined) = running.join_next(), if !running.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "Promotion task panicked");
                        }
                    }
                }
            }

            while let Some(joined) = running.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Promotion task panicked");
                }
            }
            tracing::info!("Go-live orchestrator stopped");
        })
    }

    /// Promote one signal. Promotions of the same content item never overlap.
    pub async fn promote(&self, signal: GoLiveSignal) -> EngineResult<PromotionOutcome> {
        let lock = self
            .item_locks
            .entry(signal.content_item())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        match signal {
            GoLiveSignal::Publication { request, .. } => self.promote_publication(request).await,
            GoLiveSignal::SelectionGroup { task, .. } => self.promote_selection_group(task).await,
        }
    }

    async fn promote_publication(&self, id: PublicationRequestId) -> EngineResult<PromotionOutcome> {
        let request = self
            .store
            .get_request(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("publication request {}", id)))?;
        if request.status != PublicationStatus::Confirming {
            tracing::debug!(request_id = %id, status = %request.status, "Request is not confirming");
            return Ok(PromotionOutcome::Skipped);
        }
        let item = self
            .store
            .get_content_item(&request.content_item_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("content item {}", request.content_item_id)))?;

        let validated =
            match validate_publication(self.store.as_ref(), self.audit.as_ref(), &item, &request).await? {
                Ok(validated) => validated,
                Err(message) => {
                    tracing::warn!(request_id = %id, reason = %message, "Publication failed validation");
                    let mut request = request;
                    request.set_error(message.clone());
                    self.store.update_request(request).await?;
                    return Ok(PromotionOutcome::Rejected(message));
                }
            };

        let mut rollback = FileRollback::new();
        let staged = match self
            .stage_publication(item, &request, validated, &mut rollback)
            .await
        {
            Ok(staged) => staged,
            Err(e) => return self.abort_publication(id, rollback, e).await,
        };
        let StagedPromotion {
            work,
            events,
            working_dirs,
        } = staged;

        if let Err(e) = self.store.commit(work).await {
            return self.abort_publication(id, rollback, e.into()).await;
        }

        rollback.finish().await;
        for dir in &working_dirs {
            remove_dir_if_present(dir).await;
        }
        for kind in events {
            self.record(AuditEvent::new(request.content_item_id, kind).for_request(id))
                .await;
        }

        tracing::info!(
            request_id = %id,
            content_item_id = %request.content_item_id,
            "Publication is live"
        );
        Ok(PromotionOutcome::Published)
    }

    /// Place files and stage every record change of a publication
    async fn stage_publication(
        &self,
        mut item: ContentItem,
        request: &PublicationRequest,
        validated: ValidatedPublication,
        rollback: &mut FileRollback,
    ) -> EngineResult<StagedPromotion> {
        let ValidatedPublication {
            mut groups,
            mut tasks,
            reduced,
        } = validated;
        let mut work = UnitOfWork::new();
        let mut events = Vec::new();
        let mut changed_groups: HashSet<SelectionGroupId> = HashSet::new();

        let mut published = Vec::with_capacity(request.live_ready_files.len());
        for file in &request.live_ready_files {
            // Purposes compare case-insensitively, so one purpose maps to one live name
            let purpose = file.purpose.to_lowercase();
            let live = self
                .paths
                .live_file(item.id, &purpose, &extension_of(&file.path));
            if item.content_type.reclaims_preview_licenses {
                if let Some(previous) = item.related_file(&purpose) {
                    self.reclaimer.reclaim(&item, previous).await?;
                }
            }
            rollback.place(&file.path, &live).await?;
            item.replace_related_file(ContentRelatedFile {
                purpose,
                path: live.clone(),
                checksum: file.checksum.clone(),
                original_file_name: file.original_file_name.clone(),
            });
            published.push(live);
        }

        if request.live_ready_files.iter().any(|f| f.is_master()) {
            if let Some(master) = item.master_file() {
                let url = master.path.to_string_lossy().into_owned();
                for group in groups.iter_mut().filter(|g| g.is_master) {
                    group.content_url = Some(url.clone());
                    changed_groups.insert(group.id);
                }
            }
        }

        for ReducedContent { group, task, file } in &reduced {
            let live = self
                .paths
                .reduced_file(item.id, group.id, &extension_of(&file.path));
            rollback.place(&file.path, &live).await?;

            if let Some(group) = groups.iter_mut().find(|g| g.id == group.id) {
                group.content_url = Some(live.to_string_lossy().into_owned());
                group.reduced_checksum = Some(file.checksum.clone());
                changed_groups.insert(group.id);
            }
            if let Some(task) = tasks.iter_mut().find(|t| t.id == task.id) {
                task.result_file = Some(FileRef {
                    path: live.clone(),
                    checksum: file.checksum.clone(),
                });
            }
            events.push(AuditEventKind::SelectionGroupPublished {
                selection_group_id: group.id,
                reduction_task_id: task.id,
                path: live,
            });
        }
        events.insert(0, AuditEventKind::ContentPublished { files: published });
        work.update(item.clone());

        // Status fan-out
        for mut prior in self.store.list_requests_for_content_item(&item.id).await? {
            if prior.id != request.id && prior.status == PublicationStatus::Confirmed {
                prior.set_status(PublicationStatus::Replaced);
                work.update(prior);
            }
        }
        let mut confirmed = request.clone();
        confirmed.set_status(PublicationStatus::Confirmed);
        work.update(confirmed);

        let current: HashSet<ReductionTaskId> = tasks.iter().map(|t| t.id).collect();
        for mut prior in self.store.list_tasks_for_content_item(&item.id).await? {
            if prior.status == ReductionStatus::Live && !current.contains(&prior.id) {
                prior.set_status(ReductionStatus::Replaced);
                work.update(prior);
            }
        }

        let master_hierarchy = tasks
            .iter()
            .filter(|t| !t.action.includes_reduction())
            .chain(tasks.iter())
            .find_map(|t| t.master_hierarchy.clone());
        if let Some(master_hierarchy) = master_hierarchy {
            let live = self.store.load_hierarchy(&item.id).await?;
            let diff = diff_hierarchy(item.id, &master_hierarchy, &live);
            tracing::debug!(
                content_item_id = %item.id,
                new_fields = diff.new_fields.len(),
                inserts = diff.inserts.len(),
                deletes = diff.deletes.len(),
                "Reconciling live hierarchy"
            );
            diff.stage(&mut work);

            let surviving = diff.surviving_value_ids(&live);
            for group in groups.iter_mut().filter(|g| !g.is_master) {
                let before = group.selected_value_ids.len();
                group.selected_value_ids.retain(|id| surviving.contains(id));
                if group.selected_value_ids.len() != before {
                    changed_groups.insert(group.id);
                }
            }
        }

        let mut working_dirs = vec![self.paths.exchange_dir(request.job_id)];
        for mut task in tasks {
            working_dirs.push(self.paths.exchange_dir(task.job_id));
            task.set_status(ReductionStatus::Live);
            work.update(task);
        }
        for group in groups.into_iter().filter(|g| changed_groups.contains(&g.id)) {
            work.update(group);
        }

        Ok(StagedPromotion {
            work,
            events,
            working_dirs,
        })
    }

    async fn abort_publication(
        &self,
        id: PublicationRequestId,
        rollback: FileRollback,
        error: EngineError,
    ) -> EngineResult<PromotionOutcome> {
        let failures = rollback.rollback().await;
        tracing::error!(request_id = %id, error = %error, rollback_failures = failures, "Promotion failed");

        let message = format!("Promotion failed: {}", error);
        if let Some(mut request) = self.store.get_request(&id).await? {
            if request.status == PublicationStatus::Confirming {
                request.set_error(message.clone());
                self.store.update_request(request).await?;
            }
        }
        Ok(PromotionOutcome::Rejected(message))
    }

    async fn promote_selection_group(&self, id: ReductionTaskId) -> EngineResult<PromotionOutcome> {
        let mut task = self
            .store
            .get_task(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("reduction task {}", id)))?;
        if task.status != ReductionStatus::Reduced || task.publication_request_id.is_some() {
            tracing::debug!(task_id = %id, status = %task.status, "Task is not a pending selection-group edit");
            return Ok(PromotionOutcome::Skipped);
        }

        let Some(file) = task.result_file.clone() else {
            let message = format!("Reduction task {} has no result file", id);
            task.set_error(message.clone());
            self.store.update_task(task).await?;
            return Ok(PromotionOutcome::Rejected(message));
        };

        if let Err(actual) = verify(&file.path, &file.checksum).await {
            let event = AuditEvent::new(
                task.content_item_id,
                AuditEventKind::ReducedContentValidationFailed {
                    selection_group_id: task.selection_group_id,
                    reduction_task_id: task.id,
                    path: file.path.clone(),
                    expected_checksum: file.checksum.clone(),
                    actual_checksum: actual,
                },
            );
            self.record(event).await;
            task.set_error(REDUCED_INTEGRITY_FAILED);
            self.store.update_task(task).await?;
            return Ok(PromotionOutcome::Rejected(REDUCED_INTEGRITY_FAILED.to_string()));
        }

        let mut rollback = FileRollback::new();
        let staged = match self.stage_selection_group(&task, &file, &mut rollback).await {
            Ok(staged) => staged,
            Err(e) => return self.abort_selection_group(id, rollback, e).await,
        };
        let (work, live) = staged;
        if let Err(e) = self.store.commit(work).await {
            return self.abort_selection_group(id, rollback, e.into()).await;
        }

        rollback.finish().await;
        remove_dir_if_present(&self.paths.exchange_dir(task.job_id)).await;
        self.record(AuditEvent::new(
            task.content_item_id,
            AuditEventKind::SelectionGroupPublished {
                selection_group_id: task.selection_group_id,
                reduction_task_id: task.id,
                path: live,
            },
        ))
        .await;

        tracing::info!(
            task_id = %id,
            selection_group_id = %task.selection_group_id,
            "Selection group content is live"
        );
        Ok(PromotionOutcome::Published)
    }

    async fn stage_selection_group(
        &self,
        task: &ReductionTask,
        file: &FileRef,
        rollback: &mut FileRollback,
    ) -> EngineResult<(UnitOfWork, PathBuf)> {
        let mut group = self
            .store
            .get_selection_group(&task.selection_group_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!("selection group {}", task.selection_group_id))
            })?;

        let live = self
            .paths
            .reduced_file(task.content_item_id, group.id, &extension_of(&file.path));
        rollback.place(&file.path, &live).await?;

        let mut work = UnitOfWork::new();
        group.content_url = Some(live.to_string_lossy().into_owned());
        group.reduced_checksum = Some(file.checksum.clone());
        work.update(group.clone());

        for mut prior in self.store.list_tasks_for_content_item(&task.content_item_id).await? {
            if prior.id != task.id
                && prior.selection_group_id == group.id
                && prior.status == ReductionStatus::Live
            {
                prior.set_status(ReductionStatus::Replaced);
                work.update(prior);
            }
        }

        let mut promoted = task.clone();
        promoted.result_file = Some(FileRef {
            path: live.clone(),
            checksum: file.checksum.clone(),
        });
        promoted.set_status(ReductionStatus::Live);
        work.update(promoted);

        Ok((work, live))
    }

    async fn abort_selection_group(
        &self,
        id: ReductionTaskId,
        rollback: FileRollback,
        error: EngineError,
    ) -> EngineResult<PromotionOutcome> {
        let failures = rollback.rollback().await;
        tracing::error!(task_id = %id, error = %error, rollback_failures = failures, "Promotion failed");

        let message = format!("Promotion failed: {}", error);
        if let Some(mut task) = self.store.get_task(&id).await? {
            if task.status == ReductionStatus::Reduced {
                task.set_error(message.clone());
                self.store.update_task(task).await?;
            }
        }
        Ok(PromotionOutcome::Rejected(message))
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.log(event).await {
            tracing::warn!(error = %e, "Could not write audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use pubflow_store::{
        ContentStorage, InMemoryTaskStore, PublicationStorage, ReductionTaskStorage,
        SelectionGroupStorage,
    };
    use pubflow_types::{
        checksum_bytes, ContentHierarchy, ContentType, FieldStructure, JobId, ReductionAction,
        ReductionField, SelectionGroup,
    };
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::{Barrier, Notify};

    struct Fixture {
        dir: TempDir,
        store: Arc<InMemoryTaskStore>,
        audit: Arc<MemoryAuditLog>,
        orchestrator: Arc<GoLiveOrchestrator>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_reclaimer(Arc::new(NoopLicenseReclaimer))
        }

        fn with_reclaimer(reclaimer: Arc<dyn PreviewLicenseReclaimer>) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(InMemoryTaskStore::new());
            let audit = Arc::new(MemoryAuditLog::new());
            let paths = ContentPaths::new(dir.path().join("live"), dir.path().join("exchange"));
            let orchestrator =
                GoLiveOrchestrator::new(store.clone(), audit.clone(), paths, &GoLiveConfig::default())
                    .with_reclaimer(reclaimer);
            Self {
                dir,
                store,
                audit,
                orchestrator: Arc::new(orchestrator),
            }
        }

        /// Orchestrator over the same store whose audit writes always fail
        fn failing_audit(&self) -> GoLiveOrchestrator {
            GoLiveOrchestrator::new(
                self.store.clone(),
                Arc::new(FailingAudit),
                self.paths(),
                &GoLiveConfig::default(),
            )
        }

        /// Item whose live files hold preview licenses, already published once
        async fn licensed_item(&self, name: &str) -> ContentItem {
            let mut kind = ContentType::new("pdf", false);
            kind.reclaims_preview_licenses = true;
            let mut item = ContentItem::new(name, kind);
            item.related_files.push(ContentRelatedFile {
                purpose: "mastercontent".into(),
                path: self.dir.path().join("previous.pdf"),
                checksum: checksum_bytes(b"v0"),
                original_file_name: "previous.pdf".into(),
            });
            self.store.insert_content_item(item).await.unwrap()
        }

        fn paths(&self) -> ContentPaths {
            ContentPaths::new(self.dir.path().join("live"), self.dir.path().join("exchange"))
        }

        fn staged(&self, job: JobId, name: &str, body: &[u8]) -> (PathBuf, String) {
            let dir = self.paths().exchange_dir(job);
            std::fs::create_dir_all(&dir).unwrap();
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            (path, checksum_bytes(body))
        }

        async fn confirming(&self, item: &ContentItem, body: &[u8]) -> PublicationRequest {
            let mut request = PublicationRequest::new(item.id, Vec::new());
            let (path, checksum) = self.staged(request.job_id, "mastercontent.pdf", body);
            request.live_ready_files.push(ContentRelatedFile {
                purpose: "mastercontent".into(),
                path,
                checksum,
                original_file_name: "report.pdf".into(),
            });
            request.set_status(PublicationStatus::Confirming);
            self.store.insert_request(request).await.unwrap()
        }
    }

    fn signal(request: &PublicationRequest) -> GoLiveSignal {
        GoLiveSignal::Publication {
            request: request.id,
            content_item: request.content_item_id,
        }
    }

    fn read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }

    struct FailingAudit;

    #[async_trait]
    impl AuditLogger for FailingAudit {
        async fn log(&self, _event: AuditEvent) -> EngineResult<()> {
            Err(EngineError::Audit("audit volume is full".into()))
        }
    }

    /// Tracks how many reclaims overlap
    #[derive(Default)]
    struct OverlapReclaimer {
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PreviewLicenseReclaimer for OverlapReclaimer {
        async fn reclaim(&self, _item: &ContentItem, _previous: &ContentRelatedFile) -> EngineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Only returns once two reclaims are waiting at the same time
    struct RendezvousReclaimer {
        barrier: Barrier,
    }

    #[async_trait]
    impl PreviewLicenseReclaimer for RendezvousReclaimer {
        async fn reclaim(&self, _item: &ContentItem, _previous: &ContentRelatedFile) -> EngineResult<()> {
            tokio::time::timeout(Duration::from_secs(5), self.barrier.wait())
                .await
                .map(|_| ())
                .map_err(|_| EngineError::InvalidState("reclaims never overlapped".into()))
        }
    }

    /// Blocks every reclaim until released
    #[derive(Default)]
    struct HeldReclaimer {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PreviewLicenseReclaimer for HeldReclaimer {
        async fn reclaim(&self, _item: &ContentItem, _previous: &ContentRelatedFile) -> EngineResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_publication_goes_live() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Quarterly", ContentType::new("pdf", false)))
            .await
            .unwrap();
        let request = fx.confirming(&item, b"v1").await;
        let exchange = fx.paths().exchange_dir(request.job_id);

        let outcome = fx.orchestrator.promote(signal(&request)).await.unwrap();
        assert_eq!(outcome, PromotionOutcome::Published);

        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Confirmed);
        assert!(request.status_message.is_empty());

        let item = fx.store.get_content_item(&item.id).await.unwrap().unwrap();
        let live = item.master_file().unwrap();
        assert_eq!(live.path, fx.paths().live_file(item.id, "mastercontent", ".pdf"));
        assert_eq!(read(&live.path), b"v1");
        assert!(!exchange.exists());
        assert_eq!(fx.audit.count("content_published"), 1);
    }

    #[tokio::test]
    async fn test_second_publication_replaces_first() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Quarterly", ContentType::new("pdf", false)))
            .await
            .unwrap();
        let first = fx.confirming(&item, b"v1").await;
        fx.orchestrator.promote(signal(&first)).await.unwrap();

        let second = fx.confirming(&item, b"v2").await;
        fx.orchestrator.promote(signal(&second)).await.unwrap();

        let first = fx.store.get_request(&first.id).await.unwrap().unwrap();
        let second = fx.store.get_request(&second.id).await.unwrap().unwrap();
        assert_eq!(first.status, PublicationStatus::Replaced);
        assert_eq!(second.status, PublicationStatus::Confirmed);

        let live = fx.paths().live_file(item.id, "mastercontent", ".pdf");
        assert_eq!(read(&live), b"v2");
        assert!(!crate::paths::backup_path(&live).exists());
        let item = fx.store.get_content_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.related_files.len(), 1);
    }

    #[tokio::test]
    async fn test_live_file_checksum_mismatch_rejects() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Quarterly", ContentType::new("pdf", false)))
            .await
            .unwrap();
        let request = fx.confirming(&item, b"v1").await;
        std::fs::write(&request.live_ready_files[0].path, b"tampered").unwrap();

        let outcome = fx.orchestrator.promote(signal(&request)).await.unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::Rejected(LIVE_FILE_INTEGRITY_FAILED.to_string())
        );

        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Error);
        assert_eq!(request.status_message, LIVE_FILE_INTEGRITY_FAILED);
        assert!(!fx.paths().live_file(item.id, "mastercontent", ".pdf").exists());
        assert_eq!(fx.audit.count("live_file_validation_failed"), 1);
    }

    #[tokio::test]
    async fn test_missing_reduction_task_rejects() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Claims", ContentType::new("tabular", true)))
            .await
            .unwrap();
        let group = fx
            .store
            .insert_selection_group(SelectionGroup::new(item.id, "East", false))
            .await
            .unwrap();
        let request = fx.confirming(&item, b"{}").await;

        let outcome = fx.orchestrator.promote(signal(&request)).await.unwrap();
        let expected = format!(
            "expected 1 reduction task related to SelectionGroup {} but found 0",
            group.id
        );
        assert_eq!(outcome, PromotionOutcome::Rejected(expected.clone()));
        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status_message, expected);
    }

    #[tokio::test]
    async fn test_commit_failure_restores_previous_files() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Quarterly", ContentType::new("pdf", false)))
            .await
            .unwrap();
        let first = fx.confirming(&item, b"v1").await;
        fx.orchestrator.promote(signal(&first)).await.unwrap();

        let second = fx.confirming(&item, b"v2").await;
        fx.store.fail_next_commits(1);
        let outcome = fx.orchestrator.promote(signal(&second)).await.unwrap();
        assert!(matches!(outcome, PromotionOutcome::Rejected(m) if m.starts_with("Promotion failed")));

        let live = fx.paths().live_file(item.id, "mastercontent", ".pdf");
        assert_eq!(read(&live), b"v1");
        assert!(!crate::paths::backup_path(&live).exists());

        let first = fx.store.get_request(&first.id).await.unwrap().unwrap();
        let second = fx.store.get_request(&second.id).await.unwrap().unwrap();
        assert_eq!(first.status, PublicationStatus::Confirmed);
        assert_eq!(second.status, PublicationStatus::Error);
    }

    #[tokio::test]
    async fn test_non_confirming_request_is_skipped() {
        let fx = Fixture::new();
        let request = fx
            .store
            .insert_request(PublicationRequest::new(ContentItemId::generate(), Vec::new()))
            .await
            .unwrap();
        let outcome = fx.orchestrator.promote(signal(&request)).await.unwrap();
        assert_eq!(outcome, PromotionOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_selection_group_edit_goes_live() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Claims", ContentType::new("tabular", true)))
            .await
            .unwrap();
        let group = fx
            .store
            .insert_selection_group(SelectionGroup::new(item.id, "East", false))
            .await
            .unwrap();

        let mut previous = ReductionTask::new(item.id, group.id, JobId::generate(), ReductionAction::HierarchyAndReduction);
        previous.set_status(ReductionStatus::Live);
        let previous = fx.store.insert_task(previous).await.unwrap();

        let mut task = ReductionTask::new(item.id, group.id, JobId::generate(), ReductionAction::HierarchyAndReduction);
        let (path, checksum) = fx.staged(task.job_id, "master.reduced.json", b"[]");
        task.result_file = Some(FileRef { path, checksum: checksum.to_uppercase() });
        task.master_hierarchy = Some(ContentHierarchy {
            fields: vec![ReductionField {
                name: "Region".into(),
                display_name: "Region".into(),
                structure: FieldStructure::Flat,
                values: vec!["East".into()],
            }],
        });
        task.set_status(ReductionStatus::Reduced);
        let task = fx.store.insert_task(task).await.unwrap();

        let outcome = fx
            .orchestrator
            .promote(GoLiveSignal::SelectionGroup {
                task: task.id,
                content_item: item.id,
            })
            .await
            .unwrap();
        assert_eq!(outcome, PromotionOutcome::Published);

        let live = fx.paths().reduced_file(item.id, group.id, ".json");
        assert_eq!(read(&live), b"[]");
        let group = fx.store.get_selection_group(&group.id).await.unwrap().unwrap();
        assert_eq!(group.content_url.as_deref(), Some(&*live.to_string_lossy()));
        assert!(group.reduced_checksum.is_some());

        let task = fx.store.get_task(&task.id).await.unwrap().unwrap();
        let previous = fx.store.get_task(&previous.id).await.unwrap().unwrap();
        assert_eq!(task.status, ReductionStatus::Live);
        assert_eq!(previous.status, ReductionStatus::Replaced);
        assert_eq!(fx.audit.count("selection_group_published"), 1);
    }

    #[tokio::test]
    async fn test_tampered_edit_is_rejected() {
        let fx = Fixture::new();
        let item = ContentItemId::generate();
        let group = SelectionGroupId::generate();
        let mut task = ReductionTask::new(item, group, JobId::generate(), ReductionAction::HierarchyAndReduction);
        let (path, checksum) = fx.staged(task.job_id, "master.reduced.json", b"[]");
        std::fs::write(&path, b"[1]").unwrap();
        task.result_file = Some(FileRef { path, checksum });
        task.set_status(ReductionStatus::Reduced);
        let task = fx.store.insert_task(task).await.unwrap();

        let outcome = fx
            .orchestrator
            .promote(GoLiveSignal::SelectionGroup { task: task.id, content_item: item })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::Rejected(REDUCED_INTEGRITY_FAILED.to_string())
        );
        let task = fx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, ReductionStatus::Error);
        assert_eq!(fx.audit.count("reduced_content_validation_failed"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_promotions_for_one_item_serialize() {
        let reclaimer = Arc::new(OverlapReclaimer::default());
        let fx = Fixture::with_reclaimer(reclaimer.clone());
        let item = fx.licensed_item("Quarterly").await;
        let first = fx.confirming(&item, b"v1").await;
        let second = fx.confirming(&item, b"v2").await;

        let (a, b) = tokio::join!(
            fx.orchestrator.promote(signal(&first)),
            fx.orchestrator.promote(signal(&second))
        );
        assert_eq!(a.unwrap(), PromotionOutcome::Published);
        assert_eq!(b.unwrap(), PromotionOutcome::Published);
        assert_eq!(reclaimer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(reclaimer.peak.load(Ordering::SeqCst), 1);

        let first = fx.store.get_request(&first.id).await.unwrap().unwrap();
        let second = fx.store.get_request(&second.id).await.unwrap().unwrap();
        let confirmed: Vec<_> = [&first, &second]
            .into_iter()
            .filter(|r| r.status == PublicationStatus::Confirmed)
            .collect();
        let replaced = [&first, &second]
            .into_iter()
            .filter(|r| r.status == PublicationStatus::Replaced)
            .count();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(replaced, 1);

        let live = fx.paths().live_file(item.id, "mastercontent", ".pdf");
        let winner = if confirmed[0].id == first.id { b"v1" } else { b"v2" };
        assert_eq!(read(&live), winner);
    }

    #[tokio::test]
    async fn test_promotions_for_different_items_overlap() {
        let fx = Fixture::with_reclaimer(Arc::new(RendezvousReclaimer {
            barrier: Barrier::new(2),
        }));
        let east = fx.licensed_item("East report").await;
        let west = fx.licensed_item("West report").await;
        let east_request = fx.confirming(&east, b"east").await;
        let west_request = fx.confirming(&west, b"west").await;

        let (a, b) = tokio::join!(
            fx.orchestrator.promote(signal(&east_request)),
            fx.orchestrator.promote(signal(&west_request))
        );
        assert_eq!(a.unwrap(), PromotionOutcome::Published);
        assert_eq!(b.unwrap(), PromotionOutcome::Published);
        assert_eq!(read(&fx.paths().live_file(east.id, "mastercontent", ".pdf")), b"east");
        assert_eq!(read(&fx.paths().live_file(west.id, "mastercontent", ".pdf")), b"west");
    }

    #[tokio::test]
    async fn test_duplicate_signal_is_dropped_while_in_flight() {
        let reclaimer = Arc::new(HeldReclaimer::default());
        let fx = Fixture::with_reclaimer(reclaimer.clone());
        let item = fx.licensed_item("Quarterly").await;
        let request = fx.confirming(&item, b"v1").await;

        let queue = Arc::new(GoLiveQueue::new());
        let cancel = CancellationToken::new();
        let handle = fx.orchestrator.clone().start(queue.clone(), cancel.clone());

        queue.enqueue(signal(&request));
        tokio::time::timeout(Duration::from_secs(2), reclaimer.entered.notified())
            .await
            .unwrap();
        assert_eq!(fx.orchestrator.in_flight(), 1);

        queue.enqueue(signal(&request));
        let orchestrator = fx.orchestrator.clone();
        eventually(|| orchestrator.duplicates_dropped() == 1).await;
        assert!(queue.is_empty());

        reclaimer.release.notify_one();
        eventually(|| orchestrator.in_flight() == 0).await;

        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Confirmed);
        assert_eq!(reclaimer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.audit.count("content_published"), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_two_tasks_for_one_group_rejects() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Claims", ContentType::new("tabular", true)))
            .await
            .unwrap();
        let group = fx
            .store
            .insert_selection_group(SelectionGroup::new(item.id, "East", false))
            .await
            .unwrap();
        let request = fx.confirming(&item, b"{}").await;
        for _ in 0..2 {
            let mut task = ReductionTask::new(
                item.id,
                group.id,
                JobId::generate(),
                ReductionAction::HierarchyAndReduction,
            )
            .for_request(request.id);
            task.set_status(ReductionStatus::Reduced);
            fx.store.insert_task(task).await.unwrap();
        }

        let outcome = fx.orchestrator.promote(signal(&request)).await.unwrap();
        let expected = format!(
            "expected 1 reduction task related to SelectionGroup {} but found 2",
            group.id
        );
        assert_eq!(outcome, PromotionOutcome::Rejected(expected.clone()));
        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Error);
        assert_eq!(request.status_message, expected);
    }

    #[tokio::test]
    async fn test_purpose_case_maps_to_one_live_file() {
        let fx = Fixture::new();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Quarterly", ContentType::new("pdf", false)))
            .await
            .unwrap();

        for (purpose, body) in [("thumbnail", b"t1"), ("Thumbnail", b"t2")] {
            let mut request = PublicationRequest::new(item.id, Vec::new());
            let (path, checksum) = fx.staged(request.job_id, "thumb.png", body);
            request.live_ready_files.push(ContentRelatedFile {
                purpose: purpose.into(),
                path,
                checksum,
                original_file_name: "thumb.png".into(),
            });
            request.set_status(PublicationStatus::Confirming);
            let request = fx.store.insert_request(request).await.unwrap();
            let outcome = fx.orchestrator.promote(signal(&request)).await.unwrap();
            assert_eq!(outcome, PromotionOutcome::Published);
        }

        let live = fx.paths().live_file(item.id, "thumbnail", ".png");
        assert_eq!(read(&live), b"t2");
        let names: Vec<_> = std::fs::read_dir(live.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);

        let item = fx.store.get_content_item(&item.id).await.unwrap().unwrap();
        assert_eq!(item.related_files.len(), 1);
        assert_eq!(item.related_files[0].purpose, "thumbnail");
        assert_eq!(item.related_files[0].path, live);
    }

    #[tokio::test]
    async fn test_audit_failure_still_rejects_publication() {
        let fx = Fixture::new();
        let orchestrator = fx.failing_audit();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Quarterly", ContentType::new("pdf", false)))
            .await
            .unwrap();
        let request = fx.confirming(&item, b"v1").await;
        std::fs::write(&request.live_ready_files[0].path, b"tampered").unwrap();

        let outcome = orchestrator.promote(signal(&request)).await.unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::Rejected(LIVE_FILE_INTEGRITY_FAILED.to_string())
        );
        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Error);
        assert_eq!(request.status_message, LIVE_FILE_INTEGRITY_FAILED);
    }

    #[tokio::test]
    async fn test_audit_failure_still_rejects_reduced_content() {
        let fx = Fixture::new();
        let orchestrator = fx.failing_audit();
        let item = fx
            .store
            .insert_content_item(ContentItem::new("Claims", ContentType::new("tabular", true)))
            .await
            .unwrap();
        let group = fx
            .store
            .insert_selection_group(SelectionGroup::new(item.id, "East", false))
            .await
            .unwrap();
        let request = fx.confirming(&item, b"{}").await;
        let mut task = ReductionTask::new(
            item.id,
            group.id,
            JobId::generate(),
            ReductionAction::HierarchyAndReduction,
        )
        .for_request(request.id);
        let (path, checksum) = fx.staged(task.job_id, "master.reduced.json", b"[]");
        std::fs::write(&path, b"[1]").unwrap();
        task.result_file = Some(FileRef { path, checksum });
        task.set_status(ReductionStatus::Reduced);
        fx.store.insert_task(task).await.unwrap();

        let outcome = orchestrator.promote(signal(&request)).await.unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::Rejected(REDUCED_INTEGRITY_FAILED.to_string())
        );
        let request = fx.store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(request.status, PublicationStatus::Error);
        assert_eq!(request.status_message, REDUCED_INTEGRITY_FAILED);
    }

    #[tokio::test]
    async fn test_audit_failure_still_rejects_tampered_edit() {
        let fx = Fixture::new();
        let orchestrator = fx.failing_audit();
        let item = ContentItemId::generate();
        let group = SelectionGroupId::generate();
        let mut task = ReductionTask::new(item, group, JobId::generate(), ReductionAction::HierarchyAndReduction);
        let (path, checksum) = fx.staged(task.job_id, "master.reduced.json", b"[]");
        std::fs::write(&path, b"[1]").unwrap();
        task.result_file = Some(FileRef { path, checksum });
        task.set_status(ReductionStatus::Reduced);
        let task = fx.store.insert_task(task).await.unwrap();

        let outcome = orchestrator
            .promote(GoLiveSignal::SelectionGroup { task: task.id, content_item: item })
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PromotionOutcome::Rejected(REDUCED_INTEGRITY_FAILED.to_string())
        );
        let task = fx.store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, ReductionStatus::Error);
        assert_eq!(task.status_message, REDUCED_INTEGRITY_FAILED);
    }
}
