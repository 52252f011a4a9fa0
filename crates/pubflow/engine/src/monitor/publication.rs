//! Publication request category

use super::JobCategory;
use crate::error::{EngineError, EngineResult};
use crate::paths::ContentPaths;
use crate::queue::PostProcessQueue;
use crate::runner::{JobDetail, JobResult, PublicationOutput, PublicationRunner};
use async_trait::async_trait;
use pubflow_store::TaskStore;
use pubflow_types::{PublicationRequest, PublicationRequestId, PublicationStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// Drives `PublicationRequest`s through Queued → Processing →
/// PostProcessReady | Error
pub struct PublicationJobs {
    store: Arc<dyn TaskStore>,
    paths: ContentPaths,
    post_process: Arc<PostProcessQueue>,
    reduction_wake: Arc<Notify>,
    task_poll_interval: Duration,
}

impl PublicationJobs {
    pub fn new(
        store: Arc<dyn TaskStore>,
        paths: ContentPaths,
        post_process: Arc<PostProcessQueue>,
        reduction_wake: Arc<Notify>,
        task_poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            paths,
            post_process,
            reduction_wake,
            task_poll_interval,
        }
    }
}

#[async_trait]
impl JobCategory for PublicationJobs {
    type Runner = PublicationRunner;
    const NAME: &'static str = "publication";

    async fn eligible(&self) -> EngineResult<Vec<PublicationRequest>> {
        Ok(self
            .store
            .list_requests_by_status(&[PublicationStatus::Queued])
            .await?)
    }

    fn key(request: &PublicationRequest) -> Uuid {
        *request.id.as_uuid()
    }

    async fn claim(&self, mut request: PublicationRequest) -> EngineResult<Option<PublicationRequest>> {
        request.set_status(PublicationStatus::Processing);
        match self.store.update_request(request).await {
            Ok(claimed) => Ok(Some(claimed)),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn runner(&self, claimed: PublicationRequest) -> PublicationRunner {
        PublicationRunner::new(
            claimed,
            self.store.clone(),
            self.paths.clone(),
            self.reduction_wake.clone(),
            self.task_poll_interval,
        )
    }

    async fn record(&self, detail: JobDetail<PublicationRequest, PublicationOutput>) -> EngineResult<()> {
        let JobDetail { request, result } = detail;
        // Re-read: the runner's copy may predate a concurrent cancel attempt.
        let mut current = self
            .store
            .get_request(&request.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("publication request {}", request.id)))?;
        if current.status != PublicationStatus::Processing {
            tracing::warn!(
                request_id = %current.id,
                status = %current.status,
                "Request left Processing while its runner was active"
            );
            return Ok(());
        }

        match result {
            JobResult::Success(output) => {
                current.live_ready_files = output.live_ready_files;
                current.reduction_related_files = output.reduction_related_files;
                current.set_status(PublicationStatus::PostProcessReady);
            }
            JobResult::Error(message) => current.set_error(message),
            JobResult::Canceled => {
                tracing::info!(request_id = %current.id, "Publication canceled, leaving request for recovery");
                return Ok(());
            }
        }

        let saved = self.store.update_request(current).await?;
        tracing::info!(request_id = %saved.id, status = %saved.status, "Publication job finished");
        if saved.status == PublicationStatus::PostProcessReady {
            self.post_process.enqueue(saved.id);
        }
        Ok(())
    }

    async fn abandon(&self, key: Uuid, reason: String) -> EngineResult<()> {
        let id = PublicationRequestId::from_uuid(key);
        let mut request = self
            .store
            .get_request(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("publication request {}", id)))?;
        request.set_error(reason);
        self.store.update_request(request).await?;
        Ok(())
    }
}
