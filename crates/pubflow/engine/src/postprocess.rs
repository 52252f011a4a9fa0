//! Post-processing of finished publication jobs
//!
//! PostProcessReady → PostProcessing → Confirming, then either straight onto
//! the go-live queue or waiting for an explicit approval.

use crate::error::{EngineError, EngineResult};
use crate::queue::{GoLiveQueue, GoLiveSignal, PostProcessQueue};
use pubflow_store::TaskStore;
use pubflow_types::{PublicationRequest, PublicationRequestId, PublicationStatus};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drains the post-process queue
pub struct PostProcessor {
    store: Arc<dyn TaskStore>,
    queue: Arc<PostProcessQueue>,
    go_live: Arc<GoLiveQueue>,
    auto_approve: bool,
}

impl PostProcessor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<PostProcessQueue>,
        go_live: Arc<GoLiveQueue>,
        auto_approve: bool,
    ) -> Self {
        Self {
            store,
            queue,
            go_live,
            auto_approve,
        }
    }

    pub fn start(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(auto_approve = self.auto_approve, "Post-processor started");
            while let Some(id) = self.queue.dequeue(&cancel).await {
                if let Err(e) = self.process(id).await {
                    tracing::error!(request_id = %id, error = %e, "Post-processing failed");
                }
            }
            tracing::info!("Post-processor stopped");
        })
    }

    /// Post-process one request; returns its resulting status
    pub async fn process(&self, id: PublicationRequestId) -> EngineResult<PublicationStatus> {
        let request = self
            .store
            .get_request(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("publication request {}", id)))?;
        if request.status != PublicationStatus::PostProcessReady {
            tracing::debug!(request_id = %id, status = %request.status, "Not ready for post-processing");
            return Ok(request.status);
        }

        let mut request = request;
        request.set_status(PublicationStatus::PostProcessing);
        let mut request = match self.store.update_request(request).await {
            Ok(request) => request,
            Err(e) if e.is_conflict() => {
                tracing::debug!(request_id = %id, "Request picked up elsewhere");
                return Ok(PublicationStatus::PostProcessing);
            }
            Err(e) => return Err(e.into()),
        };

        match missing_file(&request).await {
            Some(message) => request.set_error(message),
            None => request.set_status(PublicationStatus::Confirming),
        }
        let request = self.store.update_request(request).await?;
        tracing::info!(request_id = %id, status = %request.status, "Post-processing finished");

        if request.status == PublicationStatus::Confirming && self.auto_approve {
            self.go_live.enqueue(GoLiveSignal::Publication {
                request: request.id,
                content_item: request.content_item_id,
            });
        }
        Ok(request.status)
    }
}

async fn missing_file(request: &PublicationRequest) -> Option<String> {
    for related in &request.reduction_related_files {
        if !exists(&related.reduced_file.path).await {
            return Some(format!(
                "Reduced content file {} for SelectionGroup {} is missing",
                related.reduced_file.path.display(),
                related.selection_group_id
            ));
        }
    }
    for file in &request.live_ready_files {
        if !exists(&file.path).await {
            return Some(format!("Live-ready file {} is missing", file.path.display()));
        }
    }
    None
}

async fn exists(path: &std::path::Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubflow_store::{InMemoryTaskStore, PublicationStorage};
    use pubflow_types::{ContentItemId, ContentRelatedFile};
    use tempfile::TempDir;

    async fn ready_request(store: &InMemoryTaskStore, file: std::path::PathBuf) -> PublicationRequest {
        let mut request = PublicationRequest::new(ContentItemId::generate(), Vec::new());
        request.live_ready_files.push(ContentRelatedFile {
            purpose: "thumbnail".into(),
            path: file,
            checksum: String::new(),
            original_file_name: "thumb.png".into(),
        });
        request.set_status(PublicationStatus::PostProcessReady);
        store.insert_request(request).await.unwrap()
    }

    fn processor(store: Arc<InMemoryTaskStore>, auto_approve: bool) -> (PostProcessor, Arc<GoLiveQueue>) {
        let go_live = Arc::new(GoLiveQueue::new());
        let processor = PostProcessor::new(store, Arc::new(PostProcessQueue::new()), go_live.clone(), auto_approve);
        (processor, go_live)
    }

    #[tokio::test]
    async fn test_confirms_and_auto_approves() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("thumb.png");
        std::fs::write(&file, b"png").unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let request = ready_request(&store, file).await;
        let (processor, go_live) = processor(store.clone(), true);

        let status = processor.process(request.id).await.unwrap();

        assert_eq!(status, PublicationStatus::Confirming);
        assert!(matches!(
            go_live.try_dequeue(),
            Some(GoLiveSignal::Publication { request: r, .. }) if r == request.id
        ));
    }

    #[tokio::test]
    async fn test_waits_for_approval() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("thumb.png");
        std::fs::write(&file, b"png").unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let request = ready_request(&store, file).await;
        let (processor, go_live) = processor(store, false);

        assert_eq!(processor.process(request.id).await.unwrap(), PublicationStatus::Confirming);
        assert!(go_live.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_fails_request() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryTaskStore::new());
        let request = ready_request(&store, dir.path().join("gone.png")).await;
        let (processor, go_live) = processor(store.clone(), true);

        assert_eq!(processor.process(request.id).await.unwrap(), PublicationStatus::Error);
        let stored = store.get_request(&request.id).await.unwrap().unwrap();
        assert!(stored.status_message.contains("is missing"));
        assert!(go_live.is_empty());
    }
}
