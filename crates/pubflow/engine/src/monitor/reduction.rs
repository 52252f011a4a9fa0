//! Reduction task category

use super::JobCategory;
use crate::error::{EngineError, EngineResult};
use crate::queue::{GoLiveQueue, GoLiveSignal};
use crate::runner::{JobDetail, JobResult, ReductionOutput, ReductionRunner};
use async_trait::async_trait;
use pubflow_reducer::Reducer;
use pubflow_store::TaskStore;
use pubflow_types::{FileRef, ReductionStatus, ReductionTask, ReductionTaskId};
use std::sync::Arc;
use uuid::Uuid;

/// Drives `ReductionTask`s through Queued → Reducing → Reduced | Error
pub struct ReductionJobs {
    store: Arc<dyn TaskStore>,
    reducer: Arc<dyn Reducer>,
    go_live: Arc<GoLiveQueue>,
}

impl ReductionJobs {
    pub fn new(store: Arc<dyn TaskStore>, reducer: Arc<dyn Reducer>, go_live: Arc<GoLiveQueue>) -> Self {
        Self {
            store,
            reducer,
            go_live,
        }
    }
}

#[async_trait]
impl JobCategory for ReductionJobs {
    type Runner = ReductionRunner;
    const NAME: &'static str = "reduction";

    async fn eligible(&self) -> EngineResult<Vec<ReductionTask>> {
        Ok(self
            .store
            .list_tasks_by_status(&[ReductionStatus::Queued])
            .await?)
    }

    fn key(task: &ReductionTask) -> Uuid {
        *task.id.as_uuid()
    }

    async fn claim(&self, mut task: ReductionTask) -> EngineResult<Option<ReductionTask>> {
        task.set_status(ReductionStatus::Reducing);
        match self.store.update_task(task).await {
            Ok(claimed) => Ok(Some(claimed)),
            Err(e) if e.is_conflict() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn runner(&self, claimed: ReductionTask) -> ReductionRunner {
        ReductionRunner::new(claimed, self.reducer.clone())
    }

    async fn record(&self, detail: JobDetail<ReductionTask, ReductionOutput>) -> EngineResult<()> {
        let JobDetail { mut request, result } = detail;
        match result {
            JobResult::Success(output) => {
                if let Some(artifact) = output.reduced {
                    request.result_file = Some(FileRef {
                        path: artifact.path,
                        checksum: artifact.checksum,
                    });
                    request.reduced_hierarchy = Some(artifact.hierarchy);
                }
                request.set_status(ReductionStatus::Reduced);
            }
            JobResult::Error(message) => request.set_error(message),
            JobResult::Canceled => {
                tracing::info!(task_id = %request.id, "Reduction canceled, leaving task for recovery");
                return Ok(());
            }
        }

        let task = self.store.update_task(request).await?;
        tracing::info!(
            task_id = %task.id,
            status = %task.status,
            message = %task.status_message,
            "Reduction finished"
        );

        // Selection-group edits have no publication runner waiting on them.
        if task.publication_request_id.is_none() && task.status == ReductionStatus::Reduced {
            self.go_live.enqueue(GoLiveSignal::SelectionGroup {
                task: task.id,
                content_item: task.content_item_id,
            });
        }
        Ok(())
    }

    async fn abandon(&self, key: Uuid, reason: String) -> EngineResult<()> {
        let id = ReductionTaskId::from_uuid(key);
        let mut task = self
            .store
            .get_task(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("reduction task {}", id)))?;
        task.set_error(reason);
        self.store.update_task(task).await?;
        Ok(())
    }
}
