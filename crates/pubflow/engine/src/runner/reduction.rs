//! Reduction runner

use super::{JobDetail, JobResult, JobRunner};
use async_trait::async_trait;
use pubflow_reducer::{reduced_output_path, ReducedArtifact, Reducer, ReducerError};
use pubflow_types::ReductionTask;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Output of a successful reduction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReductionOutput {
    /// Present when the task's action includes reduction
    pub reduced: Option<ReducedArtifact>,
}

/// Runs one reduction task against the reducer
///
/// The master hierarchy is recorded on the returned task whenever it could
/// be extracted, including when the reduction itself fails.
pub struct ReductionRunner {
    task: ReductionTask,
    reducer: Arc<dyn Reducer>,
}

impl ReductionRunner {
    pub fn new(task: ReductionTask, reducer: Arc<dyn Reducer>) -> Self {
        Self { task, reducer }
    }
}

fn outcome<O>(error: ReducerError) -> JobResult<O> {
    match error {
        ReducerError::Canceled => JobResult::Canceled,
        other => JobResult::Error(other.to_string()),
    }
}

#[async_trait]
impl JobRunner for ReductionRunner {
    type Request = ReductionTask;
    type Output = ReductionOutput;

    async fn execute(self, cancel: CancellationToken) -> JobDetail<ReductionTask, ReductionOutput> {
        let Self { mut task, reducer } = self;

        let Some(master) = task.master_file.as_ref().map(|f| f.path.clone()) else {
            let error = ReducerError::MasterMissing {
                path: Default::default(),
            };
            return JobDetail::new(task, JobResult::Error(error.to_string()));
        };

        let hierarchy = match reducer.extract_hierarchy(&master, &cancel).await {
            Ok(hierarchy) => hierarchy,
            Err(e) => {
                tracing::debug!(task_id = %task.id, error = %e, "Hierarchy extraction failed");
                return JobDetail::new(task, outcome(e));
            }
        };
        task.master_hierarchy = Some(hierarchy);

        if !task.action.includes_reduction() {
            return JobDetail::new(task, JobResult::Success(ReductionOutput { reduced: None }));
        }

        let output = reduced_output_path(&master);
        let result = match reducer.reduce(&master, &task.selection, &output, &cancel).await {
            Ok(artifact) => {
                tracing::debug!(
                    task_id = %task.id,
                    output = %artifact.path.display(),
                    checksum = %artifact.checksum,
                    "Reduction complete"
                );
                JobResult::Success(ReductionOutput {
                    reduced: Some(artifact),
                })
            }
            Err(e) => outcome(e),
        };
        JobDetail::new(task, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubflow_reducer::{ContentPackage, PackageField, TabularReducer};
    use pubflow_types::{
        checksum_file, ContentItemId, FieldStructure, FileRef, JobId, ReductionAction,
        SelectionCriteria, SelectionGroupId,
    };
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_master(dir: &Path) -> FileRef {
        let package = ContentPackage {
            fields: vec![
                PackageField {
                    name: "Region".into(),
                    display_name: "Region".into(),
                    structure: FieldStructure::Flat,
                },
                PackageField {
                    name: "Plan".into(),
                    display_name: "Plan".into(),
                    structure: FieldStructure::Flat,
                },
            ],
            rows: [("East", "Gold"), ("East", "Silver"), ("West", "Gold")]
                .iter()
                .filter_map(|(r, p)| json!({"Region": r, "Plan": p}).as_object().cloned())
                .collect(),
        };
        let path = dir.join("master.json");
        std::fs::write(&path, serde_json::to_vec(&package).unwrap()).unwrap();
        FileRef {
            checksum: checksum_file(&path).unwrap(),
            path,
        }
    }

    fn task(action: ReductionAction, master: Option<FileRef>, selection: SelectionCriteria) -> ReductionTask {
        let mut task = ReductionTask::new(
            ContentItemId::generate(),
            SelectionGroupId::generate(),
            JobId::generate(),
            action,
        )
        .with_selection(selection);
        task.master_file = master;
        task
    }

    async fn run(task: ReductionTask) -> JobDetail<ReductionTask, ReductionOutput> {
        ReductionRunner::new(task, Arc::new(TabularReducer::new()))
            .execute(CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_hierarchy_only() {
        let dir = TempDir::new().unwrap();
        let master = write_master(dir.path());

        let detail = run(task(ReductionAction::HierarchyOnly, Some(master), SelectionCriteria::new())).await;

        assert_eq!(detail.result, JobResult::Success(ReductionOutput { reduced: None }));
        assert_eq!(detail.request.master_hierarchy.unwrap().value_counts(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_reduction_checksum_matches_disk() {
        let dir = TempDir::new().unwrap();
        let master = write_master(dir.path());
        let selection = SelectionCriteria::new().with_values("Region", ["East"]);

        let detail = run(task(ReductionAction::HierarchyAndReduction, Some(master), selection)).await;

        let JobResult::Success(ReductionOutput { reduced: Some(artifact) }) = detail.result else {
            panic!("expected a reduced artifact");
        };
        assert_eq!(artifact.path, dir.path().join("master.reduced.json"));
        assert_eq!(artifact.checksum, checksum_file(&artifact.path).unwrap());
        assert_eq!(artifact.checksum.len(), 40);
        assert_eq!(artifact.hierarchy.value_counts(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unknown_field_keeps_master_hierarchy() {
        let dir = TempDir::new().unwrap();
        let master = write_master(dir.path());
        let selection = SelectionCriteria::new().with_values("Planet", ["Mars"]);

        let detail = run(task(ReductionAction::HierarchyAndReduction, Some(master), selection)).await;

        let message = detail.result.error_message().unwrap();
        assert!(message.starts_with("The requested reduction field"));
        assert!(message.ends_with("is not found in the reduction hierarchy"));
        assert!(detail.request.master_hierarchy.is_some());
    }

    #[tokio::test]
    async fn test_missing_master() {
        let dir = TempDir::new().unwrap();
        let master = FileRef {
            path: dir.path().join("nope.json"),
            checksum: String::new(),
        };

        let detail = run(task(ReductionAction::HierarchyAndReduction, Some(master), SelectionCriteria::new())).await;

        let message = detail.result.error_message().unwrap();
        assert!(message.starts_with("Master file"));
        assert!(message.ends_with("does not exist"));
        assert!(detail.request.master_hierarchy.is_none());
        assert!(detail.request.reduced_hierarchy.is_none());
    }

    #[tokio::test]
    async fn test_canceled_runner() {
        let dir = TempDir::new().unwrap();
        let master = write_master(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let detail = ReductionRunner::new(
            task(ReductionAction::HierarchyOnly, Some(master), SelectionCriteria::new()),
            Arc::new(TabularReducer::new()),
        )
        .execute(cancel)
        .await;

        assert_eq!(detail.result, JobResult::Canceled);
    }
}
