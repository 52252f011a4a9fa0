//! Read-only checks that must pass before anything is promoted

use crate::audit::{AuditEvent, AuditEventKind, AuditLogger};
use crate::error::EngineResult;
use crate::paths::hash_file;
use pubflow_store::TaskStore;
use pubflow_types::{
    checksums_match, ContentItem, FileRef, PublicationRequest, ReductionTask, SelectionGroup,
};
use std::path::Path;

pub const REDUCED_INTEGRITY_FAILED: &str = "Reduced content file failed integrity check";
pub const LIVE_FILE_INTEGRITY_FAILED: &str = "File integrity validation failed";

/// A non-master selection group with the reduction that will replace its
/// live content
#[derive(Debug, Clone)]
pub struct ReducedContent {
    pub group: SelectionGroup,
    pub task: ReductionTask,
    pub file: FileRef,
}

/// Everything promotion needs, read and checked up front
#[derive(Debug, Clone)]
pub struct ValidatedPublication {
    pub groups: Vec<SelectionGroup>,
    /// Every task created for the request, master group included
    pub tasks: Vec<ReductionTask>,
    pub reduced: Vec<ReducedContent>,
}

/// Recompute a file's checksum; `Err` carries what was found instead
pub(crate) async fn verify(path: &Path, expected: &str) -> Result<(), Option<String>> {
    match hash_file(path).await {
        Ok(actual) if checksums_match(&actual, expected) => Ok(()),
        Ok(actual) => Err(Some(actual)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not checksum file");
            Err(None)
        }
    }
}

/// The validation failure is still recorded on the request when the audit
/// write fails
async fn log_failure(audit: &dyn AuditLogger, event: AuditEvent) {
    if let Err(e) = audit.log(event).await {
        tracing::warn!(error = %e, "Failed to write validation audit event");
    }
}

/// Validate a confirming request. `Ok(Err(message))` is a validation
/// failure the caller records on the request.
pub async fn validate_publication(
    store: &dyn TaskStore,
    audit: &dyn AuditLogger,
    item: &ContentItem,
    request: &PublicationRequest,
) -> EngineResult<Result<ValidatedPublication, String>> {
    let groups = store.list_selection_groups(&item.id).await?;
    let tasks = store.list_tasks_for_request(&request.id).await?;
    let reduces =
        item.content_type.reduces && request.live_ready_files.iter().any(|f| f.is_master());

    let mut reduced = Vec::new();
    if reduces {
        for group in groups.iter().filter(|g| !g.is_master) {
            let related: Vec<&ReductionTask> = tasks
                .iter()
                .filter(|t| t.selection_group_id == group.id)
                .collect();
            if related.len() != 1 {
                return Ok(Err(format!(
                    "expected 1 reduction task related to SelectionGroup {} but found {}",
                    group.id,
                    related.len()
                )));
            }

            let task = related[0];
            let Some(file) = task.result_file.clone() else {
                return Ok(Err(format!(
                    "expected 1 reduction task related to SelectionGroup {} with a reduced file",
                    group.id
                )));
            };

            if let Err(actual) = verify(&file.path, &file.checksum).await {
                let event = AuditEvent::new(
                    item.id,
                    AuditEventKind::ReducedContentValidationFailed {
                        selection_group_id: group.id,
                        reduction_task_id: task.id,
                        path: file.path.clone(),
                        expected_checksum: file.checksum.clone(),
                        actual_checksum: actual,
                    },
                )
                .for_request(request.id);
                log_failure(audit, event).await;
                return Ok(Err(REDUCED_INTEGRITY_FAILED.to_string()));
            }

            reduced.push(ReducedContent {
                group: group.clone(),
                task: task.clone(),
                file,
            });
        }
    }

    for file in &request.live_ready_files {
        if let Err(actual) = verify(&file.path, &file.checksum).await {
            let event = AuditEvent::new(
                item.id,
                AuditEventKind::LiveFileValidationFailed {
                    purpose: file.purpose.clone(),
                    path: file.path.clone(),
                    expected_checksum: file.checksum.clone(),
                    actual_checksum: actual,
                },
            )
            .for_request(request.id);
            log_failure(audit, event).await;
            return Ok(Err(LIVE_FILE_INTEGRITY_FAILED.to_string()));
        }
    }

    Ok(Ok(ValidatedPublication {
        groups,
        tasks,
        reduced,
    }))
}
