//! Persisted records
//!
//! Every record carries a `version` used by the store for optimistic
//! concurrency. A record built in memory starts at version 0.

use crate::hierarchy::ContentHierarchy;
use crate::ids::{
    ContentItemId, HierarchyValueId, JobId, PublicationRequestId, ReductionTaskId,
    SelectionGroupId,
};
use crate::selection::SelectionCriteria;
use crate::status::{PublicationStatus, ReductionAction, ReductionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Purpose tag of the master content file
pub const MASTER_CONTENT_PURPOSE: &str = "mastercontent";

/// Kind of content and the pipeline behaviour it requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentType {
    pub name: String,
    /// Reduced variants must be produced per selection group
    pub reduces: bool,
    /// Temporary preview licenses must be reclaimed before a live file is replaced
    #[serde(default)]
    pub reclaims_preview_licenses: bool,
}

impl ContentType {
    pub fn new(name: impl Into<String>, reduces: bool) -> Self {
        Self {
            name: name.into(),
            reduces,
            reclaims_preview_licenses: false,
        }
    }
}

/// A path plus the checksum of its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
    pub checksum: String,
}

/// A file attached to a content item (or ready to become live)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRelatedFile {
    pub purpose: String,
    pub path: PathBuf,
    pub checksum: String,
    pub original_file_name: String,
}

impl ContentRelatedFile {
    pub fn is_master(&self) -> bool {
        self.purpose.eq_ignore_ascii_case(MASTER_CONTENT_PURPOSE)
    }
}

/// A file uploaded for a publication but not yet validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedRelatedFile {
    pub purpose: String,
    pub staged_path: PathBuf,
    pub checksum: String,
    pub original_file_name: String,
}

/// Reduction output belonging to one non-master selection group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionRelatedFiles {
    pub selection_group_id: SelectionGroupId,
    pub reduction_task_id: ReductionTaskId,
    pub reduced_file: FileRef,
}

/// A published content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentItemId,
    pub name: String,
    pub content_type: ContentType,
    /// Live related files, at most one per purpose tag
    #[serde(default)]
    pub related_files: Vec<ContentRelatedFile>,
    #[serde(default)]
    pub version: u64,
}

impl ContentItem {
    pub fn new(name: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            id: ContentItemId::generate(),
            name: name.into(),
            content_type,
            related_files: Vec::new(),
            version: 0,
        }
    }

    pub fn related_file(&self, purpose: &str) -> Option<&ContentRelatedFile> {
        self.related_files
            .iter()
            .find(|f| f.purpose.eq_ignore_ascii_case(purpose))
    }

    pub fn master_file(&self) -> Option<&ContentRelatedFile> {
        self.related_file(MASTER_CONTENT_PURPOSE)
    }

    /// Remove any entry with the same purpose, then insert the new one
    pub fn replace_related_file(&mut self, file: ContentRelatedFile) {
        self.related_files
            .retain(|f| !f.purpose.eq_ignore_ascii_case(&file.purpose));
        self.related_files.push(file);
    }
}

/// An audience segment bound to one content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionGroup {
    pub id: SelectionGroupId,
    pub content_item_id: ContentItemId,
    pub name: String,
    /// The unrestricted view; never reduced
    pub is_master: bool,
    /// Selected live hierarchy values, in selection order without duplicates
    #[serde(default)]
    pub selected_value_ids: Vec<HierarchyValueId>,
    /// Live file this group serves, set at promotion time
    #[serde(default)]
    pub content_url: Option<String>,
    /// Checksum of the group's current live reduced content
    #[serde(default)]
    pub reduced_checksum: Option<String>,
    #[serde(default)]
    pub version: u64,
}

impl SelectionGroup {
    pub fn new(content_item_id: ContentItemId, name: impl Into<String>, is_master: bool) -> Self {
        Self {
            id: SelectionGroupId::generate(),
            content_item_id,
            name: name.into(),
            is_master,
            selected_value_ids: Vec::new(),
            content_url: None,
            reduced_checksum: None,
            version: 0,
        }
    }

    /// Replace the selection, dropping duplicates while keeping order
    pub fn set_selection(&mut self, value_ids: impl IntoIterator<Item = HierarchyValueId>) {
        self.selected_value_ids.clear();
        for id in value_ids {
            if !self.selected_value_ids.contains(&id) {
                self.selected_value_ids.push(id);
            }
        }
    }
}

/// One unit of reduction work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionTask {
    pub id: ReductionTaskId,
    pub content_item_id: ContentItemId,
    pub selection_group_id: SelectionGroupId,
    /// None when the task comes from a selection-group edit
    #[serde(default)]
    pub publication_request_id: Option<PublicationRequestId>,
    pub job_id: JobId,
    pub action: ReductionAction,
    pub status: ReductionStatus,
    /// Empty unless `status` is `Error`
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub selection: SelectionCriteria,
    #[serde(default)]
    pub master_file: Option<FileRef>,
    #[serde(default)]
    pub result_file: Option<FileRef>,
    #[serde(default)]
    pub master_hierarchy: Option<ContentHierarchy>,
    #[serde(default)]
    pub reduced_hierarchy: Option<ContentHierarchy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl ReductionTask {
    pub fn new(
        content_item_id: ContentItemId,
        selection_group_id: SelectionGroupId,
        job_id: JobId,
        action: ReductionAction,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ReductionTaskId::generate(),
            content_item_id,
            selection_group_id,
            publication_request_id: None,
            job_id,
            action,
            status: ReductionStatus::Unspecified,
            status_message: String::new(),
            selection: SelectionCriteria::default(),
            master_file: None,
            result_file: None,
            master_hierarchy: None,
            reduced_hierarchy: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn for_request(mut self, request_id: PublicationRequestId) -> Self {
        self.publication_request_id = Some(request_id);
        self
    }

    pub fn with_master_file(mut self, master: FileRef) -> Self {
        self.master_file = Some(master);
        self
    }

    pub fn with_selection(mut self, selection: SelectionCriteria) -> Self {
        self.selection = selection;
        self
    }

    /// Move to a non-error status, clearing any message
    pub fn set_status(&mut self, status: ReductionStatus) {
        debug_assert!(status != ReductionStatus::Error, "use set_error");
        self.status = status;
        self.status_message.clear();
        self.updated_at = Utc::now();
    }

    /// Move to `Error` with a non-empty message
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.status = ReductionStatus::Error;
        self.status_message = if message.is_empty() {
            "Reduction failed".to_string()
        } else {
            message
        };
        self.updated_at = Utc::now();
    }
}

/// A request to publish new content for a content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRequest {
    pub id: PublicationRequestId,
    pub content_item_id: ContentItemId,
    pub job_id: JobId,
    pub status: PublicationStatus,
    /// Empty unless `status` is `Error`
    #[serde(default)]
    pub status_message: String,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedRelatedFile>,
    #[serde(default)]
    pub live_ready_files: Vec<ContentRelatedFile>,
    #[serde(default)]
    pub reduction_related_files: Vec<ReductionRelatedFiles>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

impl PublicationRequest {
    pub fn new(content_item_id: ContentItemId, uploaded_files: Vec<UploadedRelatedFile>) -> Self {
        let now = Utc::now();
        Self {
            id: PublicationRequestId::generate(),
            content_item_id,
            job_id: JobId::generate(),
            status: PublicationStatus::Queued,
            status_message: String::new(),
            uploaded_files,
            live_ready_files: Vec::new(),
            reduction_related_files: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn set_status(&mut self, status: PublicationStatus) {
        debug_assert!(status != PublicationStatus::Error, "use set_error");
        self.status = status;
        self.status_message.clear();
        self.updated_at = Utc::now();
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.status = PublicationStatus::Error;
        self.status_message = if message.is_empty() {
            "Publication failed".to_string()
        } else {
            message
        };
        self.updated_at = Utc::now();
    }

    pub fn master_upload(&self) -> Option<&UploadedRelatedFile> {
        self.uploaded_files
            .iter()
            .find(|f| f.purpose.eq_ignore_ascii_case(MASTER_CONTENT_PURPOSE))
    }
}
