//! pubflow core types
//!
//! Shared vocabulary for the publishing pipeline:
//! - Strongly-typed identifiers
//! - Task and request status machines
//! - Persisted records (content items, selection groups, reduction tasks,
//!   publication requests, live hierarchy)
//! - Content hierarchy and selection criteria
//! - Content checksums

pub mod checksum;
pub mod hierarchy;
pub mod ids;
pub mod records;
pub mod selection;
pub mod status;

pub use checksum::{checksum_bytes, checksum_file, checksums_match, CHECKSUM_HEX_LEN};
pub use hierarchy::{
    ContentHierarchy, FieldStructure, HierarchyField, HierarchyFieldValue, LiveHierarchy,
    ReductionField,
};
pub use ids::{
    ContentItemId, HierarchyFieldId, HierarchyValueId, JobId, PublicationRequestId,
    ReductionTaskId, SelectionGroupId,
};
pub use records::{
    ContentItem, ContentRelatedFile, ContentType, FileRef, PublicationRequest,
    ReductionRelatedFiles, ReductionTask, SelectionGroup, UploadedRelatedFile,
    MASTER_CONTENT_PURPOSE,
};
pub use selection::{FieldSelection, SelectionCriteria};
pub use status::{PublicationStatus, ReductionAction, ReductionStatus};
