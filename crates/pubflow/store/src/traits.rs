//! Storage trait definitions

use crate::error::StorageResult;
use crate::unit_of_work::UnitOfWork;
use async_trait::async_trait;
use pubflow_types::{
    ContentItem, ContentItemId, LiveHierarchy, PublicationRequest, PublicationRequestId,
    PublicationStatus, ReductionStatus, ReductionTask, ReductionTaskId, SelectionGroup,
    SelectionGroupId,
};

/// Combined storage trait
///
/// The single source of truth shared by every pipeline component. All
/// coordination (claiming work, preventing double promotion) is expressed as
/// conditional updates or units of work against it.
#[async_trait]
pub trait TaskStore:
    ContentStorage
    + SelectionGroupStorage
    + HierarchyStorage
    + ReductionTaskStorage
    + PublicationStorage
    + Send
    + Sync
{
    /// Apply every mutation or none of them
    async fn commit(&self, work: UnitOfWork) -> StorageResult<()>;
}

/// Storage for content items
#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Get a content item by ID
    async fn get_content_item(&self, id: &ContentItemId) -> StorageResult<Option<ContentItem>>;

    /// Insert a new content item
    async fn insert_content_item(&self, item: ContentItem) -> StorageResult<ContentItem>;

    /// Conditionally update a content item
    async fn update_content_item(&self, item: ContentItem) -> StorageResult<ContentItem>;
}

/// Storage for selection groups
#[async_trait]
pub trait SelectionGroupStorage: Send + Sync {
    /// Get a selection group by ID
    async fn get_selection_group(
        &self,
        id: &SelectionGroupId,
    ) -> StorageResult<Option<SelectionGroup>>;

    /// List the selection groups of a content item
    async fn list_selection_groups(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<SelectionGroup>>;

    /// Insert a new selection group
    async fn insert_selection_group(&self, group: SelectionGroup) -> StorageResult<SelectionGroup>;

    /// Conditionally update a selection group
    async fn update_selection_group(&self, group: SelectionGroup) -> StorageResult<SelectionGroup>;
}

/// Storage for the live hierarchy
#[async_trait]
pub trait HierarchyStorage: Send + Sync {
    /// Load every live field and value of a content item
    async fn load_hierarchy(&self, content_item_id: &ContentItemId) -> StorageResult<LiveHierarchy>;
}

/// Storage for reduction tasks
#[async_trait]
pub trait ReductionTaskStorage: Send + Sync {
    /// Get a task by ID
    async fn get_task(&self, id: &ReductionTaskId) -> StorageResult<Option<ReductionTask>>;

    /// List tasks whose status is one of `statuses`, oldest first
    async fn list_tasks_by_status(
        &self,
        statuses: &[ReductionStatus],
    ) -> StorageResult<Vec<ReductionTask>>;

    /// List the tasks created for a publication request
    async fn list_tasks_for_request(
        &self,
        request_id: &PublicationRequestId,
    ) -> StorageResult<Vec<ReductionTask>>;

    /// List every task of a content item
    async fn list_tasks_for_content_item(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<ReductionTask>>;

    /// Insert a new task
    async fn insert_task(&self, task: ReductionTask) -> StorageResult<ReductionTask>;

    /// Conditionally update a task
    async fn update_task(&self, task: ReductionTask) -> StorageResult<ReductionTask>;
}

/// Storage for publication requests
#[async_trait]
pub trait PublicationStorage: Send + Sync {
    /// Get a request by ID
    async fn get_request(
        &self,
        id: &PublicationRequestId,
    ) -> StorageResult<Option<PublicationRequest>>;

    /// List requests whose status is one of `statuses`, oldest first
    async fn list_requests_by_status(
        &self,
        statuses: &[PublicationStatus],
    ) -> StorageResult<Vec<PublicationRequest>>;

    /// List every request of a content item
    async fn list_requests_for_content_item(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<PublicationRequest>>;

    /// Insert a new request
    async fn insert_request(&self, request: PublicationRequest) -> StorageResult<PublicationRequest>;

    /// Conditionally update a request
    async fn update_request(&self, request: PublicationRequest) -> StorageResult<PublicationRequest>;
}
