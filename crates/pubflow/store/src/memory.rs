//! In-memory storage implementation

use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::traits::*;
use crate::unit_of_work::{Mutation, StoredRecord, UnitOfWork};
use async_trait::async_trait;
use pubflow_types::{
    ContentItem, ContentItemId, HierarchyField, HierarchyFieldValue, LiveHierarchy,
    PublicationRequest, PublicationRequestId, PublicationStatus, ReductionStatus, ReductionTask,
    ReductionTaskId, SelectionGroup, SelectionGroupId,
};
use std::collections::{HashMap, HashSet};
#[cfg(feature = "testing")]
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default, Clone)]
struct Tables {
    content_items: HashMap<Uuid, ContentItem>,
    selection_groups: HashMap<Uuid, SelectionGroup>,
    tasks: HashMap<Uuid, ReductionTask>,
    requests: HashMap<Uuid, PublicationRequest>,
    fields: HashMap<Uuid, HierarchyField>,
    values: HashMap<Uuid, HierarchyFieldValue>,
}

fn insert_row<T: Record>(table: &mut HashMap<Uuid, T>, mut record: T) -> StorageResult<T> {
    let key = record.key();
    if table.contains_key(&key) {
        return Err(StorageError::Duplicate(format!("{} {}", T::ENTITY, key)));
    }
    record.set_version(1);
    table.insert(key, record.clone());
    Ok(record)
}

fn update_row<T: Record>(table: &mut HashMap<Uuid, T>, mut record: T) -> StorageResult<T> {
    let key = record.key();
    let current = table
        .get(&key)
        .ok_or_else(|| StorageError::NotFound(format!("{} {}", T::ENTITY, key)))?;
    if current.version() != record.version() {
        return Err(StorageError::Conflict {
            entity: T::ENTITY,
            id: key.to_string(),
            expected: record.version(),
            actual: current.version(),
        });
    }
    record.set_version(record.version() + 1);
    table.insert(key, record.clone());
    Ok(record)
}

impl Tables {
    fn apply(&mut self, mutation: Mutation) -> StorageResult<()> {
        match mutation {
            Mutation::Insert(record) => match record {
                StoredRecord::ContentItem(r) => insert_row(&mut self.content_items, r).map(drop),
                StoredRecord::SelectionGroup(r) => {
                    insert_row(&mut self.selection_groups, r).map(drop)
                }
                StoredRecord::ReductionTask(r) => insert_row(&mut self.tasks, r).map(drop),
                StoredRecord::PublicationRequest(r) => insert_row(&mut self.requests, r).map(drop),
                StoredRecord::HierarchyField(r) => insert_row(&mut self.fields, r).map(drop),
                StoredRecord::HierarchyFieldValue(r) => insert_row(&mut self.values, r).map(drop),
            },
            Mutation::Update(record) => match record {
                StoredRecord::ContentItem(r) => update_row(&mut self.content_items, r).map(drop),
                StoredRecord::SelectionGroup(r) => {
                    update_row(&mut self.selection_groups, r).map(drop)
                }
                StoredRecord::ReductionTask(r) => update_row(&mut self.tasks, r).map(drop),
                StoredRecord::PublicationRequest(r) => update_row(&mut self.requests, r).map(drop),
                StoredRecord::HierarchyField(r) => update_row(&mut self.fields, r).map(drop),
                StoredRecord::HierarchyFieldValue(r) => update_row(&mut self.values, r).map(drop),
            },
            Mutation::Delete { entity, key } => {
                match entity {
                    e if e == ContentItem::ENTITY => drop(self.content_items.remove(&key)),
                    e if e == SelectionGroup::ENTITY => drop(self.selection_groups.remove(&key)),
                    e if e == ReductionTask::ENTITY => drop(self.tasks.remove(&key)),
                    e if e == PublicationRequest::ENTITY => drop(self.requests.remove(&key)),
                    e if e == HierarchyField::ENTITY => drop(self.fields.remove(&key)),
                    e if e == HierarchyFieldValue::ENTITY => drop(self.values.remove(&key)),
                    other => {
                        return Err(StorageError::InvalidData(format!(
                            "unknown entity {}",
                            other
                        )))
                    }
                }
                Ok(())
            }
        }
    }
}

/// In-memory storage for development and testing
///
/// A single lock guards every table so a unit of work is applied atomically.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tables: RwLock<Tables>,
    #[cfg(feature = "testing")]
    failing_commits: AtomicUsize,
}

impl InMemoryTaskStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a query error
    #[cfg(feature = "testing")]
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    #[cfg(feature = "testing")]
    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(feature = "testing"))]
    fn take_injected_failure(&self) -> bool {
        false
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn commit(&self, work: UnitOfWork) -> StorageResult<()> {
        if self.take_injected_failure() {
            return Err(StorageError::Query("injected commit failure".into()));
        }

        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        for mutation in work.into_mutations() {
            staged.apply(mutation)?;
        }
        *tables = staged;
        Ok(())
    }
}

#[async_trait]
impl ContentStorage for InMemoryTaskStore {
    async fn get_content_item(&self, id: &ContentItemId) -> StorageResult<Option<ContentItem>> {
        let tables = self.tables.read().await;
        Ok(tables.content_items.get(id.as_uuid()).cloned())
    }

    async fn insert_content_item(&self, item: ContentItem) -> StorageResult<ContentItem> {
        let mut tables = self.tables.write().await;
        insert_row(&mut tables.content_items, item)
    }

    async fn update_content_item(&self, item: ContentItem) -> StorageResult<ContentItem> {
        let mut tables = self.tables.write().await;
        update_row(&mut tables.content_items, item)
    }
}

#[async_trait]
impl SelectionGroupStorage for InMemoryTaskStore {
    async fn get_selection_group(
        &self,
        id: &SelectionGroupId,
    ) -> StorageResult<Option<SelectionGroup>> {
        let tables = self.tables.read().await;
        Ok(tables.selection_groups.get(id.as_uuid()).cloned())
    }

    async fn list_selection_groups(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<SelectionGroup>> {
        let tables = self.tables.read().await;
        let mut groups: Vec<_> = tables
            .selection_groups
            .values()
            .filter(|g| &g.content_item_id == content_item_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| (!a.is_master, &a.name).cmp(&(!b.is_master, &b.name)));
        Ok(groups)
    }

    async fn insert_selection_group(&self, group: SelectionGroup) -> StorageResult<SelectionGroup> {
        let mut tables = self.tables.write().await;
        insert_row(&mut tables.selection_groups, group)
    }

    async fn update_selection_group(&self, group: SelectionGroup) -> StorageResult<SelectionGroup> {
        let mut tables = self.tables.write().await;
        update_row(&mut tables.selection_groups, group)
    }
}

#[async_trait]
impl HierarchyStorage for InMemoryTaskStore {
    async fn load_hierarchy(&self, content_item_id: &ContentItemId) -> StorageResult<LiveHierarchy> {
        let tables = self.tables.read().await;
        let mut fields: Vec<_> = tables
            .fields
            .values()
            .filter(|f| &f.content_item_id == content_item_id)
            .cloned()
            .collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name));

        let field_ids: HashSet<_> = fields.iter().map(|f| f.id).collect();
        let mut values: Vec<_> = tables
            .values
            .values()
            .filter(|v| field_ids.contains(&v.field_id))
            .cloned()
            .collect();
        values.sort_by(|a, b| (a.field_id, &a.value).cmp(&(b.field_id, &b.value)));

        Ok(LiveHierarchy { fields, values })
    }
}

#[async_trait]
impl ReductionTaskStorage for InMemoryTaskStore {
    async fn get_task(&self, id: &ReductionTaskId) -> StorageResult<Option<ReductionTask>> {
        let tables = self.tables.read().await;
        Ok(tables.tasks.get(id.as_uuid()).cloned())
    }

    async fn list_tasks_by_status(
        &self,
        statuses: &[ReductionStatus],
    ) -> StorageResult<Vec<ReductionTask>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<_> = tables
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.status))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn list_tasks_for_request(
        &self,
        request_id: &PublicationRequestId,
    ) -> StorageResult<Vec<ReductionTask>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<_> = tables
            .tasks
            .values()
            .filter(|t| t.publication_request_id.as_ref() == Some(request_id))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn list_tasks_for_content_item(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<ReductionTask>> {
        let tables = self.tables.read().await;
        let mut tasks: Vec<_> = tables
            .tasks
            .values()
            .filter(|t| &t.content_item_id == content_item_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn insert_task(&self, task: ReductionTask) -> StorageResult<ReductionTask> {
        let mut tables = self.tables.write().await;
        insert_row(&mut tables.tasks, task)
    }

    async fn update_task(&self, task: ReductionTask) -> StorageResult<ReductionTask> {
        let mut tables = self.tables.write().await;
        update_row(&mut tables.tasks, task)
    }
}

#[async_trait]
impl PublicationStorage for InMemoryTaskStore {
    async fn get_request(
        &self,
        id: &PublicationRequestId,
    ) -> StorageResult<Option<PublicationRequest>> {
        let tables = self.tables.read().await;
        Ok(tables.requests.get(id.as_uuid()).cloned())
    }

    async fn list_requests_by_status(
        &self,
        statuses: &[PublicationStatus],
    ) -> StorageResult<Vec<PublicationRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<_> = tables
            .requests
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn list_requests_for_content_item(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<PublicationRequest>> {
        let tables = self.tables.read().await;
        let mut requests: Vec<_> = tables
            .requests
            .values()
            .filter(|r| &r.content_item_id == content_item_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    async fn insert_request(&self, request: PublicationRequest) -> StorageResult<PublicationRequest> {
        let mut tables = self.tables.write().await;
        insert_row(&mut tables.requests, request)
    }

    async fn update_request(&self, request: PublicationRequest) -> StorageResult<PublicationRequest> {
        let mut tables = self.tables.write().await;
        update_row(&mut tables.requests, request)
    }
}
