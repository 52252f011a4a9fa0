//! Multi-record writes applied all-or-nothing
//!
//! A `UnitOfWork` is the store's transaction scope: callers collect the
//! mutations first and hand the whole batch to `TaskStore::commit`.

use crate::record::Record;
use pubflow_types::{
    ContentItem, HierarchyField, HierarchyFieldValue, PublicationRequest, ReductionTask,
    SelectionGroup,
};
use uuid::Uuid;

/// Any record the store knows how to persist
#[derive(Debug, Clone)]
pub enum StoredRecord {
    ContentItem(ContentItem),
    SelectionGroup(SelectionGroup),
    ReductionTask(ReductionTask),
    PublicationRequest(PublicationRequest),
    HierarchyField(HierarchyField),
    HierarchyFieldValue(HierarchyFieldValue),
}

impl StoredRecord {
    pub fn entity(&self) -> &'static str {
        match self {
            StoredRecord::ContentItem(_) => ContentItem::ENTITY,
            StoredRecord::SelectionGroup(_) => SelectionGroup::ENTITY,
            StoredRecord::ReductionTask(_) => ReductionTask::ENTITY,
            StoredRecord::PublicationRequest(_) => PublicationRequest::ENTITY,
            StoredRecord::HierarchyField(_) => HierarchyField::ENTITY,
            StoredRecord::HierarchyFieldValue(_) => HierarchyFieldValue::ENTITY,
        }
    }

    pub fn key(&self) -> Uuid {
        match self {
            StoredRecord::ContentItem(r) => r.key(),
            StoredRecord::SelectionGroup(r) => r.key(),
            StoredRecord::ReductionTask(r) => r.key(),
            StoredRecord::PublicationRequest(r) => r.key(),
            StoredRecord::HierarchyField(r) => r.key(),
            StoredRecord::HierarchyFieldValue(r) => r.key(),
        }
    }
}

macro_rules! stored_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for StoredRecord {
                fn from(record: $variant) -> Self {
                    StoredRecord::$variant(record)
                }
            }
        )*
    };
}

stored_from!(
    ContentItem,
    SelectionGroup,
    ReductionTask,
    PublicationRequest,
    HierarchyField,
    HierarchyFieldValue,
);

/// One write inside a unit of work
#[derive(Debug, Clone)]
pub enum Mutation {
    /// Insert a new record; fails if the key exists
    Insert(StoredRecord),
    /// Conditional update; fails if the stored version differs
    Update(StoredRecord),
    /// Delete by key; deleting a missing record is not an error
    Delete { entity: &'static str, key: Uuid },
}

/// An ordered batch of mutations
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    mutations: Vec<Mutation>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: impl Into<StoredRecord>) -> &mut Self {
        self.mutations.push(Mutation::Insert(record.into()));
        self
    }

    pub fn update(&mut self, record: impl Into<StoredRecord>) -> &mut Self {
        self.mutations.push(Mutation::Update(record.into()));
        self
    }

    pub fn delete<T: Record>(&mut self, record: &T) -> &mut Self {
        self.mutations.push(Mutation::Delete {
            entity: T::ENTITY,
            key: record.key(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubflow_types::{ContentItemId, ContentType, HierarchyFieldId};

    #[test]
    fn test_mutations_keep_order() {
        let item = ContentItem::new("Claims", ContentType::new("report", true));
        let value = HierarchyFieldValue::new(HierarchyFieldId::generate(), "East");
        let group = SelectionGroup::new(ContentItemId::generate(), "all", true);

        let mut uow = UnitOfWork::new();
        uow.update(item.clone()).insert(group).delete(&value);

        assert_eq!(uow.len(), 3);
        assert!(matches!(&uow.mutations()[0], Mutation::Update(r) if r.key() == *item.id.as_uuid()));
        assert!(matches!(
            &uow.mutations()[2],
            Mutation::Delete { entity, .. } if *entity == HierarchyFieldValue::ENTITY
        ));
    }
}
