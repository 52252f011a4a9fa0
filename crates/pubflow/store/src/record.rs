//! Persistence metadata for stored records

use pubflow_types::{
    ContentItem, HierarchyField, HierarchyFieldValue, PublicationRequest, ReductionTask,
    SelectionGroup,
};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

/// A record the task store can persist
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Entity name, also the backing table name
    const ENTITY: &'static str;

    fn key(&self) -> Uuid;

    /// Grouping key used for "children of" queries
    fn owner(&self) -> Uuid;

    /// Status column, for records that have one
    fn status_label(&self) -> Option<&'static str> {
        None
    }

    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);
}

impl Record for ContentItem {
    const ENTITY: &'static str = "content_items";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for SelectionGroup {
    const ENTITY: &'static str = "selection_groups";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Uuid {
        *self.content_item_id.as_uuid()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for ReductionTask {
    const ENTITY: &'static str = "reduction_tasks";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Uuid {
        *self.content_item_id.as_uuid()
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.as_str())
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for PublicationRequest {
    const ENTITY: &'static str = "publication_requests";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Uuid {
        *self.content_item_id.as_uuid()
    }

    fn status_label(&self) -> Option<&'static str> {
        Some(self.status.as_str())
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for HierarchyField {
    const ENTITY: &'static str = "hierarchy_fields";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Uuid {
        *self.content_item_id.as_uuid()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Record for HierarchyFieldValue {
    const ENTITY: &'static str = "hierarchy_values";

    fn key(&self) -> Uuid {
        *self.id.as_uuid()
    }

    fn owner(&self) -> Uuid {
        *self.field_id.as_uuid()
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
