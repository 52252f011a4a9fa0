//! Content hierarchy model
//!
//! A `ContentHierarchy` is what the reducer discovers inside an artifact.
//! `HierarchyField`/`HierarchyFieldValue` are the persisted live copy that
//! end users filter by and selection groups reference.

use crate::ids::{ContentItemId, HierarchyFieldId, HierarchyValueId};
use crate::selection::{FieldSelection, SelectionCriteria};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Shape of a hierarchy field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStructure {
    #[default]
    Flat,
    Tree,
}

/// One field discovered in an artifact with its distinct values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionField {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub structure: FieldStructure,
    pub values: Vec<String>,
}

impl ReductionField {
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

/// All fields discoverable in an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHierarchy {
    pub fields: Vec<ReductionField>,
}

impl ContentHierarchy {
    pub fn field(&self, name: &str) -> Option<&ReductionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of values per field, in field order
    pub fn value_counts(&self) -> Vec<usize> {
        self.fields.iter().map(|f| f.values.len()).collect()
    }
}

/// A persisted live hierarchy field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyField {
    pub id: HierarchyFieldId,
    pub content_item_id: ContentItemId,
    pub name: String,
    pub display_name: String,
    pub structure: FieldStructure,
    #[serde(default)]
    pub version: u64,
}

impl HierarchyField {
    pub fn new(content_item_id: ContentItemId, field: &ReductionField) -> Self {
        Self {
            id: HierarchyFieldId::generate(),
            content_item_id,
            name: field.name.clone(),
            display_name: field.display_name.clone(),
            structure: field.structure,
            version: 0,
        }
    }
}

/// A persisted live hierarchy value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyFieldValue {
    pub id: HierarchyValueId,
    pub field_id: HierarchyFieldId,
    pub value: String,
    #[serde(default)]
    pub version: u64,
}

impl HierarchyFieldValue {
    pub fn new(field_id: HierarchyFieldId, value: impl Into<String>) -> Self {
        Self {
            id: HierarchyValueId::generate(),
            field_id,
            value: value.into(),
            version: 0,
        }
    }
}

/// The live hierarchy of one content item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveHierarchy {
    pub fields: Vec<HierarchyField>,
    pub values: Vec<HierarchyFieldValue>,
}

impl LiveHierarchy {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_by_name(&self, name: &str) -> Option<&HierarchyField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn values_for(&self, field_id: HierarchyFieldId) -> impl Iterator<Item = &HierarchyFieldValue> {
        self.values.iter().filter(move |v| v.field_id == field_id)
    }

    /// Resolve selected value ids into per-field selection criteria.
    /// Ids that no longer exist in the live hierarchy are skipped.
    pub fn criteria_for(&self, selected: &[HierarchyValueId]) -> SelectionCriteria {
        let by_id: HashMap<HierarchyValueId, &HierarchyFieldValue> =
            self.values.iter().map(|v| (v.id, v)).collect();

        let mut criteria = SelectionCriteria::default();
        for field in &self.fields {
            let values: Vec<String> = selected
                .iter()
                .filter_map(|id| by_id.get(id))
                .filter(|v| v.field_id == field.id)
                .map(|v| v.value.clone())
                .collect();
            if !values.is_empty() {
                criteria.fields.push(FieldSelection {
                    field_name: field.name.clone(),
                    values,
                });
            }
        }
        criteria
    }
}
