//! Selection criteria handed to the reducer

use serde::{Deserialize, Serialize};

/// Selected values for one hierarchy field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub field_name: String,
    pub values: Vec<String>,
}

/// A set of `{field name, [selected values]}` entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    pub fields: Vec<FieldSelection>,
}

impl SelectionCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add values for a field, merging with an existing entry of the same name
    pub fn with_values<I, S>(mut self, field_name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let field_name = field_name.into();
        let values = values.into_iter().map(Into::into);
        match self.fields.iter_mut().find(|f| f.field_name == field_name) {
            Some(existing) => existing.values.extend(values),
            None => self.fields.push(FieldSelection {
                field_name,
                values: values.collect(),
            }),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSelection> {
        self.fields.iter().find(|f| f.field_name == name)
    }
}
