//! Hierarchy reconciliation
//!
//! The live hierarchy is brought in line with a new master hierarchy by a
//! per-field set difference. Values are inserted or deleted, never edited.

use pubflow_store::UnitOfWork;
use pubflow_types::{
    ContentHierarchy, ContentItemId, HierarchyField, HierarchyFieldValue, HierarchyValueId,
    LiveHierarchy,
};
use std::collections::HashSet;

/// Writes needed to make the live hierarchy match a master hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyDiff {
    pub new_fields: Vec<HierarchyField>,
    pub removed_fields: Vec<HierarchyField>,
    pub inserts: Vec<HierarchyFieldValue>,
    pub deletes: Vec<HierarchyFieldValue>,
}

impl HierarchyDiff {
    pub fn is_empty(&self) -> bool {
        self.new_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.inserts.is_empty()
            && self.deletes.is_empty()
    }

    /// Stage the diff; fields go in before their values and out after them
    pub fn stage(&self, uow: &mut UnitOfWork) {
        for field in &self.new_fields {
            uow.insert(field.clone());
        }
        for value in &self.inserts {
            uow.insert(value.clone());
        }
        for value in &self.deletes {
            uow.delete(value);
        }
        for field in &self.removed_fields {
            uow.delete(field);
        }
    }

    /// The live hierarchy as it will be after the diff is committed
    pub fn apply(&self, live: &LiveHierarchy) -> LiveHierarchy {
        let removed_fields: HashSet<_> = self.removed_fields.iter().map(|f| f.id).collect();
        let deleted: HashSet<_> = self.deletes.iter().map(|v| v.id).collect();

        let mut fields: Vec<HierarchyField> = live
            .fields
            .iter()
            .filter(|f| !removed_fields.contains(&f.id))
            .cloned()
            .collect();
        fields.extend(self.new_fields.iter().cloned());

        let mut values: Vec<HierarchyFieldValue> = live
            .values
            .iter()
            .filter(|v| !deleted.contains(&v.id))
            .cloned()
            .collect();
        values.extend(self.inserts.iter().cloned());

        LiveHierarchy { fields, values }
    }

    /// Value ids that exist once the diff is committed
    pub fn surviving_value_ids(&self, live: &LiveHierarchy) -> HashSet<HierarchyValueId> {
        let deleted: HashSet<_> = self.deletes.iter().map(|v| v.id).collect();
        live.values
            .iter()
            .map(|v| v.id)
            .filter(|id| !deleted.contains(id))
            .chain(self.inserts.iter().map(|v| v.id))
            .collect()
    }
}

/// Compute the diff between a master hierarchy and the live one
pub fn diff_hierarchy(
    content_item_id: ContentItemId,
    master: &ContentHierarchy,
    live: &LiveHierarchy,
) -> HierarchyDiff {
    let mut diff = HierarchyDiff::default();

    for field in &master.fields {
        let (field_id, live_values): (_, Vec<&HierarchyFieldValue>) =
            match live.field_by_name(&field.name) {
                Some(existing) => (existing.id, live.values_for(existing.id).collect()),
                None => {
                    let created = HierarchyField::new(content_item_id, field);
                    let id = created.id;
                    diff.new_fields.push(created);
                    (id, Vec::new())
                }
            };

        let wanted: HashSet<&str> = field.values.iter().map(String::as_str).collect();
        let present: HashSet<&str> = live_values.iter().map(|v| v.value.as_str()).collect();

        let mut queued = HashSet::new();
        for value in &field.values {
            if !present.contains(value.as_str()) && queued.insert(value.as_str()) {
                diff.inserts.push(HierarchyFieldValue::new(field_id, value.clone()));
            }
        }
        diff.deletes.extend(
            live_values
                .into_iter()
                .filter(|v| !wanted.contains(v.value.as_str()))
                .cloned(),
        );
    }

    let master_names: HashSet<&str> = master.fields.iter().map(|f| f.name.as_str()).collect();
    for field in &live.fields {
        if !master_names.contains(field.name.as_str()) {
            diff.deletes.extend(live.values_for(field.id).cloned());
            diff.removed_fields.push(field.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use pubflow_types::{FieldStructure, ReductionField};

    fn master(fields: &[(&str, &[&str])]) -> ContentHierarchy {
        ContentHierarchy {
            fields: fields
                .iter()
                .map(|(name, values)| ReductionField {
                    name: name.to_string(),
                    display_name: name.to_string(),
                    structure: FieldStructure::Flat,
                    values: values.iter().map(|v| v.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_publication_inserts_everything() {
        let item = ContentItemId::generate();
        let diff = diff_hierarchy(
            item,
            &master(&[("Region", &["East", "West"]), ("Plan", &["Gold"])]),
            &LiveHierarchy::default(),
        );

        assert_eq!(diff.new_fields.len(), 2);
        assert_eq!(diff.inserts.len(), 3);
        assert!(diff.deletes.is_empty());
        assert!(diff.new_fields.iter().all(|f| f.content_item_id == item));
    }

    #[test]
    fn test_fields_reconcile_independently() {
        let item = ContentItemId::generate();
        let live = diff_hierarchy(
            item,
            &master(&[("Region", &["East", "West"]), ("Plan", &["West"])]),
            &LiveHierarchy::default(),
        )
        .apply(&LiveHierarchy::default());

        // "West" leaves Region but stays in Plan.
        let diff = diff_hierarchy(
            item,
            &master(&[("Region", &["East", "North"]), ("Plan", &["West"])]),
            &live,
        );

        assert!(diff.new_fields.is_empty());
        assert_eq!(diff.inserts.len(), 1);
        assert_eq!(diff.inserts[0].value, "North");
        assert_eq!(diff.deletes.len(), 1);
        assert_eq!(diff.deletes[0].value, "West");
        let region = live.field_by_name("Region").unwrap();
        assert_eq!(diff.deletes[0].field_id, region.id);
    }

    #[test]
    fn test_dropped_field_is_removed() {
        let item = ContentItemId::generate();
        let live = diff_hierarchy(item, &master(&[("Region", &["East"]), ("Plan", &["Gold"])]), &LiveHierarchy::default())
            .apply(&LiveHierarchy::default());

        let diff = diff_hierarchy(item, &master(&[("Region", &["East"])]), &live);

        assert_eq!(diff.removed_fields.len(), 1);
        assert_eq!(diff.removed_fields[0].name, "Plan");
        assert_eq!(diff.deletes.len(), 1);
        let surviving = diff.surviving_value_ids(&live);
        assert_eq!(surviving.len(), 1);
    }

    #[test]
    fn test_stage_orders_fields_around_values() {
        let diff = diff_hierarchy(
            ContentItemId::generate(),
            &master(&[("Region", &["East"])]),
            &LiveHierarchy::default(),
        );
        let mut uow = UnitOfWork::new();
        diff.stage(&mut uow);

        assert_eq!(uow.len(), 2);
        assert!(matches!(
            &uow.mutations()[0],
            pubflow_store::Mutation::Insert(pubflow_store::StoredRecord::HierarchyField(_))
        ));
    }

    fn hierarchy_strategy() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
        prop::collection::vec(
            (
                "[a-d]",
                prop::collection::vec("[a-f]{1,2}", 0..8),
            ),
            0..4,
        )
    }

    fn to_master(fields: &[(String, Vec<String>)]) -> ContentHierarchy {
        let mut seen = HashSet::new();
        ContentHierarchy {
            fields: fields
                .iter()
                .filter(|(name, _)| seen.insert(name.clone()))
                .map(|(name, values)| ReductionField {
                    name: name.clone(),
                    display_name: name.clone(),
                    structure: FieldStructure::Flat,
                    values: values.clone(),
                })
                .collect(),
        }
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_idempotent(
            before in hierarchy_strategy(),
            after in hierarchy_strategy(),
        ) {
            let item = ContentItemId::generate();
            let empty = LiveHierarchy::default();
            let live = diff_hierarchy(item, &to_master(&before), &empty).apply(&empty);

            let master = to_master(&after);
            let reconciled = diff_hierarchy(item, &master, &live).apply(&live);
            let again = diff_hierarchy(item, &master, &reconciled);

            prop_assert!(again.is_empty(), "second pass produced {:?}", again);
        }

        #[test]
        fn prop_reconciled_values_match_master(
            before in hierarchy_strategy(),
            after in hierarchy_strategy(),
        ) {
            let item = ContentItemId::generate();
            let empty = LiveHierarchy::default();
            let live = diff_hierarchy(item, &to_master(&before), &empty).apply(&empty);

            let master = to_master(&after);
            let reconciled = diff_hierarchy(item, &master, &live).apply(&live);

            for field in &master.fields {
                let live_field = reconciled.field_by_name(&field.name).unwrap();
                let got: HashSet<&str> = reconciled
                    .values_for(live_field.id)
                    .map(|v| v.value.as_str())
                    .collect();
                let want: HashSet<&str> = field.values.iter().map(String::as_str).collect();
                prop_assert_eq!(got, want);
            }
            prop_assert_eq!(reconciled.fields.len(), master.fields.len());
        }
    }
}
