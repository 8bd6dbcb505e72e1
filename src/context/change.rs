//! Pending change sets and how they merge into a parent.
//!
//! A context records its uncommitted work as a [`ChangeSet`]: whole records
//! for inserts, property-level patches for updates, and entity names for
//! deletes. Reads overlay the change set on the parent's view (merge-on-read),
//! and a commit merges it into the parent's change set under a
//! [`MergePolicy`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::entity::{EntityRef, Record};
use crate::value::Value;

/// Conflict policy applied when a committed change set lands on a parent
/// that already holds pending values for the same properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MergePolicy {
    /// Per property, the value of the context that committed last wins.
    #[default]
    PropertyLevelMergeWinner,
    /// Per property, a value already pending in the parent is kept.
    FirstCommitterWins,
}

/// Result of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Nothing was pending; no notification and no disk write happened.
    NoChanges,
    /// The change set was merged into the parent context.
    Propagated { changes: usize },
    /// The change set was written to the backing store.
    Persisted { changes: usize },
}

impl CommitOutcome {
    /// Number of changed objects carried by the commit.
    #[must_use]
    pub const fn changes(&self) -> usize {
        match self {
            Self::NoChanges => 0,
            Self::Propagated { changes } | Self::Persisted { changes } => *changes,
        }
    }
}

/// Property-level update of one existing object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    pub entity: String,
    pub fields: BTreeMap<String, Value>,
}

impl FieldPatch {
    fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            fields: BTreeMap::new(),
        }
    }
}

/// Uncommitted work of one context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub inserted: BTreeMap<EntityRef, Record>,
    pub updated: BTreeMap<EntityRef, FieldPatch>,
    pub deleted: BTreeMap<EntityRef, String>,
}

impl ChangeSet {
    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Number of objects touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Identities of every touched object.
    #[must_use]
    pub fn changed_refs(&self) -> Vec<EntityRef> {
        self.inserted
            .keys()
            .chain(self.updated.keys())
            .chain(self.deleted.keys())
            .copied()
            .collect()
    }

    /// Returns true if any pending change concerns `entity`.
    #[must_use]
    pub fn touches(&self, entity: &str) -> bool {
        self.inserted.values().any(|r| r.entity == entity)
            || self.updated.values().any(|p| p.entity == entity)
            || self.deleted.values().any(|e| e == entity)
    }

    /// Returns true if `entity_ref` is pending deletion.
    #[must_use]
    pub fn is_deleted(&self, entity_ref: EntityRef) -> bool {
        self.deleted.contains_key(&entity_ref)
    }

    pub(crate) fn record_insert(&mut self, record: Record) {
        self.inserted.insert(record.entity_ref, record);
    }

    pub(crate) fn record_update(&mut self, entity_ref: EntityRef, entity: &str, field: &str, value: Value) {
        if let Some(record) = self.inserted.get_mut(&entity_ref) {
            record.set(field, value);
            return;
        }
        self.updated
            .entry(entity_ref)
            .or_insert_with(|| FieldPatch::new(entity))
            .fields
            .insert(field.to_string(), value);
    }

    pub(crate) fn record_delete(&mut self, entity_ref: EntityRef, entity: &str) {
        // Inserting then deleting in the same context cancels out.
        if self.inserted.remove(&entity_ref).is_some() {
            return;
        }
        self.updated.remove(&entity_ref);
        self.deleted.insert(entity_ref, entity.to_string());
    }

    /// Merges a child's committed change set into this (parent) change set.
    ///
    /// Deletes win over updates. Conflicting property values are settled by
    /// `policy`; properties touched by only one side always survive.
    pub fn merge(&mut self, child: Self, policy: MergePolicy) {
        self.inserted.extend(child.inserted);

        for (entity_ref, patch) in child.updated {
            if self.deleted.contains_key(&entity_ref) {
                continue;
            }
            if let Some(record) = self.inserted.get_mut(&entity_ref) {
                for (field, value) in patch.fields {
                    if policy == MergePolicy::PropertyLevelMergeWinner || record.get(&field).is_null() {
                        record.set(field, value);
                    }
                }
                continue;
            }
            let target = self
                .updated
                .entry(entity_ref)
                .or_insert_with(|| FieldPatch::new(patch.entity.clone()));
            for (field, value) in patch.fields {
                match policy {
                    MergePolicy::PropertyLevelMergeWinner => {
                        target.fields.insert(field, value);
                    }
                    MergePolicy::FirstCommitterWins => {
                        target.fields.entry(field).or_insert(value);
                    }
                }
            }
        }

        for (entity_ref, entity) in child.deleted {
            self.record_delete(entity_ref, &entity);
        }
    }

    /// Applies pending changes on top of one row seen through the parent.
    #[must_use]
    pub fn overlay_one(&self, entity_ref: EntityRef, base: Option<Record>) -> Option<Record> {
        if self.deleted.contains_key(&entity_ref) {
            return None;
        }
        if let Some(record) = self.inserted.get(&entity_ref) {
            return Some(record.clone());
        }
        base.map(|mut record| {
            if let Some(patch) = self.updated.get(&entity_ref) {
                record.apply(&patch.fields);
            }
            record
        })
    }

    /// Applies pending changes on top of the rows of `entity` seen through
    /// the parent, appending pending inserts.
    #[must_use]
    pub fn overlay(&self, entity: &str, mut rows: Vec<Record>) -> Vec<Record> {
        if self.is_empty() {
            return rows;
        }
        rows.retain(|r| !self.deleted.contains_key(&r.entity_ref));
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &mut rows {
            seen.insert(row.entity_ref);
            if let Some(record) = self.inserted.get(&row.entity_ref) {
                *row = record.clone();
            } else if let Some(patch) = self.updated.get(&row.entity_ref) {
                row.apply(&patch.fields);
            }
        }
        rows.extend(
            self.inserted
                .values()
                .filter(|r| r.entity == entity && !seen.contains(&r.entity_ref))
                .cloned(),
        );
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fruit(seq: u64, name: &str) -> Record {
        let mut record = Record::new(EntityRef::new(), "Fruit", seq);
        record.set("name", name.into());
        record
    }

    #[test]
    fn test_insert_then_delete_cancels() {
        let mut changes = ChangeSet::default();
        let record = fruit(1, "Apple");
        let id = record.entity_ref;
        changes.record_insert(record);
        changes.record_delete(id, "Fruit");
        assert!(changes.is_empty());
    }

    #[test]
    fn test_update_on_inserted_record_edits_record() {
        let mut changes = ChangeSet::default();
        let record = fruit(1, "Apple");
        let id = record.entity_ref;
        changes.record_insert(record);
        changes.record_update(id, "Fruit", "name", "Pear".into());
        assert!(changes.updated.is_empty());
        assert_eq!(changes.inserted[&id].get("name"), &Value::from("Pear"));
    }

    #[test]
    fn test_property_level_merge_keeps_disjoint_properties() {
        let id = EntityRef::new();
        let mut parent = ChangeSet::default();
        parent.record_update(id, "Fruit", "name", "Kiwi".into());

        let mut child = ChangeSet::default();
        child.record_update(id, "Fruit", "color", "green".into());
        child.record_update(id, "Fruit", "name", "Lime".into());

        parent.merge(child, MergePolicy::PropertyLevelMergeWinner);
        let patch = &parent.updated[&id];
        assert_eq!(patch.fields["name"], Value::from("Lime"));
        assert_eq!(patch.fields["color"], Value::from("green"));
    }

    #[test]
    fn test_first_committer_wins_keeps_parent_value() {
        let id = EntityRef::new();
        let mut parent = ChangeSet::default();
        parent.record_update(id, "Fruit", "name", "Kiwi".into());

        let mut child = ChangeSet::default();
        child.record_update(id, "Fruit", "name", "Lime".into());
        child.record_update(id, "Fruit", "color", "green".into());

        parent.merge(child, MergePolicy::FirstCommitterWins);
        let patch = &parent.updated[&id];
        assert_eq!(patch.fields["name"], Value::from("Kiwi"));
        assert_eq!(patch.fields["color"], Value::from("green"));
    }

    #[test]
    fn test_delete_wins_over_update() {
        let id = EntityRef::new();
        let mut parent = ChangeSet::default();
        parent.record_delete(id, "Fruit");

        let mut child = ChangeSet::default();
        child.record_update(id, "Fruit", "name", "Lime".into());
        parent.merge(child, MergePolicy::PropertyLevelMergeWinner);

        assert!(parent.updated.is_empty());
        assert!(parent.is_deleted(id));
    }

    #[test]
    fn test_overlay_applies_all_change_kinds() {
        let kept = fruit(1, "Apple");
        let dropped = fruit(2, "Banana");
        let inserted = fruit(3, "Cherry");

        let mut changes = ChangeSet::default();
        changes.record_update(kept.entity_ref, "Fruit", "name", "Apricot".into());
        changes.record_delete(dropped.entity_ref, "Fruit");
        changes.record_insert(inserted.clone());

        let rows = changes.overlay("Fruit", vec![kept.clone(), dropped]);
        let names: Vec<_> = rows.iter().map(|r| r.get("name").clone()).collect();
        assert_eq!(names, vec![Value::from("Apricot"), Value::from("Cherry")]);

        assert!(changes.overlay("Basket", Vec::new()).is_empty());
        assert_eq!(
            changes.overlay_one(kept.entity_ref, Some(kept)).map(|r| r.get("name").clone()),
            Some(Value::from("Apricot"))
        );
    }
}
