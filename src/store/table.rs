//! Row table shared by the in-memory and durable engines.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::ChangeSet;
use crate::entity::{EntityRef, Record};

/// What applying a change set did to the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Updates addressed to rows that no longer exist.
    pub dropped: usize,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Table {
    rows: HashMap<EntityRef, Record>,
}

impl Table {
    pub fn from_rows(rows: impl IntoIterator<Item = Record>) -> Self {
        Self {
            rows: rows.into_iter().map(|r| (r.entity_ref, r)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, entity_ref: EntityRef) -> Option<Record> {
        self.rows.get(&entity_ref).cloned()
    }

    /// Rows of `entity` ascending by insertion sequence.
    pub fn scan(&self, entity: &str) -> Vec<Record> {
        let mut rows: Vec<Record> = self
            .rows
            .values()
            .filter(|r| r.entity == entity)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.seq);
        rows
    }

    /// Every row ascending by insertion sequence.
    pub fn all(&self) -> Vec<Record> {
        let mut rows: Vec<Record> = self.rows.values().cloned().collect();
        rows.sort_by_key(|r| r.seq);
        rows
    }

    pub fn max_seq(&self) -> u64 {
        self.rows.values().map(|r| r.seq).max().unwrap_or(0)
    }

    pub fn apply(&mut self, changes: &ChangeSet) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (entity_ref, record) in &changes.inserted {
            self.rows.insert(*entity_ref, record.clone());
            report.inserted += 1;
        }

        for (entity_ref, patch) in &changes.updated {
            match self.rows.get_mut(entity_ref) {
                Some(row) => {
                    row.apply(&patch.fields);
                    report.updated += 1;
                }
                None => {
                    warn!(
                        entity = %patch.entity,
                        entity_ref = %entity_ref,
                        "dropping update of a row that no longer exists"
                    );
                    report.dropped += 1;
                }
            }
        }

        for entity_ref in changes.deleted.keys() {
            if self.rows.remove(entity_ref).is_some() {
                report.deleted += 1;
            }
        }

        report
    }

    pub fn batch_delete(&mut self, refs: &[EntityRef]) -> usize {
        let unique: HashSet<_> = refs.iter().collect();
        unique
            .into_iter()
            .filter(|entity_ref| self.rows.remove(entity_ref).is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(seq: u64) -> Record {
        let mut record = Record::new(EntityRef::new(), "Fruit", seq);
        record.set("id", format!("u{seq}").into());
        record
    }

    #[test]
    fn test_scan_orders_by_seq() {
        let table = Table::from_rows(vec![row(3), row(1), row(2)]);
        let seqs: Vec<_> = table.scan("Fruit").iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(table.scan("Basket").is_empty());
        assert_eq!(table.max_seq(), 3);
    }

    #[test]
    fn test_update_of_missing_row_is_dropped() {
        let mut table = Table::default();
        let mut changes = ChangeSet::default();
        changes.record_update(EntityRef::new(), "Fruit", "name", Value::from("Ghost"));
        let report = table.apply(&changes);
        assert_eq!(report.dropped, 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_batch_delete_counts_existing_rows() {
        let first = row(1);
        let id = first.entity_ref;
        let mut table = Table::from_rows(vec![first, row(2)]);
        assert_eq!(table.batch_delete(&[id, id, EntityRef::new()]), 1);
        assert_eq!(table.len(), 1);
    }
}
