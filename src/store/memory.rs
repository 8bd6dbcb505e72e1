//! In-memory storage engine.
//!
//! Thread-safe and intended for tests, previews and scratch stores. Nothing
//! survives `close`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::context::ChangeSet;
use crate::entity::{EntityRef, Record};

use super::table::Table;
use super::traits::{StorageEngine, StorageError, StoreStats};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Engine keeping every row in process memory.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    table: RwLock<Table>,
    closed: AtomicBool,
    persisted_commits: AtomicU64,
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl StorageEngine for MemoryEngine {
    fn scan(&self, entity: &str) -> Result<Vec<Record>, StorageError> {
        self.ensure_open()?;
        let table = self.table.read().map_err(|_| lock_err("memory table"))?;
        Ok(table.scan(entity))
    }

    fn get(&self, entity_ref: EntityRef) -> Result<Option<Record>, StorageError> {
        self.ensure_open()?;
        let table = self.table.read().map_err(|_| lock_err("memory table"))?;
        Ok(table.get(entity_ref))
    }

    fn apply(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut table = self.table.write().map_err(|_| lock_err("memory table"))?;
        let report = table.apply(changes);
        self.persisted_commits.fetch_add(1, Ordering::AcqRel);
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "applied change set in memory"
        );
        Ok(())
    }

    fn batch_delete(&self, refs: &[EntityRef]) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let mut table = self.table.write().map_err(|_| lock_err("memory table"))?;
        let removed = table.batch_delete(refs);
        self.persisted_commits.fetch_add(1, Ordering::AcqRel);
        Ok(removed)
    }

    fn max_seq(&self) -> u64 {
        self.table.read().map_or(0, |t| t.max_seq())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            persisted_commits: self.persisted_commits.load(Ordering::Acquire),
            wal_sequence: 0,
            rows: self.table.read().map_or(0, |t| t.len()),
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_then_scan() {
        let engine = MemoryEngine::new();
        let mut changes = ChangeSet::default();
        let mut record = Record::new(EntityRef::new(), "Fruit", 1);
        record.set("name", "Fig".into());
        let id = record.entity_ref;
        changes.record_insert(record);

        engine.apply(&changes).unwrap();
        assert_eq!(engine.scan("Fruit").unwrap().len(), 1);
        assert!(engine.get(id).unwrap().is_some());
        assert_eq!(engine.stats().persisted_commits, 1);
        assert_eq!(engine.max_seq(), 1);
    }

    #[test]
    fn test_closed_engine_rejects_calls() {
        let engine = MemoryEngine::new();
        engine.close().unwrap();
        assert!(matches!(engine.scan("Fruit"), Err(StorageError::Closed)));
        assert!(matches!(
            engine.apply(&ChangeSet::default()),
            Err(StorageError::Closed)
        ));
    }
}
