//! Durable storage engine over the three-file set.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use tracing::{debug, info, warn};

use crate::context::ChangeSet;
use crate::entity::{EntityRef, Record};
use crate::store::files::StoreFiles;
use crate::store::table::Table;
use crate::store::traits::{StorageEngine, StorageError, StoreStats};

use super::file_lock::FileLock;
use super::snapshot;
use super::wal::{WalEntryKind, WriteAheadLog};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Engine persisting rows to `<name>.data` with a WAL in `<name>.data-wal`
/// and an exclusive lock on `<name>.data-shm`.
pub struct DurableEngine {
    name: String,
    files: StoreFiles,
    table: RwLock<Table>,
    wal: WriteAheadLog,
    lock: Mutex<Option<FileLock>>,
    max_wal_size: u64,
    closed: AtomicBool,
    persisted_commits: AtomicU64,
}

impl DurableEngine {
    /// Opens (creating if needed) the file set and replays the WAL.
    pub fn open(
        name: &str,
        files: StoreFiles,
        sync_on_write: bool,
        max_wal_size: u64,
    ) -> Result<Self, StorageError> {
        if let Some(dir) = files.data.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let lock = FileLock::acquire(&files.shm, name)?;

        let table = if files.data.exists() {
            let (header, rows) = snapshot::read(&files.data)?;
            debug!(store = name, rows = header.row_count, "loaded snapshot");
            Table::from_rows(rows)
        } else {
            snapshot::write(&files.data, name, &[])?;
            Table::default()
        };

        let wal = WriteAheadLog::open(&files.wal, sync_on_write)?;
        let table = Self::replay(name, &wal, table)?;

        info!(
            store = name,
            rows = table.len(),
            wal_sequence = wal.current_sequence(),
            "opened durable store"
        );

        Ok(Self {
            name: name.to_string(),
            files,
            table: RwLock::new(table),
            wal,
            lock: Mutex::new(Some(lock)),
            max_wal_size,
            closed: AtomicBool::new(false),
            persisted_commits: AtomicU64::new(0),
        })
    }

    fn replay(name: &str, wal: &WriteAheadLog, mut table: Table) -> Result<Table, StorageError> {
        let mut replayed = 0u64;
        for entry in wal.iter()? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(store = name, error = %e, "stopping WAL replay at corrupt entry");
                    break;
                }
            };
            match entry.kind {
                WalEntryKind::Commit(changes) => {
                    table.apply(&changes);
                }
                WalEntryKind::BatchDelete { refs } => {
                    table.batch_delete(&refs);
                }
            }
            replayed += 1;
        }
        if replayed > 0 {
            debug!(store = name, entries = replayed, "replayed WAL");
        }
        Ok(table)
    }

    /// Returns the file set this engine writes.
    #[must_use]
    pub const fn files(&self) -> &StoreFiles {
        &self.files
    }

    /// Folds the WAL into the data file.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        let table = self.table.read().map_err(|_| lock_err("durable table"))?;
        let up_to = self.wal.current_sequence();
        snapshot::write(&self.files.data, &self.name, &table.all())?;
        self.wal.truncate()?;
        debug!(store = %self.name, up_to_sequence = up_to, "checkpoint complete");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn maybe_checkpoint(&self) {
        match self.wal.size_bytes() {
            Ok(size) if size > self.max_wal_size => {
                if let Err(e) = self.checkpoint() {
                    warn!(store = %self.name, error = %e, "checkpoint failed; WAL keeps growing");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(store = %self.name, error = %e, "unable to stat WAL"),
        }
    }
}

impl StorageEngine for DurableEngine {
    fn scan(&self, entity: &str) -> Result<Vec<Record>, StorageError> {
        self.ensure_open()?;
        let table = self.table.read().map_err(|_| lock_err("durable table"))?;
        Ok(table.scan(entity))
    }

    fn get(&self, entity_ref: EntityRef) -> Result<Option<Record>, StorageError> {
        self.ensure_open()?;
        let table = self.table.read().map_err(|_| lock_err("durable table"))?;
        Ok(table.get(entity_ref))
    }

    fn apply(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        self.ensure_open()?;
        {
            let mut table = self.table.write().map_err(|_| lock_err("durable table"))?;
            let sequence = self.wal.append(WalEntryKind::Commit(changes.clone()))?;
            let report = table.apply(changes);
            debug!(
                store = %self.name,
                sequence,
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                "persisted change set"
            );
        }
        self.persisted_commits.fetch_add(1, Ordering::AcqRel);
        self.maybe_checkpoint();
        Ok(())
    }

    fn batch_delete(&self, refs: &[EntityRef]) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let removed = {
            let mut table = self.table.write().map_err(|_| lock_err("durable table"))?;
            self.wal.append(WalEntryKind::BatchDelete { refs: refs.to_vec() })?;
            table.batch_delete(refs)
        };
        self.persisted_commits.fetch_add(1, Ordering::AcqRel);
        self.maybe_checkpoint();
        Ok(removed)
    }

    fn max_seq(&self) -> u64 {
        self.table.read().map_or(0, |t| t.max_seq())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            persisted_commits: self.persisted_commits.load(Ordering::Acquire),
            wal_sequence: self.wal.current_sequence(),
            rows: self.table.read().map_or(0, |t| t.len()),
        }
    }

    fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let result = self.checkpoint();
        // Release the lock even when the final checkpoint fails: the WAL
        // still holds every entry.
        let released = self.lock.lock().map(|mut guard| guard.take());
        if released.is_err() {
            warn!(store = %self.name, "lock mutex poisoned while closing");
        }
        info!(store = %self.name, "closed durable store");
        result
    }
}

impl Drop for DurableEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(store = %self.name, error = %e, "error closing store on drop");
        }
    }
}
