//! Backing store lifecycle.
//!
//! A [`Store`] wraps one storage engine bound to a name. Exactly one store is
//! active per hierarchy; only the root context writes to it. File-set level
//! operations ([`Store::copy`], [`Store::delete`]) work on closed stores and
//! never touch an engine.

pub mod files;
mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod table;
mod traits;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{MellonConfig, StoreMode};
use crate::context::ChangeSet;
use crate::entity::{EntityRef, Record};
use crate::error::{MellonResult, QueryError, StoreError};
use crate::query::{executor, FetchSpec};
use crate::schema::Schema;

pub use files::StoreFiles;
pub use memory::MemoryEngine;
pub use traits::{StorageEngine, StorageError, StoreStats};

/// One open backing container.
pub struct Store {
    name: String,
    mode: StoreMode,
    files: Option<StoreFiles>,
    schema: Arc<Schema>,
    engine: Box<dyn StorageEngine>,
    next_seq: AtomicU64,
}

impl Store {
    /// Opens store `name`, creating its backing files when durable.
    ///
    /// Fails with `StoreError::Open` if the name is unusable, the schema is
    /// empty, or the files cannot be created, locked or read.
    pub fn open(
        name: &str,
        mode: StoreMode,
        config: &MellonConfig,
        schema: Arc<Schema>,
    ) -> MellonResult<Self> {
        let open_err = |reason: String| StoreError::Open {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(open_err("store names must be non-empty and contain no path separators".into()).into());
        }
        if schema.is_empty() {
            return Err(open_err("schema defines no entities".into()).into());
        }

        let (engine, files): (Box<dyn StorageEngine>, Option<StoreFiles>) = match mode {
            StoreMode::InMemory => (Box::new(MemoryEngine::new()), None),
            StoreMode::Durable => Self::open_durable(name, config).map_err(open_err)?,
        };

        let next_seq = engine.max_seq() + 1;
        info!(store = name, ?mode, next_seq, "store opened");

        Ok(Self {
            name: name.to_string(),
            mode,
            files,
            schema,
            engine,
            next_seq: AtomicU64::new(next_seq),
        })
    }

    #[cfg(feature = "persistent")]
    fn open_durable(
        name: &str,
        config: &MellonConfig,
    ) -> Result<(Box<dyn StorageEngine>, Option<StoreFiles>), String> {
        let files = StoreFiles::new(&config.base_dir, name);
        let engine = persistent::DurableEngine::open(
            name,
            files.clone(),
            config.sync_on_write,
            config.max_wal_size,
        )
        .map_err(|e| e.to_string())?;
        Ok((Box::new(engine), Some(files)))
    }

    #[cfg(not(feature = "persistent"))]
    fn open_durable(
        _name: &str,
        _config: &MellonConfig,
    ) -> Result<(Box<dyn StorageEngine>, Option<StoreFiles>), String> {
        Err("durable stores require the `persistent` feature".to_string())
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store mode.
    #[must_use]
    pub const fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Backing files, for durable stores.
    #[must_use]
    pub const fn files(&self) -> Option<&StoreFiles> {
        self.files.as_ref()
    }

    /// Schema the store was opened with.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Allocates the next insertion sequence. Sequences are never reused.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::AcqRel)
    }

    /// Persisted rows of `entity`.
    pub fn scan(&self, entity: &str) -> Result<Vec<Record>, StorageError> {
        self.engine.scan(entity)
    }

    /// One persisted row.
    pub fn get(&self, entity_ref: EntityRef) -> Result<Option<Record>, StorageError> {
        self.engine.get(entity_ref)
    }

    /// Runs a compiled fetch against persisted rows only.
    pub fn fetch(&self, spec: &FetchSpec) -> MellonResult<Vec<Record>> {
        let rows = self.engine.scan(&spec.entity).map_err(|e| QueryError::Execution {
            message: e.to_string(),
        })?;
        Ok(executor::execute(rows, spec)?)
    }

    /// Writes a committed change set.
    pub fn apply(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        self.engine.apply(changes)
    }

    /// Set-based delete that bypasses context change tracking.
    pub fn batch_delete(&self, refs: &[EntityRef]) -> Result<usize, StorageError> {
        self.engine.batch_delete(refs)
    }

    /// Current engine counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.engine.stats()
    }

    /// Checkpoints and releases the engine.
    pub fn close(&self) -> Result<(), StorageError> {
        debug!(store = %self.name, "closing store");
        self.engine.close()
    }

    /// Duplicates the file set of store `from` as store `to`.
    pub fn copy(config: &MellonConfig, from: &str, to: &str) -> MellonResult<()> {
        let from = StoreFiles::new(&config.base_dir, from);
        let to = StoreFiles::new(&config.base_dir, to);
        files::copy(&from, &to)?;
        Ok(())
    }

    /// Removes the file set of store `name`.
    pub fn delete(config: &MellonConfig, name: &str) -> MellonResult<()> {
        files::delete(&StoreFiles::new(&config.base_dir, name))?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}
