//! Contract between the store lifecycle and its storage engines.
//!
//! The engine is the ACID-capable collaborator underneath the access layer:
//! it keeps rows, applies committed change sets atomically and answers
//! scans. Query semantics live above it, in the executor.

use thiserror::Error;

use crate::context::ChangeSet;
use crate::entity::{EntityRef, Record};

/// Errors that can occur inside a storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The engine has been closed; the store is no longer active.
    #[error("Storage engine is closed")]
    Closed,

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters describing what an engine has persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Change sets and batch deletes applied since the engine was opened.
    pub persisted_commits: u64,
    /// Sequence of the last WAL entry (0 for in-memory engines).
    pub wal_sequence: u64,
    /// Rows currently held.
    pub rows: usize,
}

/// Storage engine operations.
///
/// # Safety Considerations
/// - `apply` must be atomic: either every change is visible or none is
/// - Implementations must be safe to call from any lane
pub trait StorageEngine: Send + Sync {
    /// All rows of `entity`, ascending by insertion sequence.
    fn scan(&self, entity: &str) -> Result<Vec<Record>, StorageError>;

    /// One row by identity.
    fn get(&self, entity_ref: EntityRef) -> Result<Option<Record>, StorageError>;

    /// Applies a committed change set.
    fn apply(&self, changes: &ChangeSet) -> Result<(), StorageError>;

    /// Removes rows without change tracking. Returns how many existed.
    fn batch_delete(&self, refs: &[EntityRef]) -> Result<usize, StorageError>;

    /// Highest insertion sequence held (0 when empty).
    fn max_seq(&self) -> u64;

    /// Current counters.
    fn stats(&self) -> StoreStats;

    /// Flushes and releases the engine. Later calls fail with `Closed`.
    fn close(&self) -> Result<(), StorageError>;
}
