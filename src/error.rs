//! Error types for Mellon.
//!
//! All errors are strongly typed using thiserror and funnel into
//! [`MellonError`]. Callers can match on the layer that failed
//! (validation, query, context, store) without parsing messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::entity::EntityRef;
use crate::store::StorageError;

/// Validation errors raised when a value or name does not fit the schema.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown entity '{entity}'")]
    UnknownEntity {
        entity: String,
    },

    #[error("Entity '{entity}' has no field '{field}'")]
    UnknownField {
        entity: String,
        field: String,
    },

    #[error("Field '{entity}.{field}' expects {expected}, got {actual}")]
    TypeMismatch {
        entity: String,
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Required field '{entity}.{field}' is missing")]
    MissingField {
        entity: String,
        field: String,
    },

    #[error("Field '{entity}.{field}' is not a relation")]
    NotARelation {
        entity: String,
        field: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised while compiling or executing a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed sort specification '{spec}': clause '{clause}' must be 'field [ASC|DESC]'")]
    MalformedSort {
        spec: String,
        clause: String,
    },

    #[error("Invalid operand for {operator} on '{field}': {reason}")]
    InvalidOperand {
        field: String,
        operator: &'static str,
        reason: String,
    },

    #[error("Invalid LIKE pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Invalid query combination: {reason}")]
    InvalidCombination {
        reason: String,
    },

    #[error("Query execution failed: {message}")]
    Execution {
        message: String,
    },
}

/// Errors raised by contexts, lanes and the hierarchy that owns them.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Context hierarchy is closed")]
    HierarchyClosed,

    #[error("Context hierarchy is switching stores")]
    Switching,

    #[error("Context hierarchy has no open store")]
    Uninitialized,

    #[error("Context {context} belongs to a store that is no longer active")]
    Invalidated {
        context: String,
    },

    #[error("Object not found: {0}")]
    ObjectNotFound(EntityRef),

    #[error("Object {0} has been deleted in this context")]
    ObjectDeleted(EntityRef),

    #[error("Lane '{lane}' is disconnected")]
    LaneDisconnected {
        lane: String,
    },

    #[error("Lane '{lane}' queue is full (capacity {capacity})")]
    LaneFull {
        lane: String,
        capacity: usize,
    },

    #[error("Transaction block panicked on lane '{lane}'")]
    TransactionPanicked {
        lane: String,
    },
}

/// Failure to duplicate a store's file set.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Source store file is missing: {path}")]
    SourceMissing {
        path: PathBuf,
    },

    #[error("Destination store file already exists: {path}")]
    DestinationExists {
        path: PathBuf,
    },

    #[error("I/O error copying {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to remove a store's file set.
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Store file is missing: {path}")]
    MissingFile {
        path: PathBuf,
    },

    #[error("Store '{name}' is active and cannot be deleted")]
    InUse {
        name: String,
    },

    #[error("I/O error removing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by the store lifecycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unable to open store '{name}': {reason}")]
    Open {
        name: String,
        reason: String,
    },

    #[error("Copy failed: {0}")]
    Copy(#[from] CopyError),

    #[error("Delete failed: {0}")]
    Delete(#[from] DeleteError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Top-level error type for Mellon.
#[derive(Debug, Error)]
pub enum MellonError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for MellonError {
    fn from(err: StorageError) -> Self {
        Self::Store(StoreError::Storage(err))
    }
}

impl From<CopyError> for MellonError {
    fn from(err: CopyError) -> Self {
        Self::Store(StoreError::Copy(err))
    }
}

impl From<DeleteError> for MellonError {
    fn from(err: DeleteError) -> Self {
        Self::Store(StoreError::Delete(err))
    }
}

impl MellonError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a query error.
    #[must_use]
    pub const fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    /// Returns true if this is a context error.
    #[must_use]
    pub const fn is_context(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Query(e) => matches!(e, QueryError::Execution { .. }),
            Self::Context(e) => matches!(e, ContextError::Switching | ContextError::LaneFull { .. }),
            Self::Store(e) => matches!(e, StoreError::Storage(_)),
        }
    }
}

/// Result type alias for Mellon operations.
pub type MellonResult<T> = Result<T, MellonError>;
