//! Runtime configuration.

use std::path::PathBuf;

use crate::error::{MellonResult, ValidationError};

/// Where a store keeps its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreMode {
    /// Data file, write-ahead log and shared lock file under `base_dir`.
    #[default]
    Durable,
    /// Process memory only. Contents are lost when the store is closed.
    InMemory,
}

/// Configuration shared by every store a hierarchy opens.
#[derive(Debug, Clone)]
pub struct MellonConfig {
    /// Directory holding the `<name>.data*` file sets.
    pub base_dir: PathBuf,
    /// Whether to fsync after every WAL append (slower but safer).
    pub sync_on_write: bool,
    /// WAL size that triggers a checkpoint into the data file (bytes).
    pub max_wal_size: u64,
    /// Maximum queued jobs per lane.
    pub lane_queue_capacity: usize,
    /// Default page size of elastic pagination.
    pub default_page_size: usize,
}

impl Default for MellonConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("mellon"),
            sync_on_write: true,
            max_wal_size: 16 * 1024 * 1024, // 16 MB
            lane_queue_capacity: 1024,
            default_page_size: 100,
        }
    }
}

impl MellonConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // 4 KiB minimum to avoid checkpoint loops
    const MIN_QUEUE_CAPACITY: usize = 16;

    /// Creates a configuration rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Checks minimums and returns the configuration unchanged.
    pub fn validate(self) -> MellonResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(invalid(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }

        if self.lane_queue_capacity < Self::MIN_QUEUE_CAPACITY {
            return Err(invalid(format!(
                "lane_queue_capacity must be at least {} (got {})",
                Self::MIN_QUEUE_CAPACITY,
                self.lane_queue_capacity
            )));
        }

        if self.default_page_size == 0 {
            return Err(invalid("default_page_size must be at least 1".to_string()));
        }

        Ok(self)
    }
}

fn invalid(reason: String) -> crate::error::MellonError {
    ValidationError::InvalidConfig { reason }.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MellonConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_wal() {
        let config = MellonConfig {
            max_wal_size: 10,
            ..MellonConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("max_wal_size"));
    }

    #[test]
    fn test_rejects_small_queues_and_pages() {
        let queues = MellonConfig {
            lane_queue_capacity: 1,
            ..MellonConfig::default()
        };
        assert!(queues.validate().is_err());

        let pages = MellonConfig {
            default_page_size: 0,
            ..MellonConfig::default()
        };
        assert!(pages.validate().is_err());
    }
}
