//! The three-file set backing a durable store, and whole-set copy/delete.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CopyError, DeleteError};

/// Suffix of the primary data file.
pub const DATA_SUFFIX: &str = "data";
/// Suffix of the write-ahead log.
pub const WAL_SUFFIX: &str = "data-wal";
/// Suffix of the shared lock/header file.
pub const SHM_SUFFIX: &str = "data-shm";

/// Paths of one store's file set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFiles {
    pub data: PathBuf,
    pub wal: PathBuf,
    pub shm: PathBuf,
}

impl StoreFiles {
    /// File set of store `name` under `base_dir`.
    #[must_use]
    pub fn new(base_dir: &Path, name: &str) -> Self {
        Self {
            data: base_dir.join(format!("{name}.{DATA_SUFFIX}")),
            wal: base_dir.join(format!("{name}.{WAL_SUFFIX}")),
            shm: base_dir.join(format!("{name}.{SHM_SUFFIX}")),
        }
    }

    /// The three paths, primary first.
    #[must_use]
    pub fn all(&self) -> [&Path; 3] {
        [&self.data, &self.wal, &self.shm]
    }

    /// Returns true if every file of the set exists.
    #[must_use]
    pub fn exist(&self) -> bool {
        self.all().iter().all(|p| p.exists())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".copying");
    path.with_file_name(name)
}

fn remove_quietly(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "unable to clean up partial copy");
            }
        }
    }
}

/// Copies the whole file set of `from` to `to`.
///
/// All-or-nothing: files are first copied to temporary siblings and only
/// renamed into place once every copy succeeded. On failure every partially
/// written destination file is removed.
pub fn copy(from: &StoreFiles, to: &StoreFiles) -> Result<(), CopyError> {
    for path in from.all() {
        if !path.exists() {
            return Err(CopyError::SourceMissing {
                path: path.to_path_buf(),
            });
        }
    }
    for path in to.all() {
        if path.exists() {
            return Err(CopyError::DestinationExists {
                path: path.to_path_buf(),
            });
        }
    }

    let mut staged = Vec::with_capacity(3);
    for (src, dst) in from.all().into_iter().zip(to.all()) {
        let temp = temp_sibling(dst);
        staged.push(temp.clone());
        if let Err(source) = fs::copy(src, &temp) {
            remove_quietly(&staged);
            return Err(CopyError::Io {
                path: src.to_path_buf(),
                source,
            });
        }
    }

    let mut placed = Vec::with_capacity(3);
    for (temp, dst) in staged.iter().zip(to.all()) {
        if let Err(source) = fs::rename(temp, dst) {
            remove_quietly(&placed);
            remove_quietly(&staged);
            return Err(CopyError::Io {
                path: dst.to_path_buf(),
                source,
            });
        }
        placed.push(dst.to_path_buf());
    }

    debug!(from = %from.data.display(), to = %to.data.display(), "copied store file set");
    Ok(())
}

/// Removes the whole file set. Fails without removing anything if any file
/// is missing.
pub fn delete(files: &StoreFiles) -> Result<(), DeleteError> {
    for path in files.all() {
        if !path.exists() {
            return Err(DeleteError::MissingFile {
                path: path.to_path_buf(),
            });
        }
    }
    for path in files.all() {
        fs::remove_file(path).map_err(|source| DeleteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    }
    debug!(data = %files.data.display(), "deleted store file set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed(files: &StoreFiles) {
        for (idx, path) in files.all().iter().enumerate() {
            fs::write(path, format!("file-{idx}")).unwrap();
        }
    }

    #[test]
    fn test_paths_share_base_name() {
        let files = StoreFiles::new(Path::new("/stores"), "fruits");
        assert_eq!(files.data, Path::new("/stores/fruits.data"));
        assert_eq!(files.wal, Path::new("/stores/fruits.data-wal"));
        assert_eq!(files.shm, Path::new("/stores/fruits.data-shm"));
    }

    #[test]
    fn test_copy_duplicates_every_file() {
        let dir = tempdir().unwrap();
        let from = StoreFiles::new(dir.path(), "a");
        let to = StoreFiles::new(dir.path(), "b");
        seed(&from);

        copy(&from, &to).unwrap();
        assert!(to.exist());
        assert_eq!(fs::read_to_string(&to.wal).unwrap(), "file-1");
    }

    #[test]
    fn test_copy_refuses_missing_source_and_existing_destination() {
        let dir = tempdir().unwrap();
        let from = StoreFiles::new(dir.path(), "a");
        let to = StoreFiles::new(dir.path(), "b");

        assert!(matches!(copy(&from, &to), Err(CopyError::SourceMissing { .. })));

        seed(&from);
        fs::write(&to.shm, "stale").unwrap();
        assert!(matches!(copy(&from, &to), Err(CopyError::DestinationExists { .. })));
        assert!(!to.data.exists());
    }

    #[test]
    fn test_copy_with_partial_source_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let from = StoreFiles::new(dir.path(), "a");
        let to = StoreFiles::new(dir.path(), "b");
        fs::write(&from.data, "data").unwrap();
        fs::write(&from.wal, "wal").unwrap();

        assert!(copy(&from, &to).is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_delete_requires_full_set() {
        let dir = tempdir().unwrap();
        let files = StoreFiles::new(dir.path(), "a");
        fs::write(&files.data, "data").unwrap();
        fs::write(&files.wal, "wal").unwrap();

        assert!(matches!(delete(&files), Err(DeleteError::MissingFile { .. })));
        assert!(files.data.exists());

        fs::write(&files.shm, "shm").unwrap();
        delete(&files).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
