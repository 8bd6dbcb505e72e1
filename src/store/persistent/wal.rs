//! Write-ahead log (`<name>.data-wal`).
//!
//! Every change set the root context persists is appended here before it is
//! applied to the in-memory table, and replayed on open.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::ChangeSet;
use crate::entity::EntityRef;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The operation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A committed change set from the root context.
    Commit(ChangeSet),
    /// A set-based delete that bypassed change tracking.
    BatchDelete { refs: Vec<EntityRef> },
}

struct WalState {
    writer: BufWriter<File>,
    sequence: u64,
}

/// Append-only log guarded by an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

fn poisoned() -> std::io::Error {
    std::io::Error::new(ErrorKind::Other, "poisoned lock: wal")
}

impl WriteAheadLog {
    /// Opens or creates a WAL file.
    ///
    /// An existing file is scanned for its last valid sequence; a new one
    /// gets the header.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let has_header = path.exists() && std::fs::metadata(path)?.len() >= 5;

        let sequence = if has_header {
            Self::find_last_sequence(path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    /// Appends an entry and returns its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;

        let candidate = state.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        state.writer.write_all(&encoded)?;
        state.writer.flush()?;
        if self.sync_on_write {
            state.writer.get_ref().sync_all()?;
        }

        state.sequence = candidate;
        Ok(candidate)
    }

    /// Iterates over all entries, for replay.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence of the last appended entry.
    pub fn current_sequence(&self) -> u64 {
        self.state.lock().map_or(0, |s| s.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Truncates the log to its header after a checkpoint.
    ///
    /// Only call this once the data file holds every entry.
    pub fn truncate(&self) -> IoResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.writer.flush()?;

        {
            let mut file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
            codec::write_header(&mut file)?;
            if self.sync_on_write {
                file.sync_all()?;
            }
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        state.writer = BufWriter::new(file);
        state.sequence = 0;
        Ok(())
    }

    fn find_last_sequence(path: &Path) -> IoResult<u64> {
        let mut last_seq = 0;

        for entry_result in WalIterator::new(path)? {
            match entry_result {
                Ok(entry) => last_seq = entry.sequence,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        sequence = last_seq + 1,
                        error = %e,
                        "WAL corruption detected; replay stops at the last valid entry"
                    );
                    break;
                }
            }
        }

        Ok(last_seq)
    }
}

/// Iterator over WAL entries.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let _version = codec::read_header(&mut reader)?;

        Ok(Self { reader, file_size })
    }

    fn at_eof(&mut self) -> IoResult<bool> {
        let pos = self.reader.stream_position()?;
        Ok(pos >= self.file_size)
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.at_eof() {
            Ok(true) => return None,
            Ok(false) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            // A torn final write.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::entity::Record;

    fn insert_one() -> ChangeSet {
        let mut changes = ChangeSet::default();
        changes.record_insert(Record::new(EntityRef::new(), "Fruit", 1));
        changes
    }

    #[test]
    fn test_wal_append_and_reopen() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("fruits.data-wal");

        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(WalEntryKind::Commit(insert_one())).unwrap();
            wal.append(WalEntryKind::BatchDelete { refs: vec![EntityRef::new()] })
                .unwrap();
            assert_eq!(wal.current_sequence(), 2);
        }

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(wal.current_sequence(), 2);
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].kind, WalEntryKind::Commit(_)));
        assert!(matches!(entries[1].kind, WalEntryKind::BatchDelete { .. }));
    }

    #[test]
    fn test_truncate_resets_log() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("fruits.data-wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(WalEntryKind::Commit(insert_one())).unwrap();
        wal.truncate().unwrap();

        assert_eq!(wal.current_sequence(), 0);
        assert_eq!(wal.size_bytes().unwrap(), 5);
        assert_eq!(wal.iter().unwrap().count(), 0);

        assert_eq!(wal.append(WalEntryKind::Commit(insert_one())).unwrap(), 1);
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("fruits.data-wal");

        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(WalEntryKind::Commit(insert_one())).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&[1, 200, 0]).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(wal.current_sequence(), 1);
    }
}
