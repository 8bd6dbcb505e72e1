//! Checkpoint snapshot (`<name>.data`).
//!
//! The data file holds every row as of the last checkpoint. It is never
//! edited in place: a new snapshot is written to a temporary sibling and
//! renamed over the old one.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Result as IoResult, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Record;

use super::codec;

/// Snapshot header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub store: String,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Reads all rows from a data file.
pub fn read(path: &Path) -> IoResult<(SnapshotHeader, Vec<Record>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let _version = codec::read_header(&mut reader)?;
    let header: SnapshotHeader = codec::decode(&mut reader)?;
    let rows: Vec<Record> = codec::decode(&mut reader)?;
    Ok((header, rows))
}

/// Writes `rows` as the new data file: temporary sibling, fsync, rename.
pub fn write(path: &Path, store: &str, rows: &[Record]) -> IoResult<()> {
    let temp_path = path.with_extension("data.tmp");
    let result = write_to(&temp_path, store, rows).and_then(|()| fs::rename(&temp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_to(path: &Path, store: &str, rows: &[Record]) -> IoResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    codec::write_header(&mut writer)?;
    let header = SnapshotHeader {
        store: store.to_string(),
        row_count: rows.len() as u64,
        created_at: Utc::now(),
    };
    writer.write_all(&codec::encode(&header)?)?;
    writer.write_all(&codec::encode(&rows)?)?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::entity::EntityRef;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fruits.data");

        let mut row = Record::new(EntityRef::new(), "Fruit", 1);
        row.set("name", "Mango".into());
        write(&path, "fruits", &[row.clone()]).unwrap();

        let (header, rows) = read(&path).unwrap();
        assert_eq!(header.store, "fruits");
        assert_eq!(header.row_count, 1);
        assert_eq!(rows, vec![row]);
    }

    #[test]
    fn test_rewrite_replaces_rows_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fruits.data");

        write(&path, "fruits", &[Record::new(EntityRef::new(), "Fruit", 1)]).unwrap();
        write(&path, "fruits", &[]).unwrap();

        let (header, rows) = read(&path).unwrap();
        assert_eq!(header.row_count, 0);
        assert!(rows.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
