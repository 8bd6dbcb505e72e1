//! Exclusive lock on a store's shared-memory file.
//!
//! The `<name>.data-shm` file carries a small header describing the process
//! that opened the store and holds an exclusive advisory lock for as long as
//! the store is open, so two openers never write the same file set.
//!
//! # Safety
//! - Lock is released when `FileLock` is dropped
//! - Lock file is created if it doesn't exist
//! - Non-blocking lock attempt with clear error on failure

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec;

/// Header written into the shared file after the lock is taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShmHeader {
    pub store: String,
    pub pid: u32,
    pub opened_at: DateTime<Utc>,
}

/// Exclusive lock held for the lifetime of an open store.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Opens (or creates) `path`, takes the exclusive lock and rewrites the
    /// header.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another opener holds the lock
    /// - `ErrorKind::PermissionDenied` if we don't have write access
    pub fn acquire(path: &Path, store: &str) -> IoResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::try_lock(&file)?;

        let header = ShmHeader {
            store: store.to_string(),
            pid: std::process::id(),
            opened_at: Utc::now(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        codec::write_header(&mut file)?;
        file.write_all(&codec::encode(&header)?)?;
        file.flush()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back the header written by the current holder.
    pub fn header(&self) -> IoResult<ShmHeader> {
        let mut reader = &self.file;
        reader.seek(SeekFrom::Start(0))?;
        codec::read_header(&mut reader)?;
        codec::decode(&mut reader)
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let fd = file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `file` for the duration of the call.
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            let errno = IoError::last_os_error();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "store is locked by another opener",
                ));
            }
            return Err(errno);
        }

        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        // SAFETY: `handle` stays valid while `file` is borrowed; OVERLAPPED is plain data.
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(
                handle,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                1,
                0,
                &mut overlapped,
            )
        };

        if result == 0 {
            let err = IoError::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("store is locked by another opener: {err}"),
            ));
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
