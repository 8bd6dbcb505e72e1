//! Durable storage backend.
//!
//! This module provides crash-safe storage with:
//! - Write-ahead logging for crash recovery (`<name>.data-wal`)
//! - A checkpoint snapshot written temp-then-rename (`<name>.data`)
//! - An exclusive lock plus opener header (`<name>.data-shm`)
//! - CRC32 checksums for corruption detection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       DurableEngine                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐                    │
//! │  │ WriteAheadLog   │  │ Snapshot        │                    │
//! │  │ (append-only)   │  │ (checkpointed)  │                    │
//! │  └────────┬────────┘  └────────┬────────┘                    │
//! │           └──────────┬─────────┘                             │
//! │                      ↓                                       │
//! │           ┌─────────────────────┐                            │
//! │           │   FileLock (flock)  │                            │
//! │           └─────────────────────┘                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod codec;
mod engine;
mod file_lock;
mod snapshot;
mod wal;

pub use engine::DurableEngine;
pub use file_lock::{FileLock, ShmHeader};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};
