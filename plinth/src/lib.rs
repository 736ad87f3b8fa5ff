//! # Plinth Storage Core
//! The storage and transaction substrate for the Atlas database.
//! This crate owns the on-disk page layout, the buffer pool that mediates
//! every page access, page-granularity two-phase locking with deadlock
//! detection, and the write-ahead log used to commit and abort atomically.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The buffer pool: bounded page cache and the only path from operators to disk.
pub mod buffer_pool;
/// The process-wide table registry.
pub mod catalog;
/// Runtime knobs (page size, pool capacity, lock timeouts).
pub mod config;
/// The database context wiring catalog, buffer pool and log together.
pub mod database;
/// Error types shared across the crate.
pub mod error;
/// Heap files: sequences of fixed-size pages backed by one regular file.
pub mod heap_file;
/// Lock manager for page-level shared/exclusive locking.
pub mod lock_manager;
/// The slotted heap page layout.
pub mod page;
/// Transaction identifiers.
pub mod transaction;
/// Tuples, fields and schemas.
pub mod tuple;
/// The Write-Ahead Log.
pub mod wal;

pub use buffer_pool::{BufferPool, Permissions, SharedPage};
pub use config::DbConfig;
pub use database::Database;
pub use error::{AbortReason, DbError, DbResult};
pub use transaction::TransactionId;

/// Identity of a page: which table it belongs to and its index within the
/// table's backing file. The first page of a file is page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId {
    pub table_id: i32,
    pub page_no: i32,
}

impl PageId {
    pub fn new(table_id: i32, page_no: i32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Identity of a stored tuple: the page holding it and the slot index on
/// that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub pid: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(pid: PageId, slot: usize) -> Self {
        Self { pid, slot }
    }
}
