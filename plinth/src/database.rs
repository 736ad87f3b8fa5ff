//! The database context: configuration, catalog, log and buffer pool wired
//! together and passed explicitly to whatever embeds the engine. There is
//! no process-wide singleton; tests routinely run several databases side
//! by side.

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::config::DbConfig;
use crate::error::DbResult;
use crate::heap_file::HeapFile;
use crate::tuple::TupleDesc;
use crate::wal::{WalFile, WalSink};
use std::path::Path;
use std::sync::Arc;

pub struct Database {
    config: DbConfig,
    catalog: Arc<Catalog>,
    wal: Arc<dyn WalSink>,
    buffer_pool: Arc<BufferPool>,
}

impl Database {
    /// Wire a database around an arbitrary log sink. Tests use this to
    /// interpose recording sinks.
    pub fn new(config: DbConfig, wal: Arc<dyn WalSink>) -> Self {
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = Arc::new(BufferPool::new(&config, catalog.clone(), wal.clone()));
        Self {
            config,
            catalog,
            wal,
            buffer_pool,
        }
    }

    /// Open a database rooted in `dir`, with its log file at `dir/db.wal`.
    pub fn open(dir: impl AsRef<Path>, config: DbConfig) -> DbResult<Self> {
        let wal = Arc::new(WalFile::open(dir.as_ref().join("db.wal"))?);
        Ok(Self::new(config, wal))
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn wal(&self) -> &Arc<dyn WalSink> {
        &self.wal
    }

    /// Create (or reopen) a heap file at `path` with the configured page
    /// size and register it under `name`. Returns the table id.
    pub fn add_table(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        desc: Arc<TupleDesc>,
        primary_key: &str,
    ) -> DbResult<i32> {
        let file = Arc::new(HeapFile::open(path, desc, self.config.page_size)?);
        let id = file.id();
        self.catalog.add_table(file, name, primary_key);
        Ok(id)
    }
}
