//! Heap files: one table's pages stored back to back in a single regular
//! file. Page number i occupies bytes [i * page_size, (i + 1) * page_size).
//! All tuple-level access goes through the buffer pool so that locking and
//! caching stay in force; only raw page I/O happens here.

use crate::buffer_pool::{BufferPool, Permissions, SharedPage};
use crate::error::{DbError, DbResult};
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::PageId;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A heap file. The table id is derived from the canonical path so that a
/// restart reproduces the same id for the same file.
pub struct HeapFile {
    file: File,
    path: PathBuf,
    table_id: i32,
    desc: Arc<TupleDesc>,
    page_size: usize,
    /// Serializes the extend-file step; reads and in-place writes rely on
    /// page-level locks instead.
    extend: Mutex<()>,
}

impl HeapFile {
    /// Open (or create) the backing file at `path`.
    pub fn open(path: impl AsRef<Path>, desc: Arc<TupleDesc>, page_size: usize) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        let path = path.as_ref().canonicalize()?;
        let table_id = crc32fast::hash(path.as_os_str().as_encoded_bytes()) as i32;
        log::debug!("heap file {:?} opened as table {}", path, table_id);
        Ok(Self {
            file,
            path,
            table_id,
            desc,
            page_size,
            extend: Mutex::new(()),
        })
    }

    pub fn id(&self) -> i32 {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of whole pages currently in the file.
    pub fn num_pages(&self) -> DbResult<usize> {
        Ok(self.file.metadata()?.len() as usize / self.page_size)
    }

    /// Read one page image from disk. Short reads at end of file are
    /// zero-filled, so a page number just past the end parses as empty.
    pub fn read_page(&self, pid: PageId) -> DbResult<HeapPage> {
        if pid.table_id != self.table_id {
            return Err(DbError::NotFound(format!(
                "page {} does not belong to table {}",
                pid, self.table_id
            )));
        }
        let offset = pid.page_no as u64 * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size];
        let mut filled = 0;
        while filled < self.page_size {
            let n = self.file.read_at(&mut buf[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        HeapPage::new(pid, &buf, self.desc.clone())
    }

    /// Write one page image at its offset, extending the file if needed.
    pub fn write_page(&self, page: &HeapPage) -> DbResult<()> {
        let offset = page.pid().page_no as u64 * self.page_size as u64;
        self.file.write_all_at(&page.serialize(), offset)?;
        Ok(())
    }

    /// Insert `tuple` into the first page with a free slot, fetching each
    /// candidate page through the buffer pool with write permission. When
    /// every page is full a fresh page is appended to the file under the
    /// extend mutex. Returns the dirtied pages for the pool to mark and
    /// cache.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> DbResult<Vec<(PageId, SharedPage)>> {
        let mut page_no = 0;
        while page_no < self.num_pages()? {
            let pid = PageId::new(self.table_id, page_no as i32);
            let shared = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let has_space = shared.read().num_empty_slots() > 0;
            if has_space {
                shared.write().insert_tuple(tuple)?;
                return Ok(vec![(pid, shared)]);
            }
            page_no += 1;
        }

        let _extend = self.extend.lock();
        let pid = PageId::new(self.table_id, self.num_pages()? as i32);
        let mut page = HeapPage::new(pid, &HeapPage::empty_page_data(self.page_size), self.desc.clone())?;
        page.insert_tuple(tuple)?;
        self.write_page(&page)?;
        log::debug!("table {}: extended to page {}", self.table_id, pid.page_no);
        Ok(vec![(pid, Arc::new(parking_lot::RwLock::new(page)))])
    }

    /// Delete `tuple` from the page its record id names, fetched through
    /// the buffer pool with write permission.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> DbResult<Vec<(PageId, SharedPage)>> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotFound("tuple has no record id".into()))?;
        let shared = pool.get_page(tid, rid.pid, Permissions::ReadWrite)?;
        shared.write().delete_tuple(tuple)?;
        Ok(vec![(rid.pid, shared)])
    }

    /// A restartable sequential iterator over every stored tuple, page by
    /// page, fetched read-only through the buffer pool.
    pub fn iter(self: &Arc<Self>, tid: TransactionId, pool: Arc<BufferPool>) -> HeapFileIterator {
        HeapFileIterator::new(self.clone(), pool, tid)
    }
}

/// Lazily walks a heap file's pages in order, buffering one page's occupied
/// tuples at a time. `open` pins the page count; `rewind` reopens at page 0.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    state: Option<IterState>,
}

struct IterState {
    num_pages: usize,
    next_page: usize,
    buffered: std::vec::IntoIter<Tuple>,
}

impl HeapFileIterator {
    pub fn new(file: Arc<HeapFile>, pool: Arc<BufferPool>, tid: TransactionId) -> Self {
        Self {
            file,
            pool,
            tid,
            state: None,
        }
    }

    pub fn open(&mut self) -> DbResult<()> {
        self.state = Some(IterState {
            num_pages: self.file.num_pages()?,
            next_page: 0,
            buffered: Vec::new().into_iter(),
        });
        Ok(())
    }

    /// The next tuple, or `None` once every page is exhausted.
    pub fn next(&mut self) -> DbResult<Option<Tuple>> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("iterator is not open".into()))?;
        loop {
            if let Some(tuple) = state.buffered.next() {
                return Ok(Some(tuple));
            }
            if state.next_page >= state.num_pages {
                return Ok(None);
            }
            let pid = PageId::new(self.file.id(), state.next_page as i32);
            state.next_page += 1;
            let shared = self
                .pool
                .get_page(self.tid, pid, Permissions::ReadOnly)?;
            let tuples: Vec<Tuple> = shared.read().iter().cloned().collect();
            state.buffered = tuples.into_iter();
        }
    }

    pub fn rewind(&mut self) -> DbResult<()> {
        self.close()?;
        self.open()
    }

    pub fn close(&mut self) -> DbResult<()> {
        if self.state.take().is_none() {
            return Err(DbError::InvalidState("iterator is not open".into()));
        }
        Ok(())
    }
}
