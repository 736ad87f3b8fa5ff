//! The buffer pool: a bounded cache of heap pages and the only path from
//! operators to disk. Every page request goes through the lock manager
//! first, then the cache; dirty pages are logged to the WAL and written
//! back before eviction (STEAL), and commit/abort are orchestrated here.

use crate::catalog::Catalog;
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::lock_manager::{LockManager, LockMode};
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::wal::WalSink;
use crate::PageId;
use parking_lot::{Mutex, RwLock};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Requested access level for a page. READ_ONLY maps to a shared lock,
/// READ_WRITE to an exclusive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// A cached page, aliasable by every transaction that holds a lock on it.
/// The reference stays valid until the holding transaction completes.
pub type SharedPage = Arc<RwLock<HeapPage>>;

pub struct BufferPool {
    capacity: usize,
    cache: Mutex<HashMap<PageId, SharedPage>>,
    lock_manager: LockManager,
    catalog: Arc<Catalog>,
    wal: Arc<dyn WalSink>,
    rng: Mutex<StdRng>,
}

impl BufferPool {
    pub fn new(config: &DbConfig, catalog: Arc<Catalog>, wal: Arc<dyn WalSink>) -> Self {
        let rng = match config.eviction_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            capacity: config.pool_capacity,
            cache: Mutex::new(HashMap::new()),
            lock_manager: LockManager::new(config.lock_wait_unit, config.lock_max_rounds),
            catalog,
            wal,
            rng: Mutex::new(rng),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Fetch a page on behalf of `tid`, blocking (or aborting) in the lock
    /// manager first. A cache hit returns the shared cached object; a miss
    /// loads the page from its heap file, evicting while the pool is full.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> DbResult<SharedPage> {
        let mode = match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        };
        self.lock_manager.acquire(tid, pid, mode)?;

        let mut cache = self.cache.lock();
        while cache.len() >= self.capacity {
            self.evict_one(&mut cache)?;
        }
        if let Some(shared) = cache.get(&pid) {
            return Ok(shared.clone());
        }
        let file = self.catalog.table(pid.table_id)?;
        let page = file.read_page(pid)?;
        let shared: SharedPage = Arc::new(RwLock::new(page));
        cache.insert(pid, shared.clone());
        Ok(shared)
    }

    /// Pick a random cached page, flush it if dirty, and drop it. Fails
    /// with `NoEvictable` when nothing is cached.
    fn evict_one(&self, cache: &mut HashMap<PageId, SharedPage>) -> DbResult<()> {
        if cache.is_empty() {
            return Err(DbError::NoEvictable);
        }
        let victim = {
            let keys: Vec<PageId> = cache.keys().copied().collect();
            let idx = self.rng.lock().gen_range(0..keys.len());
            keys[idx]
        };
        log::debug!("evicting page {victim}");
        self.flush_entry(cache, victim)?;
        cache.remove(&victim);
        Ok(())
    }

    /// WAL-then-write for one cached entry, if dirty. The pool mutex is
    /// held by the caller, which keeps the log record and the page write
    /// ordered and prevents double flushes.
    fn flush_entry(&self, cache: &HashMap<PageId, SharedPage>, pid: PageId) -> DbResult<()> {
        let Some(shared) = cache.get(&pid) else {
            return Ok(());
        };
        let mut page = shared.write();
        let Some(dirtier) = page.is_dirty() else {
            return Ok(());
        };
        let before = page.before_image()?;
        self.wal.log_write(dirtier, &before, &page)?;
        self.wal.force()?;
        let file = self.catalog.table(pid.table_id)?;
        file.write_page(&page)?;
        page.mark_dirty(false, dirtier);
        Ok(())
    }

    /// Flush one page if it is cached and dirty; a no-op otherwise.
    pub fn flush_page(&self, pid: PageId) -> DbResult<()> {
        let cache = self.cache.lock();
        self.flush_entry(&cache, pid)
    }

    /// Flush every cached page.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let cache = self.cache.lock();
        let pids: Vec<PageId> = cache.keys().copied().collect();
        for pid in pids {
            self.flush_entry(&cache, pid)?;
        }
        Ok(())
    }

    /// Flush the pages `tid` has locked and dirtied.
    pub fn flush_pages(&self, tid: TransactionId) -> DbResult<()> {
        for pid in self.lock_manager.txn_pages(tid) {
            let cache = self.cache.lock();
            let dirty_by_tid = cache
                .get(&pid)
                .is_some_and(|shared| shared.read().is_dirty() == Some(tid));
            if dirty_by_tid {
                self.flush_entry(&cache, pid)?;
            }
        }
        Ok(())
    }

    /// Drop a page from the cache without flushing it.
    pub fn discard_page(&self, pid: PageId) {
        self.cache.lock().remove(&pid);
    }

    /// Insert a tuple into `table_id`'s heap file, then mark and cache the
    /// dirtied pages so future readers see the new versions.
    pub fn insert_tuple(&self, tid: TransactionId, table_id: i32, tuple: &mut Tuple) -> DbResult<()> {
        let file = self.catalog.table(table_id)?;
        let dirtied = file.insert_tuple(tid, tuple, self)?;
        self.absorb_dirty(tid, dirtied);
        Ok(())
    }

    /// Delete the tuple its record id points at.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &mut Tuple) -> DbResult<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotFound("tuple has no record id".into()))?;
        let file = self.catalog.table(rid.pid.table_id)?;
        let dirtied = file.delete_tuple(tid, tuple, self)?;
        self.absorb_dirty(tid, dirtied);
        Ok(())
    }

    fn absorb_dirty(&self, tid: TransactionId, dirtied: Vec<(PageId, SharedPage)>) {
        let mut cache = self.cache.lock();
        for (pid, shared) in dirtied {
            shared.write().mark_dirty(true, tid);
            cache.insert(pid, shared);
        }
    }

    /// Finish a transaction. On commit every touched page gets a forced
    /// WAL record and a fresh before-image; on abort every touched page is
    /// reloaded from disk, discarding the in-memory changes. Locks are
    /// released only after the log is safely down.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> DbResult<()> {
        let pages = self.lock_manager.txn_pages(tid);
        if commit {
            for pid in &pages {
                let cached = self.cache.lock().get(pid).cloned();
                if let Some(shared) = cached {
                    let mut page = shared.write();
                    let before = page.before_image()?;
                    self.wal.log_write(tid, &before, &page)?;
                    self.wal.force()?;
                    page.set_before_image();
                }
            }
            self.wal.log_commit(tid)?;
            self.wal.force()?;
        } else {
            for pid in &pages {
                let file = self.catalog.table(pid.table_id)?;
                let fresh = file.read_page(*pid)?;
                self.cache.lock().insert(*pid, Arc::new(RwLock::new(fresh)));
            }
            self.wal.log_abort(tid)?;
        }
        log::debug!(
            "{} {} over {} page(s)",
            tid,
            if commit { "committed" } else { "aborted" },
            pages.len()
        );
        for pid in pages {
            self.lock_manager.release(tid, pid);
        }
        self.lock_manager.transaction_complete(tid);
        Ok(())
    }

    /// Release one page lock without any cleanup. Unsafe for transaction
    /// correctness (it breaks two-phase locking); intended only for tests.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Peek at a cached page without touching locks. Inspection aid for
    /// tests and tooling, not part of the operator contract.
    pub fn cached_page(&self, pid: PageId) -> Option<SharedPage> {
        self.cache.lock().get(&pid).cloned()
    }

    /// Number of pages currently cached.
    pub fn num_cached(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_file::HeapFile;
    use crate::tuple::{Field, TupleDesc, Type};
    use crate::wal::{WalFile, WalRecord};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const PAGE_SIZE: usize = 64;

    struct Fixture {
        _dir: TempDir,
        pool: Arc<BufferPool>,
        wal: Arc<WalFile>,
        table_id: i32,
        desc: Arc<TupleDesc>,
    }

    /// A tiny database: one INT table with `pages` empty pages on disk.
    fn fixture(capacity: usize, pages: usize) -> Fixture {
        let dir = tempdir().unwrap();
        let desc = Arc::new(TupleDesc::unnamed(vec![Type::Int]));
        let file = Arc::new(
            HeapFile::open(dir.path().join("t.dat"), desc.clone(), PAGE_SIZE).unwrap(),
        );
        for page_no in 0..pages {
            let page = HeapPage::new(
                PageId::new(file.id(), page_no as i32),
                &HeapPage::empty_page_data(PAGE_SIZE),
                desc.clone(),
            )
            .unwrap();
            file.write_page(&page).unwrap();
        }
        let table_id = file.id();
        let catalog = Arc::new(Catalog::new());
        catalog.add_table(file, "t", "f0");
        let wal = Arc::new(WalFile::open(dir.path().join("t.wal")).unwrap());
        let config = DbConfig::default()
            .with_page_size(PAGE_SIZE)
            .with_pool_capacity(capacity)
            .with_lock_wait(Duration::from_millis(50), 2)
            .with_eviction_seed(7);
        let pool = Arc::new(BufferPool::new(&config, catalog, wal.clone()));
        Fixture {
            _dir: dir,
            pool,
            wal,
            table_id,
            desc,
        }
    }

    fn int_tuple(desc: &Arc<TupleDesc>, v: i32) -> Tuple {
        Tuple::new(desc.clone(), vec![Field::Int(v)]).unwrap()
    }

    #[test]
    fn repeated_get_returns_the_same_page_object() {
        let fx = fixture(4, 1);
        let tid = TransactionId::new();
        let pid = PageId::new(fx.table_id, 0);

        let a = fx.pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        let b = fx.pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn cache_never_exceeds_capacity() {
        let fx = fixture(2, 4);
        let tid = TransactionId::new();
        for page_no in 0..4 {
            fx.pool
                .get_page(tid, PageId::new(fx.table_id, page_no), Permissions::ReadOnly)
                .unwrap();
            assert!(fx.pool.num_cached() <= 2);
        }
    }

    #[test]
    fn capacity_zero_has_nothing_to_evict() {
        let fx = fixture(0, 1);
        let tid = TransactionId::new();
        let err = fx
            .pool
            .get_page(tid, PageId::new(fx.table_id, 0), Permissions::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, DbError::NoEvictable));
    }

    #[test]
    fn evicting_a_dirty_page_logs_then_writes() {
        let fx = fixture(1, 1);
        let tid = TransactionId::new();
        let p0 = PageId::new(fx.table_id, 0);

        let mut t = int_tuple(&fx.desc, 41);
        fx.pool.insert_tuple(tid, fx.table_id, &mut t).unwrap();
        assert!(fx.wal.records().unwrap().is_empty());

        // Touching a second page forces the dirty page out.
        fx.pool
            .get_page(tid, PageId::new(fx.table_id, 1), Permissions::ReadOnly)
            .unwrap();
        assert!(fx.pool.cached_page(p0).is_none());

        let records = fx.wal.records().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            WalRecord::PageWrite {
                tid: rec_tid,
                pid,
                before,
                after,
            } => {
                assert_eq!(*rec_tid, tid);
                assert_eq!(*pid, p0);
                assert_eq!(*before, HeapPage::empty_page_data(PAGE_SIZE));
                assert_ne!(*after, *before);
            }
            other => panic!("expected a page record, got {other:?}"),
        }

        // The disk image now carries the tuple.
        let on_disk = fx.pool.catalog().table(fx.table_id).unwrap().read_page(p0).unwrap();
        assert_eq!(on_disk.iter().count(), 1);
    }

    #[test]
    fn flush_page_is_a_noop_for_clean_and_absent_pages() {
        let fx = fixture(2, 1);
        let tid = TransactionId::new();
        let p0 = PageId::new(fx.table_id, 0);

        fx.pool.flush_page(p0).unwrap();
        fx.pool.get_page(tid, p0, Permissions::ReadOnly).unwrap();
        fx.pool.flush_page(p0).unwrap();
        assert!(fx.wal.records().unwrap().is_empty());
    }

    #[test]
    fn abort_restores_the_disk_visible_state() {
        let fx = fixture(4, 1);
        let t1 = TransactionId::new();
        let p0 = PageId::new(fx.table_id, 0);

        let mut t = int_tuple(&fx.desc, 5);
        fx.pool.insert_tuple(t1, fx.table_id, &mut t).unwrap();
        assert_eq!(fx.pool.cached_page(p0).unwrap().read().iter().count(), 1);

        fx.pool.transaction_complete(t1, false).unwrap();

        let cached = fx.pool.cached_page(p0).unwrap();
        let on_disk = fx.pool.catalog().table(fx.table_id).unwrap().read_page(p0).unwrap();
        assert_eq!(cached.read().serialize(), on_disk.serialize());
        assert_eq!(cached.read().iter().count(), 0);
        assert!(!fx.pool.holds_lock(t1, p0));

        // The abort is on the log.
        let records = fx.wal.records().unwrap();
        assert!(matches!(records.last(), Some(WalRecord::Abort { tid }) if *tid == t1));
    }

    #[test]
    fn commit_logs_images_and_resets_the_baseline() {
        let fx = fixture(4, 1);
        let t1 = TransactionId::new();
        let p0 = PageId::new(fx.table_id, 0);

        let mut t = int_tuple(&fx.desc, 9);
        fx.pool.insert_tuple(t1, fx.table_id, &mut t).unwrap();
        fx.pool.transaction_complete(t1, true).unwrap();
        assert!(!fx.pool.holds_lock(t1, p0));

        let records = fx.wal.records().unwrap();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], WalRecord::PageWrite { tid, .. } if *tid == t1));
        assert!(matches!(&records[1], WalRecord::Commit { tid } if *tid == t1));

        // A later abort by another transaction must not undo the commit.
        let t2 = TransactionId::new();
        let shared = fx.pool.get_page(t2, p0, Permissions::ReadWrite).unwrap();
        assert_eq!(shared.read().before_image().unwrap().iter().count(), 1);
    }

    #[test]
    fn flush_pages_writes_only_this_transactions_work() {
        let fx = fixture(4, 2);
        let t1 = TransactionId::new();
        let p1 = PageId::new(fx.table_id, 1);

        // Dirty page 1 directly through a write fetch.
        let shared = fx.pool.get_page(t1, p1, Permissions::ReadWrite).unwrap();
        {
            let mut page = shared.write();
            let mut t = int_tuple(&fx.desc, 3);
            page.insert_tuple(&mut t).unwrap();
            page.mark_dirty(true, t1);
        }
        fx.pool.flush_pages(t1).unwrap();

        let on_disk = fx.pool.catalog().table(fx.table_id).unwrap().read_page(p1).unwrap();
        assert_eq!(on_disk.iter().count(), 1);
        assert_eq!(shared.read().is_dirty(), None);
    }

    #[test]
    fn discard_drops_without_flushing() {
        let fx = fixture(4, 1);
        let t1 = TransactionId::new();
        let p0 = PageId::new(fx.table_id, 0);

        let mut t = int_tuple(&fx.desc, 8);
        fx.pool.insert_tuple(t1, fx.table_id, &mut t).unwrap();
        fx.pool.discard_page(p0);
        assert!(fx.pool.cached_page(p0).is_none());
        assert!(fx.wal.records().unwrap().is_empty());
        let on_disk = fx.pool.catalog().table(fx.table_id).unwrap().read_page(p0).unwrap();
        assert_eq!(on_disk.iter().count(), 0);
    }
}
