#![allow(dead_code)]

use plinth::page::HeapPage;
use plinth::tuple::{Field, Tuple, TupleDesc, Type};
use plinth::wal::{Lsn, WalFile, WalSink};
use plinth::{Database, DbConfig, DbResult, PageId, TransactionId};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};

/// A scratch database rooted in a temp directory that lives as long as the
/// handle does.
pub struct TestDb {
    pub dir: TempDir,
    pub db: Database,
}

pub fn open_db(config: DbConfig) -> TestDb {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path(), config).unwrap();
    TestDb { dir, db }
}

/// Like `open_db`, but every WAL call is mirrored into an event list the
/// test can assert ordering against.
pub fn open_db_recording(config: DbConfig) -> (TestDb, Arc<RecordingWal>) {
    let dir = tempdir().unwrap();
    let inner = WalFile::open(dir.path().join("db.wal")).unwrap();
    let wal = Arc::new(RecordingWal {
        inner,
        events: Mutex::new(Vec::new()),
    });
    let db = Database::new(config, wal.clone());
    (TestDb { dir, db }, wal)
}

impl TestDb {
    /// Create a table whose backing file starts with `empty_pages` zeroed
    /// pages already on disk.
    pub fn create_table(&self, name: &str, desc: Arc<TupleDesc>, empty_pages: usize) -> i32 {
        let path = self.dir.path().join(format!("{name}.dat"));
        let table_id = self.db.add_table(&path, name, desc.clone(), "f0").unwrap();
        let file = self.db.catalog().table(table_id).unwrap();
        for page_no in 0..empty_pages {
            let page = HeapPage::new(
                PageId::new(table_id, page_no as i32),
                &HeapPage::empty_page_data(self.db.config().page_size),
                desc.clone(),
            )
            .unwrap();
            file.write_page(&page).unwrap();
        }
        table_id
    }
}

pub fn int_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::new(vec![Type::Int], vec![Some("v".into())]))
}

pub fn int_row(desc: &Arc<TupleDesc>, v: i32) -> Tuple {
    Tuple::new(desc.clone(), vec![Field::Int(v)]).unwrap()
}

/// Drain a fresh sequential scan of `table_id` into the INT values of
/// column 0, in scan order.
pub fn scan_ints(db: &Database, tid: TransactionId, table_id: i32) -> Vec<i32> {
    use atlas_query::{OpIterator, SeqScan};

    let mut scan = SeqScan::new(db, tid, table_id).unwrap();
    scan.open().unwrap();
    let mut out = Vec::new();
    while let Some(t) = scan.next().unwrap() {
        match t.field(0).unwrap() {
            Field::Int(v) => out.push(*v),
            other => panic!("expected an int column, got {other:?}"),
        }
    }
    scan.close().unwrap();
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalEvent {
    Write(TransactionId, PageId),
    Commit(TransactionId),
    Abort(TransactionId),
    Force,
}

/// A log sink that forwards to a real `WalFile` while keeping an in-memory
/// trace of every call.
pub struct RecordingWal {
    inner: WalFile,
    events: Mutex<Vec<WalEvent>>,
}

impl RecordingWal {
    pub fn events(&self) -> Vec<WalEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl WalSink for RecordingWal {
    fn log_write(&self, tid: TransactionId, before: &HeapPage, after: &HeapPage) -> DbResult<Lsn> {
        self.events
            .lock()
            .unwrap()
            .push(WalEvent::Write(tid, after.pid()));
        self.inner.log_write(tid, before, after)
    }

    fn log_commit(&self, tid: TransactionId) -> DbResult<Lsn> {
        self.events.lock().unwrap().push(WalEvent::Commit(tid));
        self.inner.log_commit(tid)
    }

    fn log_abort(&self, tid: TransactionId) -> DbResult<Lsn> {
        self.events.lock().unwrap().push(WalEvent::Abort(tid));
        self.inner.log_abort(tid)
    }

    fn force(&self) -> DbResult<()> {
        self.events.lock().unwrap().push(WalEvent::Force);
        self.inner.force()
    }
}
