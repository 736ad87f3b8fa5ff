//! Sequential scan: the access path every other operator builds on. Pages
//! are fetched read-only through the buffer pool, one at a time, in page
//! order, so a scan's output order is slot order.

use crate::executor::OpIterator;
use plinth::heap_file::HeapFileIterator;
use plinth::tuple::{Tuple, TupleDesc};
use plinth::{Database, DbResult, TransactionId};
use std::sync::Arc;

pub struct SeqScan {
    iter: HeapFileIterator,
    desc: Arc<TupleDesc>,
}

impl SeqScan {
    pub fn new(db: &Database, tid: TransactionId, table_id: i32) -> DbResult<Self> {
        let file = db.catalog().table(table_id)?;
        let desc = file.desc().clone();
        let iter = file.iter(tid, db.buffer_pool().clone());
        Ok(Self { iter, desc })
    }
}

impl OpIterator for SeqScan {
    fn open(&mut self) -> DbResult<()> {
        self.iter.open()
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        self.iter.next()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.iter.rewind()
    }

    fn close(&mut self) -> DbResult<()> {
        self.iter.close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
