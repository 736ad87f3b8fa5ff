//! Insert and delete. Both drain their child through the buffer pool on
//! behalf of one transaction and emit a single one-field tuple carrying
//! the number of rows affected.

use crate::executor::OpIterator;
use plinth::buffer_pool::BufferPool;
use plinth::tuple::{Field, Tuple, TupleDesc, Type};
use plinth::{Database, DbError, DbResult, TransactionId};
use std::sync::Arc;

fn count_desc() -> Arc<TupleDesc> {
    Arc::new(TupleDesc::unnamed(vec![Type::Int]))
}

pub struct Insert {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    table_id: i32,
    child: Box<dyn OpIterator>,
    desc: Arc<TupleDesc>,
    state: Option<bool>, // Some(done) once opened
}

impl Insert {
    /// Fails up front if the child's schema does not match the table's.
    pub fn new(
        db: &Database,
        tid: TransactionId,
        child: Box<dyn OpIterator>,
        table_id: i32,
    ) -> DbResult<Self> {
        let table_desc = db.catalog().tuple_desc(table_id)?;
        if **child.tuple_desc() != *table_desc {
            return Err(DbError::SchemaMismatch(format!(
                "child emits ({}), table {} stores ({})",
                child.tuple_desc(),
                table_id,
                table_desc
            )));
        }
        Ok(Self {
            pool: db.buffer_pool().clone(),
            tid,
            table_id,
            child,
            desc: count_desc(),
            state: None,
        })
    }
}

impl OpIterator for Insert {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.state = Some(false);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        let done = self
            .state
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("operator is not open".into()))?;
        if *done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(mut tuple) = self.child.next()? {
            self.pool.insert_tuple(self.tid, self.table_id, &mut tuple)?;
            count += 1;
        }
        *done = true;
        log::debug!("{}: inserted {} row(s) into table {}", self.tid, count, self.table_id);
        Ok(Some(Tuple::new(self.desc.clone(), vec![Field::Int(count)])?))
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()?;
        self.state = Some(false);
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        self.state = None;
        self.child.close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}

pub struct Delete {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    child: Box<dyn OpIterator>,
    desc: Arc<TupleDesc>,
    state: Option<bool>,
}

impl Delete {
    pub fn new(db: &Database, tid: TransactionId, child: Box<dyn OpIterator>) -> Self {
        Self {
            pool: db.buffer_pool().clone(),
            tid,
            child,
            desc: count_desc(),
            state: None,
        }
    }
}

impl OpIterator for Delete {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.state = Some(false);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        let done = self
            .state
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("operator is not open".into()))?;
        if *done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(mut tuple) = self.child.next()? {
            self.pool.delete_tuple(self.tid, &mut tuple)?;
            count += 1;
        }
        *done = true;
        log::debug!("{}: deleted {} row(s)", self.tid, count);
        Ok(Some(Tuple::new(self.desc.clone(), vec![Field::Int(count)])?))
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()?;
        self.state = Some(false);
        Ok(())
    }

    fn close(&mut self) -> DbResult<()> {
        self.state = None;
        self.child.close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
