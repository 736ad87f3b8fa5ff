//! The operator capability. Operators are pull-based iterators: `open`
//! prepares state, `next` yields tuples until `None`, `rewind` restarts,
//! `close` tears down. Each operator declares the schema of what it emits.

use plinth::tuple::{Tuple, TupleDesc};
use plinth::{DbError, DbResult};
use std::sync::Arc;

pub trait OpIterator {
    fn open(&mut self) -> DbResult<()>;

    /// The next output tuple, or `None` when the operator is exhausted.
    /// Calling this on an unopened operator is an invalid-state error.
    fn next(&mut self) -> DbResult<Option<Tuple>>;

    fn rewind(&mut self) -> DbResult<()>;

    fn close(&mut self) -> DbResult<()>;

    /// Schema of the tuples this operator emits.
    fn tuple_desc(&self) -> &Arc<TupleDesc>;
}

/// An operator over an in-memory list of tuples. Aggregators hand their
/// materialized results out through this.
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    pos: Option<usize>,
}

impl TupleIterator {
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> Self {
        Self {
            desc,
            tuples,
            pos: None,
        }
    }
}

impl OpIterator for TupleIterator {
    fn open(&mut self) -> DbResult<()> {
        self.pos = Some(0);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        let pos = self
            .pos
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("iterator is not open".into()))?;
        if *pos >= self.tuples.len() {
            return Ok(None);
        }
        let tuple = self.tuples[*pos].clone();
        *pos += 1;
        Ok(Some(tuple))
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.close()?;
        self.open()
    }

    fn close(&mut self) -> DbResult<()> {
        if self.pos.take().is_none() {
            return Err(DbError::InvalidState("iterator is not open".into()));
        }
        Ok(())
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
