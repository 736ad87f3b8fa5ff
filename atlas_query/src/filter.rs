//! Relational selection: pass through the child's tuples that satisfy a
//! single-field comparison predicate.

use crate::executor::OpIterator;
use plinth::tuple::{Field, Tuple, TupleDesc};
use plinth::{DbError, DbResult};
use std::cmp::Ordering;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
}

/// Compares one tuple field against a constant operand.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: usize,
    op: PredicateOp,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: PredicateOp, operand: Field) -> Self {
        Self { field, op, operand }
    }

    pub fn eval(&self, tuple: &Tuple) -> DbResult<bool> {
        let value = tuple.field(self.field)?;
        let ordering = value.partial_cmp(&self.operand).ok_or_else(|| {
            DbError::SchemaMismatch(format!(
                "cannot compare {} against {}",
                value.field_type(),
                self.operand.field_type()
            ))
        })?;
        Ok(match self.op {
            PredicateOp::Equals => ordering == Ordering::Equal,
            PredicateOp::NotEquals => ordering != Ordering::Equal,
            PredicateOp::GreaterThan => ordering == Ordering::Greater,
            PredicateOp::GreaterThanOrEq => ordering != Ordering::Less,
            PredicateOp::LessThan => ordering == Ordering::Less,
            PredicateOp::LessThanOrEq => ordering != Ordering::Greater,
        })
    }
}

pub struct Filter {
    predicate: Predicate,
    child: Box<dyn OpIterator>,
}

impl Filter {
    pub fn new(predicate: Predicate, child: Box<dyn OpIterator>) -> Self {
        Self { predicate, child }
    }
}

impl OpIterator for Filter {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            if self.predicate.eval(&tuple)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()
    }

    fn close(&mut self) -> DbResult<()> {
        self.child.close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.child.tuple_desc()
    }
}
