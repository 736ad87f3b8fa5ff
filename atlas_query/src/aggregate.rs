//! Aggregation. The aggregator is a strategy value (which operation) plus
//! an accumulator map keyed by the optional group field; the `Aggregate`
//! operator drains its child into one and then iterates the materialized
//! results. Integer columns support every operation; string columns
//! support COUNT only.

use crate::executor::{OpIterator, TupleIterator};
use plinth::tuple::{Field, Tuple, TupleDesc, Type};
use plinth::{DbError, DbResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Count,
    Avg,
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateOp::Min => write!(f, "MIN"),
            AggregateOp::Max => write!(f, "MAX"),
            AggregateOp::Sum => write!(f, "SUM"),
            AggregateOp::Count => write!(f, "COUNT"),
            AggregateOp::Avg => write!(f, "AVG"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AggState {
    acc: i64,
    count: i64,
}

/// Accumulates tuples group by group. `iterator` is a terminal operation:
/// it materializes a snapshot of the groups seen so far, and iterators
/// obtained earlier go stale rather than tracking later merges.
pub struct Aggregator {
    group_field: Option<usize>,
    group_type: Option<Type>,
    agg_field: usize,
    op: AggregateOp,
    groups: HashMap<Option<Field>, AggState>,
}

impl Aggregator {
    pub fn new(
        group_field: Option<usize>,
        group_type: Option<Type>,
        agg_field: usize,
        op: AggregateOp,
    ) -> Self {
        Self {
            group_field,
            group_type,
            agg_field,
            op,
            groups: HashMap::new(),
        }
    }

    /// Fold one tuple into its group's accumulator.
    pub fn merge_tuple_into_group(&mut self, tuple: &Tuple) -> DbResult<()> {
        let key = match self.group_field {
            Some(i) => Some(tuple.field(i)?.clone()),
            None => None,
        };
        let value = match (self.op, tuple.field(self.agg_field)?) {
            (AggregateOp::Count, _) => 0,
            (_, Field::Int(v)) => i64::from(*v),
            (op, field) => {
                return Err(DbError::SchemaMismatch(format!(
                    "{} is not defined over {}",
                    op,
                    field.field_type()
                )))
            }
        };

        match self.groups.get_mut(&key) {
            None => {
                let acc = if self.op == AggregateOp::Count { 0 } else { value };
                self.groups.insert(key, AggState { acc, count: 1 });
            }
            Some(state) => {
                state.count += 1;
                match self.op {
                    AggregateOp::Min => state.acc = state.acc.min(value),
                    AggregateOp::Max => state.acc = state.acc.max(value),
                    AggregateOp::Sum | AggregateOp::Avg => state.acc += value,
                    AggregateOp::Count => {}
                }
            }
        }
        Ok(())
    }

    /// Schema of the result tuples: (group, aggregate) or just (aggregate).
    pub fn result_desc(&self) -> Arc<TupleDesc> {
        let types = match self.group_type {
            Some(group_type) => vec![group_type, Type::Int],
            None => vec![Type::Int],
        };
        Arc::new(TupleDesc::unnamed(types))
    }

    /// Materialize the current group results as a restartable iterator.
    pub fn iterator(&self) -> DbResult<TupleIterator> {
        let desc = self.result_desc();
        let mut tuples = Vec::with_capacity(self.groups.len());
        for (key, state) in &self.groups {
            let value = match self.op {
                AggregateOp::Count => state.count,
                AggregateOp::Avg => state.acc / state.count,
                _ => state.acc,
            };
            let agg_field = Field::Int(value as i32);
            let fields = match key {
                Some(group) => vec![group.clone(), agg_field],
                None => vec![agg_field],
            };
            tuples.push(Tuple::new(desc.clone(), fields)?);
        }
        Ok(TupleIterator::new(desc, tuples))
    }
}

/// The aggregation operator: single aggregate column, optional single
/// group-by column.
pub struct Aggregate {
    child: Box<dyn OpIterator>,
    agg_field: usize,
    group_field: Option<usize>,
    op: AggregateOp,
    desc: Arc<TupleDesc>,
    results: Option<TupleIterator>,
}

impl std::fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("agg_field", &self.agg_field)
            .field("group_field", &self.group_field)
            .field("op", &self.op)
            .finish()
    }
}

impl Aggregate {
    pub fn new(
        child: Box<dyn OpIterator>,
        agg_field: usize,
        group_field: Option<usize>,
        op: AggregateOp,
    ) -> DbResult<Self> {
        let child_desc = child.tuple_desc();
        let agg_type = child_desc.field_type(agg_field)?;
        if matches!(agg_type, Type::String(_)) && op != AggregateOp::Count {
            return Err(DbError::SchemaMismatch(format!(
                "{} is not defined over {}",
                op, agg_type
            )));
        }

        let agg_name = match child_desc.field_name(agg_field)? {
            Some(name) => format!("{}({})", op, name),
            None => format!("{}(f{})", op, agg_field),
        };
        let desc = match group_field {
            Some(g) => Arc::new(TupleDesc::new(
                vec![child_desc.field_type(g)?, Type::Int],
                vec![
                    child_desc.field_name(g)?.map(str::to_string),
                    Some(agg_name),
                ],
            )),
            None => Arc::new(TupleDesc::new(vec![Type::Int], vec![Some(agg_name)])),
        };
        Ok(Self {
            child,
            agg_field,
            group_field,
            op,
            desc,
            results: None,
        })
    }

    fn build_results(&mut self) -> DbResult<TupleIterator> {
        let group_type = match self.group_field {
            Some(g) => Some(self.child.tuple_desc().field_type(g)?),
            None => None,
        };
        let mut aggregator =
            Aggregator::new(self.group_field, group_type, self.agg_field, self.op);
        while let Some(tuple) = self.child.next()? {
            aggregator.merge_tuple_into_group(&tuple)?;
        }
        let mut results = aggregator.iterator()?;
        results.open()?;
        Ok(results)
    }
}

impl OpIterator for Aggregate {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.results = Some(self.build_results()?);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        self.results
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("operator is not open".into()))?
            .next()
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.child.rewind()?;
        self.results
            .as_mut()
            .ok_or_else(|| DbError::InvalidState("operator is not open".into()))?
            .rewind()
    }

    fn close(&mut self) -> DbResult<()> {
        self.results = None;
        self.child.close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
