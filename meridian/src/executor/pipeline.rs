//! Row-at-a-time operators: values, filter, projection.

use stratum::Rid;

use super::{derived_column, invalid_rid, Executor};
use crate::errors::ExecutionError;
use crate::plan::{value_is_true, Expression};
use crate::types::{Schema, Tuple};

/// Materializes literal rows; the usual source below an insert.
pub struct ValuesExecutor<'a> {
    schema: Schema,
    rows: &'a [Vec<Expression>],
    cursor: usize,
}

impl<'a> ValuesExecutor<'a> {
    pub fn new(schema: Schema, rows: &'a [Vec<Expression>]) -> Self {
        Self {
            schema,
            rows,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let empty = Tuple::new(vec![]);
        let empty_schema = Schema::default();
        let values = row
            .iter()
            .map(|expr| expr.evaluate(&empty, &empty_schema))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some((Tuple::new(values), invalid_rid())))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct FilterExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    predicate: &'a Expression,
}

impl<'a> FilterExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, predicate: &'a Expression) -> Self {
        Self { child, predicate }
    }
}

impl Executor for FilterExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        while let Some((tuple, rid)) = self.child.next()? {
            if value_is_true(&self.predicate.evaluate(&tuple, self.child.schema())?) {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

pub struct ProjectionExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    exprs: &'a [Expression],
    schema: Schema,
}

impl<'a> ProjectionExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, exprs: &'a [Expression]) -> Self {
        let schema = Schema::new(
            exprs
                .iter()
                .enumerate()
                .map(|(i, expr)| derived_column(expr, child.schema(), i))
                .collect(),
        );
        Self {
            child,
            exprs,
            schema,
        }
    }
}

impl Executor for ProjectionExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        let Some((tuple, rid)) = self.child.next()? else {
            return Ok(None);
        };
        let values = self
            .exprs
            .iter()
            .map(|expr| expr.evaluate(&tuple, self.child.schema()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some((Tuple::new(values), rid)))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
