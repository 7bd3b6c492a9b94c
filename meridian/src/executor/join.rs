//! Join executors: nested loop and hash join, INNER and LEFT.

use std::collections::HashMap;

use stratum::Rid;

use super::{invalid_rid, Executor};
use crate::errors::ExecutionError;
use crate::plan::{value_is_true, Expression, JoinType};
use crate::types::{Schema, Tuple, Value};

fn joined_schema(left: &Schema, right: &Schema) -> Schema {
    let mut columns = left.columns.clone();
    columns.extend(right.columns.iter().cloned());
    Schema::new(columns)
}

fn joined_tuple(left: &Tuple, right: &Tuple) -> Tuple {
    let mut values = left.values.clone();
    values.extend(right.values.iter().cloned());
    Tuple::new(values)
}

fn null_padded(left: &Tuple, right_width: usize) -> Tuple {
    let mut values = left.values.clone();
    values.extend(std::iter::repeat(Value::Null).take(right_width));
    Tuple::new(values)
}

/// The classic double loop. The right child is re-initialized for every
/// left row; LEFT joins pad unmatched left rows with NULLs.
pub struct NestedLoopJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    predicate: &'a Expression,
    join_type: JoinType,
    schema: Schema,
    left_row: Option<Tuple>,
    left_matched: bool,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        predicate: &'a Expression,
        join_type: JoinType,
    ) -> Self {
        let schema = joined_schema(left.schema(), right.schema());
        Self {
            left,
            right,
            predicate,
            join_type,
            schema,
            left_row: None,
            left_matched: false,
        }
    }

    fn advance_left(&mut self) -> Result<bool, ExecutionError> {
        match self.left.next()? {
            Some((tuple, _)) => {
                self.left_row = Some(tuple);
                self.left_matched = false;
                self.right.init()?;
                Ok(true)
            }
            None => {
                self.left_row = None;
                Ok(false)
            }
        }
    }
}

impl Executor for NestedLoopJoinExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;
        self.left_row = None;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        loop {
            if self.left_row.is_none() && !self.advance_left()? {
                return Ok(None);
            }
            let left_row = self.left_row.clone().expect("left row present");

            while let Some((right_row, _)) = self.right.next()? {
                let keep = self.predicate.evaluate_join(
                    &left_row,
                    self.left.schema(),
                    &right_row,
                    self.right.schema(),
                )?;
                if value_is_true(&keep) {
                    self.left_matched = true;
                    return Ok(Some((joined_tuple(&left_row, &right_row), invalid_rid())));
                }
            }

            let emit_padded = self.join_type == JoinType::Left && !self.left_matched;
            let right_width = self.right.schema().column_count();
            self.left_row = None;
            if emit_padded {
                return Ok(Some((null_padded(&left_row, right_width), invalid_rid())));
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Builds a hash table over the right child, then streams the left child
/// through it. Matches are produced in build insertion order.
pub struct HashJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    left_keys: &'a [Expression],
    right_keys: &'a [Expression],
    join_type: JoinType,
    schema: Schema,
    hash_table: HashMap<Vec<Value>, Vec<Tuple>>,
    current_left: Option<Tuple>,
    current_matches: std::vec::IntoIter<Tuple>,
}

impl<'a> HashJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        left_keys: &'a [Expression],
        right_keys: &'a [Expression],
        join_type: JoinType,
    ) -> Self {
        let schema = joined_schema(left.schema(), right.schema());
        Self {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            schema,
            hash_table: HashMap::new(),
            current_left: None,
            current_matches: Vec::new().into_iter(),
        }
    }

    fn make_key(
        exprs: &[Expression],
        tuple: &Tuple,
        schema: &Schema,
    ) -> Result<Vec<Value>, ExecutionError> {
        exprs.iter().map(|e| e.evaluate(tuple, schema)).collect()
    }
}

impl Executor for HashJoinExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;
        self.hash_table.clear();
        self.current_left = None;
        self.current_matches = Vec::new().into_iter();

        while let Some((tuple, _)) = self.right.next()? {
            let key = Self::make_key(self.right_keys, &tuple, self.right.schema())?;
            self.hash_table.entry(key).or_default().push(tuple);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        loop {
            if let Some(right_row) = self.current_matches.next() {
                let left_row = self.current_left.as_ref().expect("probe row present");
                return Ok(Some((joined_tuple(left_row, &right_row), invalid_rid())));
            }

            let Some((left_row, _)) = self.left.next()? else {
                return Ok(None);
            };
            let key = Self::make_key(self.left_keys, &left_row, self.left.schema())?;
            match self.hash_table.get(&key) {
                Some(matches) => {
                    self.current_matches = matches.clone().into_iter();
                    self.current_left = Some(left_row);
                }
                None if self.join_type == JoinType::Left => {
                    let padded = null_padded(&left_row, self.right.schema().column_count());
                    return Ok(Some((padded, invalid_rid())));
                }
                None => {}
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
