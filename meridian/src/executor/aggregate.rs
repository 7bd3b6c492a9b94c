//! Hash aggregation.

use std::collections::HashMap;

use stratum::Rid;

use super::{derived_column, invalid_rid, Executor};
use crate::errors::ExecutionError;
use crate::plan::{AggregationType, Expression};
use crate::types::{Column, DataType, Schema, Tuple, Value};

/// The initial accumulator for one aggregate: `COUNT(*)` starts at zero,
/// everything else at NULL.
fn initial_value(agg: AggregationType) -> Value {
    match agg {
        AggregationType::CountStar => Value::Int(0),
        _ => Value::Null,
    }
}

/// Folds one input into an accumulator. NULL inputs are ignored by every
/// aggregate except `COUNT(*)`.
fn combine(agg: AggregationType, state: &Value, input: &Value) -> Value {
    match agg {
        AggregationType::CountStar => state.add(&Value::Int(1)),
        AggregationType::Count => {
            if input.is_null() {
                state.clone()
            } else if state.is_null() {
                Value::Int(1)
            } else {
                state.add(&Value::Int(1))
            }
        }
        AggregationType::Sum => {
            if input.is_null() {
                state.clone()
            } else if state.is_null() {
                input.clone()
            } else {
                state.add(input)
            }
        }
        AggregationType::Min => {
            if input.is_null() {
                state.clone()
            } else if state.is_null() || input < state {
                input.clone()
            } else {
                state.clone()
            }
        }
        AggregationType::Max => {
            if input.is_null() {
                state.clone()
            } else if state.is_null() || input > state {
                input.clone()
            } else {
                state.clone()
            }
        }
    }
}

/// Groups the child by the group-by expressions and folds each aggregate.
/// With no group-bys and an empty child, emits one row of initial values.
pub struct AggregationExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    group_bys: &'a [Expression],
    aggregates: &'a [(AggregationType, Expression)],
    schema: Schema,
    results: std::vec::IntoIter<Tuple>,
}

impl<'a> AggregationExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        group_bys: &'a [Expression],
        aggregates: &'a [(AggregationType, Expression)],
    ) -> Self {
        let mut columns: Vec<Column> = group_bys
            .iter()
            .enumerate()
            .map(|(i, expr)| derived_column(expr, child.schema(), i))
            .collect();
        for (i, (agg, _)) in aggregates.iter().enumerate() {
            let name = match agg {
                AggregationType::CountStar => format!("count_star_{i}"),
                AggregationType::Count => format!("count_{i}"),
                AggregationType::Sum => format!("sum_{i}"),
                AggregationType::Min => format!("min_{i}"),
                AggregationType::Max => format!("max_{i}"),
            };
            columns.push(Column::new(name, DataType::Int));
        }
        Self {
            child,
            group_bys,
            aggregates,
            schema: Schema::new(columns),
            results: Vec::new().into_iter(),
        }
    }
}

impl Executor for AggregationExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;

        let mut groups: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        let child_schema = self.child.schema().clone();
        let mut saw_rows = false;
        while let Some((tuple, _)) = self.child.next()? {
            saw_rows = true;
            let key = self
                .group_bys
                .iter()
                .map(|e| e.evaluate(&tuple, &child_schema))
                .collect::<Result<Vec<_>, _>>()?;
            let states = groups.entry(key).or_insert_with(|| {
                self.aggregates
                    .iter()
                    .map(|(agg, _)| initial_value(*agg))
                    .collect()
            });
            for (i, (agg, arg)) in self.aggregates.iter().enumerate() {
                let input = arg.evaluate(&tuple, &child_schema)?;
                states[i] = combine(*agg, &states[i], &input);
            }
        }

        if groups.is_empty() && self.group_bys.is_empty() && !saw_rows {
            groups.insert(
                vec![],
                self.aggregates
                    .iter()
                    .map(|(agg, _)| initial_value(*agg))
                    .collect(),
            );
        }

        let rows: Vec<Tuple> = groups
            .into_iter()
            .map(|(mut key, states)| {
                key.extend(states);
                Tuple::new(key)
            })
            .collect();
        self.results = rows.into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        Ok(self.results.next().map(|t| (t, invalid_rid())))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
