//! Window function executor.
//!
//! Each window function partitions the (optionally sorted) child rows and
//! accumulates an aggregate or a rank per partition. With an order-by the
//! running value is emitted per row; without one every row of a partition
//! receives the partition's final value.

use std::collections::HashMap;

use stratum::Rid;

use super::{derived_column, invalid_rid, Executor};
use crate::errors::ExecutionError;
use crate::plan::{WindowColumn, WindowFunctionSpec, WindowFunctionType};
use crate::types::{Column, DataType, Schema, Tuple, Value};

use super::sort::{compare_keys, evaluate_keys};

pub struct WindowFunctionExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    columns: &'a [WindowColumn],
    schema: Schema,
    results: std::vec::IntoIter<Tuple>,
}

impl<'a> WindowFunctionExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, columns: &'a [WindowColumn]) -> Self {
        let schema = Schema::new(
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| match col {
                    WindowColumn::PassThrough(expr) => derived_column(expr, child.schema(), i),
                    WindowColumn::Function(spec) => {
                        let name = match spec.func {
                            WindowFunctionType::CountStar => format!("count_star_{i}"),
                            WindowFunctionType::Count => format!("count_{i}"),
                            WindowFunctionType::Sum => format!("sum_{i}"),
                            WindowFunctionType::Min => format!("min_{i}"),
                            WindowFunctionType::Max => format!("max_{i}"),
                            WindowFunctionType::Rank => format!("rank_{i}"),
                        };
                        Column::new(name, DataType::Int)
                    }
                })
                .collect(),
        );
        Self {
            child,
            columns,
            schema,
            results: Vec::new().into_iter(),
        }
    }

    fn compute_function(
        spec: &WindowFunctionSpec,
        rows: &[Tuple],
        schema: &Schema,
    ) -> Result<Vec<Value>, ExecutionError> {
        let mut states: HashMap<Vec<Value>, Value> = HashMap::new();
        // Per partition: the previous rank key and the length of the
        // current tie run.
        let mut rank_runs: HashMap<Vec<Value>, (Vec<Value>, i64)> = HashMap::new();
        let mut running = Vec::with_capacity(rows.len());

        for tuple in rows {
            let key = spec
                .partition_by
                .iter()
                .map(|e| e.evaluate(tuple, schema))
                .collect::<Result<Vec<_>, _>>()?;
            let state = states.entry(key.clone()).or_insert_with(|| match spec.func {
                WindowFunctionType::CountStar => Value::Int(0),
                _ => Value::Null,
            });

            match spec.func {
                WindowFunctionType::CountStar => {
                    *state = state.add(&Value::Int(1));
                }
                WindowFunctionType::Count => {
                    let input = spec.arg.evaluate(tuple, schema)?;
                    if !input.is_null() {
                        *state = if state.is_null() {
                            Value::Int(1)
                        } else {
                            state.add(&Value::Int(1))
                        };
                    }
                }
                WindowFunctionType::Sum => {
                    let input = spec.arg.evaluate(tuple, schema)?;
                    if !input.is_null() {
                        *state = if state.is_null() {
                            input
                        } else {
                            state.add(&input)
                        };
                    }
                }
                WindowFunctionType::Min => {
                    let input = spec.arg.evaluate(tuple, schema)?;
                    if !input.is_null() && (state.is_null() || input < *state) {
                        *state = input;
                    }
                }
                WindowFunctionType::Max => {
                    let input = spec.arg.evaluate(tuple, schema)?;
                    if !input.is_null() && (state.is_null() || input > *state) {
                        *state = input;
                    }
                }
                WindowFunctionType::Rank => {
                    if spec.order_by.is_empty() {
                        return Err(ExecutionError::Generic(
                            "RANK requires an ORDER BY clause".to_string(),
                        ));
                    }
                    let order_key = evaluate_keys(&spec.order_by, tuple, schema)?;
                    match rank_runs.get_mut(&key) {
                        None => {
                            *state = Value::Int(1);
                            rank_runs.insert(key.clone(), (order_key, 1));
                        }
                        Some((prev_key, tie_run)) => {
                            if *prev_key == order_key {
                                // Ties share a rank; remember how many.
                                *tie_run += 1;
                            } else {
                                *state = state.add(&Value::Int(*tie_run));
                                *prev_key = order_key;
                                *tie_run = 1;
                            }
                        }
                    }
                }
            }

            if !spec.order_by.is_empty() {
                running.push(states[&key].clone());
            }
        }

        if spec.order_by.is_empty() {
            // Without an order-by every row sees the partition's final value.
            for tuple in rows {
                let key = spec
                    .partition_by
                    .iter()
                    .map(|e| e.evaluate(tuple, schema))
                    .collect::<Result<Vec<_>, _>>()?;
                running.push(states[&key].clone());
            }
        }
        Ok(running)
    }
}

impl Executor for WindowFunctionExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        let schema = self.child.schema().clone();

        let mut rows = Vec::new();
        while let Some((tuple, _)) = self.child.next()? {
            rows.push(tuple);
        }

        // Sort the whole input by the first window order-by, if any.
        let sort_spec = self.columns.iter().find_map(|c| match c {
            WindowColumn::Function(spec) if !spec.order_by.is_empty() => Some(spec),
            _ => None,
        });
        if let Some(spec) = sort_spec {
            let dirs: Vec<_> = spec.order_by.iter().map(|(d, _)| *d).collect();
            let mut keyed = Vec::with_capacity(rows.len());
            for tuple in rows {
                let keys = evaluate_keys(&spec.order_by, &tuple, &schema)?;
                keyed.push((keys, tuple));
            }
            keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, &dirs));
            rows = keyed.into_iter().map(|(_, t)| t).collect();
        }

        // Compute each window function column over the ordered rows.
        let mut function_values: Vec<Vec<Value>> = Vec::new();
        for column in self.columns {
            if let WindowColumn::Function(spec) = column {
                function_values.push(Self::compute_function(spec, &rows, &schema)?);
            }
        }

        let mut output = Vec::with_capacity(rows.len());
        for (row_idx, tuple) in rows.iter().enumerate() {
            let mut values = Vec::with_capacity(self.columns.len());
            let mut function_idx = 0;
            for column in self.columns {
                match column {
                    WindowColumn::PassThrough(expr) => {
                        values.push(expr.evaluate(tuple, &schema)?);
                    }
                    WindowColumn::Function(_) => {
                        values.push(function_values[function_idx][row_idx].clone());
                        function_idx += 1;
                    }
                }
            }
            output.push(Tuple::new(values));
        }
        self.results = output.into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        Ok(self.results.next().map(|t| (t, invalid_rid())))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
