//! The pull-based executor tree.
//!
//! Every operator implements [`Executor`]: `init` prepares (or re-prepares)
//! the operator, `next` pulls one `(tuple, rid)` at a time. The root is
//! pulled to exhaustion by [`execute_plan`].

mod aggregate;
mod dml;
mod join;
mod pipeline;
mod scan;
mod sort;
mod window;

use std::sync::Arc;

use stratum::{Rid, INVALID_PAGE_ID};

use crate::catalog::Catalog;
use crate::errors::ExecutionError;
use crate::plan::{Expression, PlanNode};
use crate::transaction::Transaction;
use crate::transaction_manager::TransactionManager;
use crate::types::{Column, DataType, Schema, Tuple, Value};

pub use aggregate::AggregationExecutor;
pub use dml::{DeleteExecutor, InsertExecutor, UpdateExecutor};
pub use join::{HashJoinExecutor, NestedLoopJoinExecutor};
pub use pipeline::{FilterExecutor, ProjectionExecutor, ValuesExecutor};
pub use scan::{IndexScanExecutor, SeqScanExecutor};
pub use sort::{LimitExecutor, SortExecutor, TopNExecutor};
pub use window::WindowFunctionExecutor;

/// Everything an executor needs to touch the engine.
pub struct ExecutorContext<'a> {
    pub catalog: &'a Catalog,
    pub txn_mgr: &'a TransactionManager,
    pub txn: Arc<Transaction>,
}

pub trait Executor {
    fn init(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError>;
    fn schema(&self) -> &Schema;
}

/// The RID attached to synthesized tuples (join outputs, counts, ...).
pub fn invalid_rid() -> Rid {
    Rid::new(INVALID_PAGE_ID, 0)
}

/// Output schema of the DML executors: a single row count.
pub(crate) fn count_schema() -> Schema {
    Schema::new(vec![Column::new("count", DataType::Int)])
}

/// Derives an output column for a computed expression.
pub(crate) fn derived_column(expr: &Expression, input: &Schema, ordinal: usize) -> Column {
    match expr {
        Expression::ColumnRef { tuple_idx: 0, col_idx } if *col_idx < input.column_count() => {
            input.column(*col_idx).clone()
        }
        Expression::Literal(value) => Column::new(
            format!("col{ordinal}"),
            match value {
                Value::Varchar(_) => DataType::Varchar,
                Value::Bool(_) => DataType::Bool,
                Value::Date(_) => DataType::Date,
                _ => DataType::Int,
            },
        ),
        Expression::Comparison { .. } | Expression::Logic { .. } => {
            Column::new(format!("col{ordinal}"), DataType::Bool)
        }
        _ => Column::new(format!("col{ordinal}"), DataType::Int),
    }
}

/// Builds the operator tree for a plan.
pub fn build_executor<'a>(
    plan: &'a PlanNode,
    ctx: &'a ExecutorContext<'a>,
) -> Result<Box<dyn Executor + 'a>, ExecutionError> {
    Ok(match plan {
        PlanNode::SeqScan { table, filter } => {
            Box::new(SeqScanExecutor::new(ctx, table, filter.as_ref())?)
        }
        PlanNode::IndexScan {
            table,
            index_name,
            key,
            filter,
        } => Box::new(IndexScanExecutor::new(
            ctx,
            table,
            index_name,
            key.clone(),
            filter.as_ref(),
        )?),
        PlanNode::Values { schema, rows } => Box::new(ValuesExecutor::new(schema.clone(), rows)),
        PlanNode::Insert { table, child } => Box::new(InsertExecutor::new(
            ctx,
            table,
            build_executor(child, ctx)?,
        )?),
        PlanNode::Update {
            table,
            child,
            target_exprs,
        } => Box::new(UpdateExecutor::new(
            ctx,
            table,
            build_executor(child, ctx)?,
            target_exprs,
        )?),
        PlanNode::Delete { table, child } => Box::new(DeleteExecutor::new(
            ctx,
            table,
            build_executor(child, ctx)?,
        )?),
        PlanNode::Filter { child, predicate } => {
            Box::new(FilterExecutor::new(build_executor(child, ctx)?, predicate))
        }
        PlanNode::Projection { child, exprs } => {
            Box::new(ProjectionExecutor::new(build_executor(child, ctx)?, exprs))
        }
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => Box::new(NestedLoopJoinExecutor::new(
            build_executor(left, ctx)?,
            build_executor(right, ctx)?,
            predicate,
            *join_type,
        )),
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
        } => Box::new(HashJoinExecutor::new(
            build_executor(left, ctx)?,
            build_executor(right, ctx)?,
            left_keys,
            right_keys,
            *join_type,
        )),
        PlanNode::Aggregation {
            child,
            group_bys,
            aggregates,
        } => Box::new(AggregationExecutor::new(
            build_executor(child, ctx)?,
            group_bys,
            aggregates,
        )),
        PlanNode::Sort { child, order_bys } => {
            Box::new(SortExecutor::new(build_executor(child, ctx)?, order_bys))
        }
        PlanNode::Limit { child, limit } => {
            Box::new(LimitExecutor::new(build_executor(child, ctx)?, *limit))
        }
        PlanNode::TopN {
            child,
            order_bys,
            n,
        } => Box::new(TopNExecutor::new(build_executor(child, ctx)?, order_bys, *n)),
        PlanNode::Window { child, columns } => Box::new(WindowFunctionExecutor::new(
            build_executor(child, ctx)?,
            columns,
        )),
    })
}

/// Wraps a plan in executors, initializes the root, and pulls it dry.
pub fn execute_plan(
    plan: &PlanNode,
    ctx: &ExecutorContext<'_>,
) -> Result<Vec<Tuple>, ExecutionError> {
    let mut root = build_executor(plan, ctx)?;
    root.init()?;
    let mut rows = Vec::new();
    while let Some((tuple, _rid)) = root.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}
