//! The plan optimizer: a small set of tree-rewrite passes.
//!
//! Each pass walks the plan bottom-up and rewrites matching shapes:
//! filters merge into scans (or become index scans), and nested loop joins
//! over conjunctions of cross-side equalities become hash joins.

use crate::catalog::Catalog;
use crate::plan::{ComparisonOp, Expression, PlanNode};
use crate::types::Value;

pub fn optimize(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = merge_filter_scan(plan, catalog);
    let plan = seq_scan_as_index_scan(plan, catalog);
    nlj_as_hash_join(plan)
}

/// Rebuilds a node with every child passed through `f`.
fn map_children(plan: PlanNode, f: &dyn Fn(PlanNode) -> PlanNode) -> PlanNode {
    match plan {
        PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. } => plan,
        PlanNode::Insert { table, child } => PlanNode::Insert {
            table,
            child: Box::new(f(*child)),
        },
        PlanNode::Update {
            table,
            child,
            target_exprs,
        } => PlanNode::Update {
            table,
            child: Box::new(f(*child)),
            target_exprs,
        },
        PlanNode::Delete { table, child } => PlanNode::Delete {
            table,
            child: Box::new(f(*child)),
        },
        PlanNode::Filter { child, predicate } => PlanNode::Filter {
            child: Box::new(f(*child)),
            predicate,
        },
        PlanNode::Projection { child, exprs } => PlanNode::Projection {
            child: Box::new(f(*child)),
            exprs,
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => PlanNode::NestedLoopJoin {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            predicate,
            join_type,
        },
        PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
        } => PlanNode::HashJoin {
            left: Box::new(f(*left)),
            right: Box::new(f(*right)),
            left_keys,
            right_keys,
            join_type,
        },
        PlanNode::Aggregation {
            child,
            group_bys,
            aggregates,
        } => PlanNode::Aggregation {
            child: Box::new(f(*child)),
            group_bys,
            aggregates,
        },
        PlanNode::Sort { child, order_bys } => PlanNode::Sort {
            child: Box::new(f(*child)),
            order_bys,
        },
        PlanNode::Limit { child, limit } => PlanNode::Limit {
            child: Box::new(f(*child)),
            limit,
        },
        PlanNode::TopN {
            child,
            order_bys,
            n,
        } => PlanNode::TopN {
            child: Box::new(f(*child)),
            order_bys,
            n,
        },
        PlanNode::Window { child, columns } => PlanNode::Window {
            child: Box::new(f(*child)),
            columns,
        },
    }
}

/// Matches `column = constant` (either operand order) and returns the
/// column index and key. Hash indexes serve equality probes only.
fn match_column_eq_constant(predicate: &Expression) -> Option<(usize, Value)> {
    let Expression::Comparison {
        op: ComparisonOp::Eq,
        left,
        right,
    } = predicate
    else {
        return None;
    };
    match (left.as_ref(), right.as_ref()) {
        (
            Expression::ColumnRef {
                tuple_idx: 0,
                col_idx,
            },
            Expression::Literal(value),
        )
        | (
            Expression::Literal(value),
            Expression::ColumnRef {
                tuple_idx: 0,
                col_idx,
            },
        ) => Some((*col_idx, value.clone())),
        _ => None,
    }
}

/// Converts a scan with a `column = constant` predicate over an indexed
/// column to an index scan, keeping the predicate as the residual filter.
fn try_index_scan(table: &str, predicate: &Expression, catalog: &Catalog) -> Option<PlanNode> {
    let (col_idx, key) = match_column_eq_constant(predicate)?;
    let index = catalog.match_index(table, col_idx)?;
    Some(PlanNode::IndexScan {
        table: table.to_string(),
        index_name: index.name.clone(),
        key,
        filter: Some(predicate.clone()),
    })
}

/// `Filter(SeqScan)` becomes a scan with the predicate pushed down, or an
/// index scan when the predicate is an equality on an indexed column.
pub fn merge_filter_scan(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = map_children(plan, &|child| merge_filter_scan(child, catalog));
    match plan {
        PlanNode::Filter { child, predicate } => match *child {
            PlanNode::SeqScan {
                table,
                filter: None,
            } => {
                if let Some(index_scan) = try_index_scan(&table, &predicate, catalog) {
                    return index_scan;
                }
                PlanNode::SeqScan {
                    table,
                    filter: Some(predicate),
                }
            }
            other => PlanNode::Filter {
                child: Box::new(other),
                predicate,
            },
        },
        other => other,
    }
}

/// A standalone `SeqScan` whose pushed predicate is an indexable equality
/// becomes an `IndexScan`.
pub fn seq_scan_as_index_scan(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = map_children(plan, &|child| seq_scan_as_index_scan(child, catalog));
    match plan {
        PlanNode::SeqScan {
            table,
            filter: Some(predicate),
        } => {
            if let Some(index_scan) = try_index_scan(&table, &predicate, catalog) {
                return index_scan;
            }
            PlanNode::SeqScan {
                table,
                filter: Some(predicate),
            }
        }
        other => other,
    }
}

/// Collects the key expressions of a conjunction of cross-side column
/// equalities, in conjunction order. Returns false on any other shape.
fn extract_equi_conjunction(
    expr: &Expression,
    left_keys: &mut Vec<Expression>,
    right_keys: &mut Vec<Expression>,
) -> bool {
    match expr {
        Expression::Logic {
            op: crate::plan::LogicOp::And,
            left,
            right,
        } => {
            extract_equi_conjunction(left, left_keys, right_keys)
                && extract_equi_conjunction(right, left_keys, right_keys)
        }
        Expression::Comparison {
            op: ComparisonOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (
                Expression::ColumnRef {
                    tuple_idx: a_side,
                    col_idx: a_col,
                },
                Expression::ColumnRef {
                    tuple_idx: b_side,
                    col_idx: b_col,
                },
            ) if a_side != b_side => {
                let (left_col, right_col) = if *a_side == 0 {
                    (*a_col, *b_col)
                } else {
                    (*b_col, *a_col)
                };
                left_keys.push(Expression::join_column(0, left_col));
                right_keys.push(Expression::join_column(1, right_col));
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// A nested loop join whose predicate is a conjunction of equalities
/// between one column from each side becomes a hash join.
pub fn nlj_as_hash_join(plan: PlanNode) -> PlanNode {
    let plan = map_children(plan, &nlj_as_hash_join);
    match plan {
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => {
            let mut left_keys = Vec::new();
            let mut right_keys = Vec::new();
            if extract_equi_conjunction(&predicate, &mut left_keys, &mut right_keys) {
                PlanNode::HashJoin {
                    left,
                    right,
                    left_keys,
                    right_keys,
                    join_type,
                }
            } else {
                PlanNode::NestedLoopJoin {
                    left,
                    right,
                    predicate,
                    join_type,
                }
            }
        }
        other => other,
    }
}
