//! Query plan nodes and expressions, modeled as tagged variants.
//!
//! The external planner hands the engine one of these trees; the optimizer
//! rewrites it and the executor factory turns it into an operator tree.

use crate::errors::ExecutionError;
use crate::types::{Schema, Tuple, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

/// A scalar expression evaluated against one row (or a joined pair of rows).
///
/// `ColumnRef::tuple_idx` is 0 for the only/left input and 1 for the right
/// input of a join.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    ColumnRef {
        tuple_idx: usize,
        col_idx: usize,
    },
    Literal(Value),
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(col_idx: usize) -> Expression {
        Expression::ColumnRef {
            tuple_idx: 0,
            col_idx,
        }
    }

    pub fn join_column(tuple_idx: usize, col_idx: usize) -> Expression {
        Expression::ColumnRef { tuple_idx, col_idx }
    }

    pub fn literal(value: Value) -> Expression {
        Expression::Literal(value)
    }

    pub fn eq(left: Expression, right: Expression) -> Expression {
        Expression::Comparison {
            op: ComparisonOp::Eq,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Expression {
        Expression::Logic {
            op: LogicOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::ColumnRef { .. } | Expression::Literal(_) => vec![],
            Expression::Comparison { left, right, .. } | Expression::Logic { left, right, .. } => {
                vec![left, right]
            }
        }
    }

    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Result<Value, ExecutionError> {
        match self {
            Expression::ColumnRef { tuple_idx, col_idx } => {
                if *tuple_idx != 0 {
                    return Err(ExecutionError::Generic(
                        "join column reference evaluated against a single row".to_string(),
                    ));
                }
                if *col_idx >= schema.column_count() {
                    return Err(ExecutionError::ColumnNotFound(format!("#{col_idx}")));
                }
                Ok(tuple.value(*col_idx).clone())
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Comparison { op, left, right } => Ok(compare(
                *op,
                &left.evaluate(tuple, schema)?,
                &right.evaluate(tuple, schema)?,
            )),
            Expression::Logic { op, left, right } => Ok(combine(
                *op,
                &left.evaluate(tuple, schema)?,
                &right.evaluate(tuple, schema)?,
            )),
        }
    }

    pub fn evaluate_join(
        &self,
        left_tuple: &Tuple,
        left_schema: &Schema,
        right_tuple: &Tuple,
        right_schema: &Schema,
    ) -> Result<Value, ExecutionError> {
        match self {
            Expression::ColumnRef { tuple_idx, col_idx } => {
                let (tuple, schema) = if *tuple_idx == 0 {
                    (left_tuple, left_schema)
                } else {
                    (right_tuple, right_schema)
                };
                if *col_idx >= schema.column_count() {
                    return Err(ExecutionError::ColumnNotFound(format!("#{col_idx}")));
                }
                Ok(tuple.value(*col_idx).clone())
            }
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Comparison { op, left, right } => Ok(compare(
                *op,
                &left.evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?,
                &right.evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?,
            )),
            Expression::Logic { op, left, right } => Ok(combine(
                *op,
                &left.evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?,
                &right.evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?,
            )),
        }
    }
}

fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Value {
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    let ord = left.cmp(right);
    let result = match op {
        ComparisonOp::Eq => ord.is_eq(),
        ComparisonOp::NotEq => ord.is_ne(),
        ComparisonOp::Lt => ord.is_lt(),
        ComparisonOp::LtEq => ord.is_le(),
        ComparisonOp::Gt => ord.is_gt(),
        ComparisonOp::GtEq => ord.is_ge(),
    };
    Value::Bool(result)
}

fn combine(op: LogicOp, left: &Value, right: &Value) -> Value {
    let l = value_is_true(left);
    let r = value_is_true(right);
    Value::Bool(match op {
        LogicOp::And => l && r,
        LogicOp::Or => l || r,
    })
}

/// Filter semantics: NULL counts as false.
pub fn value_is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OrderByType {
    Default,
    Asc,
    Desc,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowFunctionType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Rank,
}

/// One window function with its partitioning and ordering.
#[derive(Debug, Clone)]
pub struct WindowFunctionSpec {
    pub func: WindowFunctionType,
    pub arg: Expression,
    pub partition_by: Vec<Expression>,
    pub order_by: Vec<(OrderByType, Expression)>,
}

/// An output column of the window operator: either a pass-through
/// expression or one of the window functions.
#[derive(Debug, Clone)]
pub enum WindowColumn {
    PassThrough(Expression),
    Function(WindowFunctionSpec),
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table: String,
        filter: Option<Expression>,
    },
    IndexScan {
        table: String,
        index_name: String,
        key: Value,
        filter: Option<Expression>,
    },
    /// Materializes literal rows; the usual child of Insert.
    Values {
        schema: Schema,
        rows: Vec<Vec<Expression>>,
    },
    Insert {
        table: String,
        child: Box<PlanNode>,
    },
    Update {
        table: String,
        child: Box<PlanNode>,
        /// One expression per column of the table schema.
        target_exprs: Vec<Expression>,
    },
    Delete {
        table: String,
        child: Box<PlanNode>,
    },
    Filter {
        child: Box<PlanNode>,
        predicate: Expression,
    },
    Projection {
        child: Box<PlanNode>,
        exprs: Vec<Expression>,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        predicate: Expression,
        join_type: JoinType,
    },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_keys: Vec<Expression>,
        right_keys: Vec<Expression>,
        join_type: JoinType,
    },
    Aggregation {
        child: Box<PlanNode>,
        group_bys: Vec<Expression>,
        aggregates: Vec<(AggregationType, Expression)>,
    },
    Sort {
        child: Box<PlanNode>,
        order_bys: Vec<(OrderByType, Expression)>,
    },
    Limit {
        child: Box<PlanNode>,
        limit: usize,
    },
    TopN {
        child: Box<PlanNode>,
        order_bys: Vec<(OrderByType, Expression)>,
        n: usize,
    },
    Window {
        child: Box<PlanNode>,
        columns: Vec<WindowColumn>,
    },
}

impl PlanNode {
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. } => {
                vec![]
            }
            PlanNode::Insert { child, .. }
            | PlanNode::Update { child, .. }
            | PlanNode::Delete { child, .. }
            | PlanNode::Filter { child, .. }
            | PlanNode::Projection { child, .. }
            | PlanNode::Aggregation { child, .. }
            | PlanNode::Sort { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::TopN { child, .. }
            | PlanNode::Window { child, .. } => vec![child],
            PlanNode::NestedLoopJoin { left, right, .. }
            | PlanNode::HashJoin { left, right, .. } => vec![left, right],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, DataType};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("a", DataType::Int),
            Column::new("b", DataType::Int),
        ])
    }

    #[test]
    fn comparison_evaluates_against_a_row() {
        let schema = schema();
        let tuple = Tuple::new(vec![Value::Int(5), Value::Int(9)]);
        let expr = Expression::eq(Expression::column(0), Expression::literal(Value::Int(5)));
        assert_eq!(expr.evaluate(&tuple, &schema).unwrap(), Value::Bool(true));

        let expr = Expression::Comparison {
            op: ComparisonOp::Lt,
            left: Box::new(Expression::column(1)),
            right: Box::new(Expression::column(0)),
        };
        assert_eq!(expr.evaluate(&tuple, &schema).unwrap(), Value::Bool(false));
    }

    #[test]
    fn null_comparisons_are_null_and_filter_false() {
        let schema = schema();
        let tuple = Tuple::new(vec![Value::Null, Value::Int(1)]);
        let expr = Expression::eq(Expression::column(0), Expression::literal(Value::Int(1)));
        let result = expr.evaluate(&tuple, &schema).unwrap();
        assert_eq!(result, Value::Null);
        assert!(!value_is_true(&result));
    }

    #[test]
    fn join_columns_pick_their_side() {
        let left_schema = schema();
        let right_schema = schema();
        let left = Tuple::new(vec![Value::Int(1), Value::Int(2)]);
        let right = Tuple::new(vec![Value::Int(3), Value::Int(1)]);
        let expr = Expression::eq(
            Expression::join_column(0, 0),
            Expression::join_column(1, 1),
        );
        assert_eq!(
            expr.evaluate_join(&left, &left_schema, &right, &right_schema)
                .unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn children_accessor_walks_the_tree() {
        let plan = PlanNode::Filter {
            child: Box::new(PlanNode::SeqScan {
                table: "t".to_string(),
                filter: None,
            }),
            predicate: Expression::literal(Value::Bool(true)),
        };
        assert_eq!(plan.children().len(), 1);
        assert!(plan.children()[0].children().is_empty());
    }
}
