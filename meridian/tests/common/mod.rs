//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use meridian::catalog::Catalog;
use meridian::errors::ExecutionError;
use meridian::executor::{execute_plan, ExecutorContext};
use meridian::plan::{Expression, PlanNode};
use meridian::transaction::{IsolationLevel, Transaction};
use meridian::transaction_manager::TransactionManager;
use meridian::types::{Column, DataType, Schema, Tuple, Value};
use stratum::disk::DiskManager;
use stratum::BufferPoolManager;

pub struct TestDb {
    _dir: tempfile::TempDir,
    pub catalog: Catalog,
    pub txn_mgr: TransactionManager,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dm = DiskManager::open(dir.path().join("engine.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(256, 2, dm));
        Self {
            _dir: dir,
            catalog: Catalog::new(bpm),
            txn_mgr: TransactionManager::new(),
        }
    }

    pub fn begin(&self) -> Arc<Transaction> {
        self.txn_mgr.begin(IsolationLevel::SnapshotIsolation)
    }

    pub fn ctx(&self, txn: &Arc<Transaction>) -> ExecutorContext<'_> {
        ExecutorContext {
            catalog: &self.catalog,
            txn_mgr: &self.txn_mgr,
            txn: Arc::clone(txn),
        }
    }

    /// Creates a two-int-column table `(id, x)`.
    pub fn create_id_x_table(&self, name: &str) {
        self.catalog
            .create_table(
                name,
                Schema::new(vec![
                    Column::new("id", DataType::Int),
                    Column::new("x", DataType::Int),
                ]),
            )
            .unwrap();
    }
}

pub fn int_literal_row(values: &[i64]) -> Vec<Expression> {
    values
        .iter()
        .map(|v| Expression::literal(Value::Int(*v)))
        .collect()
}

/// Runs an Insert plan fed by literal rows; returns the reported count.
pub fn insert_int_rows(
    db: &TestDb,
    txn: &Arc<Transaction>,
    table: &str,
    rows: &[&[i64]],
) -> Result<i64, ExecutionError> {
    let schema = db.catalog.table(table).unwrap().schema.clone();
    let plan = PlanNode::Insert {
        table: table.to_string(),
        child: Box::new(PlanNode::Values {
            schema,
            rows: rows.iter().map(|r| int_literal_row(r)).collect(),
        }),
    };
    let result = execute_plan(&plan, &db.ctx(txn))?;
    match result[0].value(0) {
        Value::Int(count) => Ok(*count),
        other => panic!("unexpected insert result {other:?}"),
    }
}

/// Full scan, returned as value rows sorted for deterministic comparison.
pub fn scan_all(db: &TestDb, txn: &Arc<Transaction>, table: &str) -> Vec<Vec<Value>> {
    let plan = PlanNode::SeqScan {
        table: table.to_string(),
        filter: None,
    };
    let mut rows: Vec<Vec<Value>> = execute_plan(&plan, &db.ctx(txn))
        .unwrap()
        .into_iter()
        .map(|t| t.values)
        .collect();
    rows.sort();
    rows
}

pub fn int_rows(rows: &[&[i64]]) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = rows
        .iter()
        .map(|r| r.iter().map(|v| Value::Int(*v)).collect())
        .collect();
    rows.sort();
    rows
}

/// Builds a tuple of int values (for direct assertions).
#[allow(dead_code)]
pub fn int_tuple(values: &[i64]) -> Tuple {
    Tuple::new(values.iter().map(|v| Value::Int(*v)).collect())
}
