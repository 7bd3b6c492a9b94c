//! Write-path executors: insert, update, delete.
//!
//! All three stamp tuples with the transaction's temporary timestamp and
//! record pre-images as undo logs; write-write conflicts taint the
//! transaction and surface as errors.

use std::sync::Arc;

use stratum::page::TupleMeta;

use super::{count_schema, invalid_rid, Executor, ExecutorContext};
use crate::catalog::{index_key, TableInfo};
use crate::errors::ExecutionError;
use crate::mvcc::reconstruct_tuple;
use crate::plan::Expression;
use crate::transaction::{is_txn_ts, Transaction, UndoLog};
use crate::types::{Schema, Tuple, Value};

/// First-writer-wins conflict detection: the tuple is being rewritten by
/// another in-flight transaction, or was committed after our snapshot.
fn is_write_write_conflict(meta: &TupleMeta, txn: &Transaction) -> bool {
    if is_txn_ts(meta.ts) {
        meta.ts != txn.id()
    } else {
        meta.ts > txn.read_ts()
    }
}

fn count_tuple(count: i64) -> Tuple {
    Tuple::new(vec![Value::Int(count)])
}

/// Consumes the child, appending every row to the table heap and all of its
/// indexes. Emits a single count row.
pub struct InsertExecutor<'a> {
    ctx: &'a ExecutorContext<'a>,
    table_info: Arc<TableInfo>,
    child: Box<dyn Executor + 'a>,
    schema: Schema,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext<'a>,
        table: &str,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        Ok(Self {
            ctx,
            table_info: ctx.catalog.table(table)?,
            child,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for InsertExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, stratum::Rid)>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let txn = &self.ctx.txn;
        let table = &self.table_info;
        let primary = self.ctx.catalog.primary_index(&table.name);
        let mut count = 0i64;

        while let Some((tuple, _)) = self.child.next()? {
            if let Some(primary) = &primary {
                if let Some(key) = index_key(tuple.value(primary.key_column)) {
                    if primary.index.get(&key)?.is_some() {
                        txn.set_tainted();
                        return Err(ExecutionError::PrimaryKeyViolation(table.name.clone()));
                    }
                }
            }

            let meta = TupleMeta::new(txn.temp_ts(), false);
            let rid = table.heap.insert_tuple(meta, &tuple.serialize())?;
            txn.append_write_set(table.oid, rid);

            for index_info in self.ctx.catalog.indexes_for_table(&table.name) {
                if let Some(key) = index_key(tuple.value(index_info.key_column)) {
                    if !index_info.index.insert(&key, &rid)? {
                        txn.set_tainted();
                        return Err(ExecutionError::PrimaryKeyViolation(table.name.clone()));
                    }
                }
            }
            count += 1;
        }
        Ok(Some((count_tuple(count), invalid_rid())))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Marks the child's rows deleted, logging the full pre-image of each row
/// that this transaction did not itself create.
pub struct DeleteExecutor<'a> {
    ctx: &'a ExecutorContext<'a>,
    table_info: Arc<TableInfo>,
    child: Box<dyn Executor + 'a>,
    schema: Schema,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext<'a>,
        table: &str,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        Ok(Self {
            ctx,
            table_info: ctx.catalog.table(table)?,
            child,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for DeleteExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, stratum::Rid)>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let txn = &self.ctx.txn;
        let table = &self.table_info;

        let mut buffer = Vec::new();
        while let Some(row) = self.child.next()? {
            buffer.push(row);
        }

        for (_, rid) in &buffer {
            let meta = table.heap.tuple_meta(*rid)?;
            if is_write_write_conflict(&meta, txn) {
                txn.set_tainted();
                return Err(ExecutionError::WriteWriteConflict);
            }
        }

        let column_count = table.schema.column_count();
        let mut count = 0i64;
        for (tuple, rid) in buffer {
            let meta = table.heap.tuple_meta(rid)?;
            // A row this transaction created has no pre-image to preserve.
            if meta.ts != txn.temp_ts() {
                let log = UndoLog {
                    is_deleted: meta.is_deleted,
                    modified_fields: vec![true; column_count],
                    tuple,
                    ts: meta.ts,
                    prev_version: self.ctx.txn_mgr.undo_link(rid),
                };
                let link = txn.append_undo_log(log);
                self.ctx.txn_mgr.update_undo_link(rid, Some(link));
            }
            table
                .heap
                .update_tuple_meta(TupleMeta::new(txn.temp_ts(), true), rid)?;
            txn.append_write_set(table.oid, rid);
            count += 1;
        }
        Ok(Some((count_tuple(count), invalid_rid())))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Rewrites the child's rows in place. The undo log captures only the
/// columns that actually changed; a repeat update by the same transaction
/// merges into its existing log so at most one log per RID exists.
pub struct UpdateExecutor<'a> {
    ctx: &'a ExecutorContext<'a>,
    table_info: Arc<TableInfo>,
    child: Box<dyn Executor + 'a>,
    target_exprs: &'a [Expression],
    schema: Schema,
    done: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext<'a>,
        table: &str,
        child: Box<dyn Executor + 'a>,
        target_exprs: &'a [Expression],
    ) -> Result<Self, ExecutionError> {
        Ok(Self {
            ctx,
            table_info: ctx.catalog.table(table)?,
            child,
            target_exprs,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for UpdateExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, stratum::Rid)>, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let txn = &self.ctx.txn;
        let txn_mgr = self.ctx.txn_mgr;
        let table = &self.table_info;
        let column_count = table.schema.column_count();

        let mut buffer = Vec::new();
        while let Some(row) = self.child.next()? {
            buffer.push(row);
        }

        for (_, rid) in &buffer {
            let meta = table.heap.tuple_meta(*rid)?;
            if is_write_write_conflict(&meta, txn) {
                txn.set_tainted();
                return Err(ExecutionError::WriteWriteConflict);
            }
        }

        let mut count = 0i64;
        for (old_tuple, rid) in buffer {
            let meta = table.heap.tuple_meta(rid)?;
            let mut new_values = Vec::with_capacity(column_count);
            for expr in self.target_exprs {
                new_values.push(expr.evaluate(&old_tuple, &table.schema)?);
            }

            if meta.ts != txn.temp_ts() {
                // First write by this transaction: log the changed columns.
                let mut modified_fields = vec![false; column_count];
                let mut undo_values = Vec::new();
                for i in 0..column_count {
                    if new_values[i] != *old_tuple.value(i) {
                        modified_fields[i] = true;
                        undo_values.push(old_tuple.value(i).clone());
                    }
                }
                if modified_fields.iter().any(|m| *m) {
                    let log = UndoLog {
                        is_deleted: false,
                        modified_fields,
                        tuple: Tuple::new(undo_values),
                        ts: meta.ts,
                        prev_version: txn_mgr.undo_link(rid),
                    };
                    let link = txn.append_undo_log(log);
                    txn_mgr.update_undo_link(rid, Some(link));
                }
            } else if let Some(link) = txn_mgr.undo_link(rid).filter(|l| l.prev_txn == txn.id()) {
                // Repeat write: rebuild the existing log against the
                // original pre-image so it still reflects read_ts state.
                let original_log = txn_mgr.undo_log(link).ok_or_else(|| {
                    ExecutionError::Generic("dangling undo link on repeat update".to_string())
                })?;
                let origin_tuple =
                    reconstruct_tuple(&old_tuple, meta, std::slice::from_ref(&original_log))
                        .ok_or_else(|| {
                            ExecutionError::Generic(
                                "repeat update over a deleted pre-image".to_string(),
                            )
                        })?;

                let mut modified_fields = vec![false; column_count];
                let mut undo_values = Vec::new();
                for i in 0..column_count {
                    let origin_value = origin_tuple.value(i);
                    if new_values[i] == *origin_value && !original_log.modified_fields[i] {
                        continue;
                    }
                    modified_fields[i] = true;
                    undo_values.push(origin_value.clone());
                }
                if modified_fields.iter().any(|m| *m) {
                    let merged = UndoLog {
                        is_deleted: false,
                        modified_fields,
                        tuple: Tuple::new(undo_values),
                        ts: original_log.ts,
                        prev_version: original_log.prev_version,
                    };
                    txn.modify_undo_log(link.prev_log_idx, merged);
                }
            }

            let new_tuple = Tuple::new(new_values);
            table.heap.update_tuple_in_place(
                TupleMeta::new(txn.temp_ts(), false),
                &new_tuple.serialize(),
                rid,
            )?;
            txn.append_write_set(table.oid, rid);
            count += 1;
        }
        Ok(Some((count_tuple(count), invalid_rid())))
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
