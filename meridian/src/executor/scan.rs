//! Table and index scans, both MVCC-aware.

use std::sync::Arc;

use stratum::{PageId, Rid, INVALID_PAGE_ID};

use super::{Executor, ExecutorContext};
use crate::catalog::{index_key, IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::mvcc::visible_tuple;
use crate::plan::{value_is_true, Expression};
use crate::types::{Schema, Tuple, Value};

/// Walks the heap in page order, resolving each row to the version visible
/// at the transaction's read timestamp and applying the pushed-down filter.
pub struct SeqScanExecutor<'a> {
    ctx: &'a ExecutorContext<'a>,
    table_info: Arc<TableInfo>,
    filter: Option<&'a Expression>,
    current_page_id: PageId,
    current_slot: u16,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext<'a>,
        table: &str,
        filter: Option<&'a Expression>,
    ) -> Result<Self, ExecutionError> {
        let table_info = ctx.catalog.table(table)?;
        Ok(Self {
            ctx,
            current_page_id: table_info.heap.first_page_id(),
            table_info,
            filter,
            current_slot: 0,
        })
    }
}

impl Executor for SeqScanExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.current_page_id = self.table_info.heap.first_page_id();
        self.current_slot = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let bpm = self.table_info.heap.buffer_pool();
            let guard = bpm.acquire_page_read(self.current_page_id)?;
            if self.current_slot >= guard.tuple_count() {
                self.current_page_id = guard.next_page_id();
                self.current_slot = 0;
                continue;
            }
            let slot = self.current_slot;
            self.current_slot += 1;

            let Some((meta, payload)) = guard.table_tuple(slot) else {
                continue;
            };
            let rid = Rid::new(guard.id, slot);
            let base = Tuple::deserialize(payload, &self.table_info.schema)?;
            drop(guard);

            let Some(tuple) = visible_tuple(
                self.ctx.txn_mgr,
                &self.ctx.txn,
                meta,
                &base,
                rid,
            ) else {
                continue;
            };
            if let Some(predicate) = self.filter {
                if !value_is_true(&predicate.evaluate(&tuple, &self.table_info.schema)?) {
                    continue;
                }
            }
            return Ok(Some((tuple, rid)));
        }
    }

    fn schema(&self) -> &Schema {
        &self.table_info.schema
    }
}

/// Probes a hash index with the plan's constant key, fetches the matching
/// rows, and applies the residual filter.
pub struct IndexScanExecutor<'a> {
    ctx: &'a ExecutorContext<'a>,
    table_info: Arc<TableInfo>,
    index_info: Arc<IndexInfo>,
    key: Value,
    filter: Option<&'a Expression>,
    matches: Vec<Rid>,
    cursor: usize,
}

impl<'a> IndexScanExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext<'a>,
        table: &str,
        index_name: &str,
        key: Value,
        filter: Option<&'a Expression>,
    ) -> Result<Self, ExecutionError> {
        let table_info = ctx.catalog.table(table)?;
        let index_info = ctx.catalog.index(index_name)?;
        Ok(Self {
            ctx,
            table_info,
            index_info,
            key,
            filter,
            matches: Vec::new(),
            cursor: 0,
        })
    }
}

impl Executor for IndexScanExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.matches.clear();
        self.cursor = 0;
        if let Some(key) = index_key(&self.key) {
            if let Some(rid) = self.index_info.index.get(&key)? {
                self.matches.push(rid);
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        while self.cursor < self.matches.len() {
            let rid = self.matches[self.cursor];
            self.cursor += 1;

            let (meta, payload) = self.table_info.heap.tuple(rid)?;
            let base = Tuple::deserialize(&payload, &self.table_info.schema)?;
            let Some(tuple) = visible_tuple(
                self.ctx.txn_mgr,
                &self.ctx.txn,
                meta,
                &base,
                rid,
            ) else {
                continue;
            };
            if let Some(predicate) = self.filter {
                if !value_is_true(&predicate.evaluate(&tuple, &self.table_info.schema)?) {
                    continue;
                }
            }
            return Ok(Some((tuple, rid)));
        }
        Ok(None)
    }

    fn schema(&self) -> &Schema {
        &self.table_info.schema
    }
}
