//! Materializing order operators: sort, limit, top-N.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use stratum::Rid;

use super::Executor;
use crate::errors::ExecutionError;
use crate::plan::{Expression, OrderByType};
use crate::types::{Schema, Tuple, Value};

/// Lexicographic comparison over pre-evaluated sort keys with per-key
/// direction. `Default` sorts ascending.
pub(crate) fn compare_keys(a: &[Value], b: &[Value], dirs: &[OrderByType]) -> Ordering {
    for (i, dir) in dirs.iter().enumerate() {
        let ord = a[i].cmp(&b[i]);
        if ord == Ordering::Equal {
            continue;
        }
        return match dir {
            OrderByType::Desc => ord.reverse(),
            OrderByType::Asc | OrderByType::Default => ord,
        };
    }
    Ordering::Equal
}

pub(crate) fn evaluate_keys(
    order_bys: &[(OrderByType, Expression)],
    tuple: &Tuple,
    schema: &Schema,
) -> Result<Vec<Value>, ExecutionError> {
    order_bys
        .iter()
        .map(|(_, expr)| expr.evaluate(tuple, schema))
        .collect()
}

/// Materializes the child and sorts it by the order-by list.
pub struct SortExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    order_bys: &'a [(OrderByType, Expression)],
    sorted: std::vec::IntoIter<(Tuple, Rid)>,
}

impl<'a> SortExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, order_bys: &'a [(OrderByType, Expression)]) -> Self {
        Self {
            child,
            order_bys,
            sorted: Vec::new().into_iter(),
        }
    }
}

impl Executor for SortExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        let schema = self.child.schema().clone();
        let dirs: Vec<OrderByType> = self.order_bys.iter().map(|(d, _)| *d).collect();

        let mut rows = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            let keys = evaluate_keys(self.order_bys, &tuple, &schema)?;
            rows.push((keys, tuple, rid));
        }
        rows.sort_by(|a, b| compare_keys(&a.0, &b.0, &dirs));
        self.sorted = rows
            .into_iter()
            .map(|(_, tuple, rid)| (tuple, rid))
            .collect::<Vec<_>>()
            .into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        Ok(self.sorted.next())
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

/// Yields the first N child rows.
pub struct LimitExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    limit: usize,
    emitted: usize,
}

impl<'a> LimitExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, limit: usize) -> Self {
        Self {
            child,
            limit,
            emitted: 0,
        }
    }
}

impl Executor for LimitExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.emitted = 0;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        let row = self.child.next()?;
        if row.is_some() {
            self.emitted += 1;
        }
        Ok(row)
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}

struct TopNEntry {
    keys: Vec<Value>,
    dirs: Arc<Vec<OrderByType>>,
    seq: usize,
    tuple: Tuple,
    rid: Rid,
}

impl PartialEq for TopNEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for TopNEntry {}

impl PartialOrd for TopNEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopNEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // The heap keeps its greatest element on top, so the "worst" row in
        // the wanted order pops first. Later arrivals lose ties.
        compare_keys(&self.keys, &other.keys, &self.dirs).then(self.seq.cmp(&other.seq))
    }
}

/// Keeps the N best rows using a bounded heap ordered by the inverse
/// comparator: on overflow the current worst is popped; at the end the heap
/// is drained and reversed.
pub struct TopNExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    order_bys: &'a [(OrderByType, Expression)],
    n: usize,
    results: std::vec::IntoIter<(Tuple, Rid)>,
}

impl<'a> TopNExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        order_bys: &'a [(OrderByType, Expression)],
        n: usize,
    ) -> Self {
        Self {
            child,
            order_bys,
            n,
            results: Vec::new().into_iter(),
        }
    }
}

impl Executor for TopNExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        let schema = self.child.schema().clone();
        let dirs = Arc::new(
            self.order_bys
                .iter()
                .map(|(d, _)| *d)
                .collect::<Vec<_>>(),
        );

        let mut heap = BinaryHeap::new();
        let mut seq = 0usize;
        while let Some((tuple, rid)) = self.child.next()? {
            let keys = evaluate_keys(self.order_bys, &tuple, &schema)?;
            heap.push(TopNEntry {
                keys,
                dirs: Arc::clone(&dirs),
                seq,
                tuple,
                rid,
            });
            seq += 1;
            if heap.len() > self.n {
                heap.pop();
            }
        }

        let mut drained = Vec::with_capacity(heap.len());
        while let Some(entry) = heap.pop() {
            drained.push((entry.tuple, entry.rid));
        }
        drained.reverse();
        self.results = drained.into_iter();
        Ok(())
    }

    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError> {
        Ok(self.results.next())
    }

    fn schema(&self) -> &Schema {
        self.child.schema()
    }
}
