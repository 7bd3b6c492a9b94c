//! The MVCC transaction manager: timestamps, version chains, commit and
//! abort, and the watermark-driven garbage collector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use stratum::Rid;

use crate::catalog::Catalog;
use crate::errors::ExecutionError;
use crate::transaction::{
    IsolationLevel, Timestamp, Transaction, TransactionState, TxnId, UndoLink, UndoLog,
    TXN_START_ID,
};
use crate::watermark::Watermark;

pub struct TransactionManager {
    next_txn_id: AtomicU64,
    last_commit_ts: AtomicU64,
    txn_map: RwLock<HashMap<TxnId, Arc<Transaction>>>,
    /// Head of each RID's version chain. Absence means no chain.
    version_info: DashMap<Rid, UndoLink>,
    running_txns: Mutex<Watermark>,
    /// Serializes Commit so commit timestamps are totally ordered.
    commit_mutex: Mutex<()>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            next_txn_id: AtomicU64::new(TXN_START_ID + 1),
            last_commit_ts: AtomicU64::new(0),
            txn_map: RwLock::new(HashMap::new()),
            version_info: DashMap::new(),
            running_txns: Mutex::new(Watermark::new()),
            commit_mutex: Mutex::new(()),
        }
    }

    pub fn last_commit_ts(&self) -> Timestamp {
        self.last_commit_ts.load(Ordering::SeqCst)
    }

    pub fn watermark(&self) -> Timestamp {
        self.running_txns.lock().watermark()
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let mut txn_map = self.txn_map.write();
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let read_ts = self.last_commit_ts.load(Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, read_ts, isolation_level));
        txn_map.insert(txn_id, Arc::clone(&txn));
        self.running_txns.lock().add_txn(read_ts);
        crate::meridian_debug_log!("[TxnMgr::begin] {:?}", txn);
        txn
    }

    pub fn transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    /// Conflict-serializability check for SERIALIZABLE commits. The default
    /// implementation accepts every history.
    pub fn verify_txn(&self, _txn: &Transaction) -> bool {
        true
    }

    /// Commits `txn`: assigns the next commit timestamp and re-stamps every
    /// write-set tuple with it.
    pub fn commit(&self, txn: &Arc<Transaction>, catalog: &Catalog) -> Result<Timestamp, ExecutionError> {
        let commit_guard = self.commit_mutex.lock();

        if txn.state() != TransactionState::Running {
            return Err(ExecutionError::InvalidTransactionState);
        }

        if txn.isolation_level() == IsolationLevel::Serializable && !self.verify_txn(txn) {
            drop(commit_guard);
            self.abort(txn)?;
            return Err(ExecutionError::SerializationFailure);
        }

        let commit_ts = self.last_commit_ts.fetch_add(1, Ordering::SeqCst) + 1;
        for (table_oid, rids) in txn.write_set() {
            let table = catalog.table_by_oid(table_oid)?;
            for rid in rids {
                let mut meta = table.heap.tuple_meta(rid)?;
                meta.ts = commit_ts;
                table.heap.update_tuple_meta(meta, rid)?;
            }
        }

        let _txn_map = self.txn_map.write();
        txn.set_commit_ts(commit_ts);
        txn.set_state(TransactionState::Committed);
        let mut running_txns = self.running_txns.lock();
        running_txns.update_commit_ts(commit_ts);
        running_txns.remove_txn(txn.read_ts());
        crate::meridian_debug_log!("[TxnMgr::commit] {:?} at ts {commit_ts}", txn);
        Ok(commit_ts)
    }

    /// Aborts a RUNNING or TAINTED transaction. In-place writes stay stamped
    /// with the transaction id; they are invisible to every reader and are
    /// reclaimed by garbage collection.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), ExecutionError> {
        if !matches!(
            txn.state(),
            TransactionState::Running | TransactionState::Tainted
        ) {
            return Err(ExecutionError::InvalidTransactionState);
        }
        let _txn_map = self.txn_map.write();
        txn.set_state(TransactionState::Aborted);
        self.running_txns.lock().remove_txn(txn.read_ts());
        crate::meridian_debug_log!("[TxnMgr::abort] {:?}", txn);
        Ok(())
    }

    /// Replaces the version-chain head for `rid` (`None` clears it).
    pub fn update_undo_link(&self, rid: Rid, link: Option<UndoLink>) {
        match link {
            Some(link) => {
                self.version_info.insert(rid, link);
            }
            None => {
                self.version_info.remove(&rid);
            }
        }
    }

    pub fn undo_link(&self, rid: Rid) -> Option<UndoLink> {
        self.version_info.get(&rid).map(|l| *l)
    }

    /// Resolves a link to its undo log. Returns `None` when the owning
    /// transaction has been garbage collected.
    pub fn undo_log(&self, link: UndoLink) -> Option<UndoLog> {
        let txn = self.txn_map.read().get(&link.prev_txn).cloned()?;
        txn.undo_log(link.prev_log_idx)
    }

    /// Drops undo logs that no reader at or above the watermark can need,
    /// removing finished transactions whose logs are all unreachable.
    pub fn garbage_collection(&self, catalog: &Catalog) -> Result<(), ExecutionError> {
        let watermark = self.watermark();
        let mut unreachable: HashMap<TxnId, usize> = HashMap::new();

        for table in catalog.tables() {
            let mut iter = table.heap.iter();
            while let Some((meta, _payload, rid)) = iter.next()? {
                // Everything strictly older than the first version visible
                // at the watermark is unreachable.
                let mut covered = !crate::transaction::is_txn_ts(meta.ts) && meta.ts <= watermark;
                let mut link = self.undo_link(rid);
                while let Some(l) = link {
                    let Some(log) = self.undo_log(l) else {
                        break;
                    };
                    if covered {
                        *unreachable.entry(l.prev_txn).or_insert(0) += 1;
                    } else if log.ts <= watermark {
                        covered = true;
                    }
                    link = log.prev_version;
                }
            }
        }

        let mut txn_map = self.txn_map.write();
        txn_map.retain(|txn_id, txn| {
            let finished = matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            );
            if !finished {
                return true;
            }
            let dead_logs = unreachable.get(txn_id).copied().unwrap_or(0);
            let keep = txn.undo_log_count() != dead_logs && txn.undo_log_count() != 0;
            if !keep {
                crate::meridian_debug_log!(
                    "[TxnMgr::gc] collecting txn {}",
                    crate::transaction::txn_readable_id(*txn_id)
                );
            }
            keep
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum::disk::DiskManager;
    use stratum::BufferPoolManager;
    use tempfile::tempdir;

    fn setup(dir: &tempfile::TempDir) -> (TransactionManager, Catalog) {
        let dm = DiskManager::open(dir.path().join("txn.db")).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(64, 2, dm));
        (TransactionManager::new(), Catalog::new(bpm))
    }

    #[test]
    fn begin_assigns_tagged_monotonic_ids_and_read_ts() {
        let dir = tempdir().unwrap();
        let (tm, _catalog) = setup(&dir);
        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        let t2 = tm.begin(IsolationLevel::SnapshotIsolation);
        assert!(crate::transaction::is_txn_ts(t1.id()));
        assert!(t2.id() > t1.id());
        assert_eq!(t1.read_ts(), 0);
    }

    #[test]
    fn commit_advances_last_commit_ts_and_watermark() {
        let dir = tempdir().unwrap();
        let (tm, catalog) = setup(&dir);
        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        let ts = tm.commit(&t1, &catalog).unwrap();
        assert_eq!(ts, 1);
        assert_eq!(tm.last_commit_ts(), 1);
        assert_eq!(t1.state(), TransactionState::Committed);
        // No live transactions: watermark equals last commit ts.
        assert_eq!(tm.watermark(), 1);
    }

    #[test]
    fn commit_of_non_running_transaction_fails() {
        let dir = tempdir().unwrap();
        let (tm, catalog) = setup(&dir);
        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&t1, &catalog).unwrap();
        assert!(matches!(
            tm.commit(&t1, &catalog),
            Err(ExecutionError::InvalidTransactionState)
        ));
    }

    #[test]
    fn abort_is_allowed_from_running_and_tainted_only() {
        let dir = tempdir().unwrap();
        let (tm, catalog) = setup(&dir);
        let t1 = tm.begin(IsolationLevel::SnapshotIsolation);
        t1.set_tainted();
        tm.abort(&t1).unwrap();
        assert_eq!(t1.state(), TransactionState::Aborted);
        assert!(tm.abort(&t1).is_err());

        let t2 = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&t2, &catalog).unwrap();
        assert!(tm.abort(&t2).is_err());
    }

    #[test]
    fn watermark_holds_at_oldest_live_reader() {
        let dir = tempdir().unwrap();
        let (tm, catalog) = setup(&dir);
        let old_reader = tm.begin(IsolationLevel::SnapshotIsolation);
        let writer = tm.begin(IsolationLevel::SnapshotIsolation);
        tm.commit(&writer, &catalog).unwrap();
        assert_eq!(tm.watermark(), 0);
        tm.abort(&old_reader).unwrap();
        assert_eq!(tm.watermark(), 1);
    }

    #[test]
    fn undo_links_resolve_through_the_owning_transaction() {
        use crate::types::{Tuple, Value};
        let dir = tempdir().unwrap();
        let (tm, _catalog) = setup(&dir);
        let txn = tm.begin(IsolationLevel::SnapshotIsolation);
        let link = txn.append_undo_log(UndoLog {
            is_deleted: false,
            modified_fields: vec![true],
            tuple: Tuple::new(vec![Value::Int(7)]),
            ts: 0,
            prev_version: None,
        });
        let rid = Rid::new(0, 0);
        tm.update_undo_link(rid, Some(link));
        assert_eq!(tm.undo_link(rid), Some(link));
        let log = tm.undo_log(link).unwrap();
        assert_eq!(log.tuple.value(0), &Value::Int(7));
    }
}
