//! Transactions: identifiers, state, undo logs, and the version-chain link.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use stratum::Rid;

use crate::types::Tuple;

/// 64-bit timestamps. Bit 62 tags a value as a transaction id rather than a
/// commit timestamp.
pub type Timestamp = u64;
pub type TxnId = u64;

pub const TXN_START_ID: TxnId = 1 << 62;
pub const INVALID_TS: Timestamp = u64::MAX;

/// True when `ts` carries a transaction id (an uncommitted write).
pub fn is_txn_ts(ts: Timestamp) -> bool {
    ts & TXN_START_ID != 0
}

/// Strips the tag bit for human-readable transaction numbers.
pub fn txn_readable_id(txn_id: TxnId) -> u64 {
    txn_id ^ TXN_START_ID
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsolationLevel {
    SnapshotIsolation,
    Serializable,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionState {
    Running,
    Tainted,
    Committed,
    Aborted,
}

/// Points at one undo log inside its owning transaction's log list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UndoLink {
    pub prev_txn: TxnId,
    pub prev_log_idx: usize,
}

/// One pre-image delta in a version chain.
///
/// `tuple` holds values only for the columns flagged in `modified_fields`,
/// laid out against the correspondingly narrowed schema. `ts` is the
/// timestamp the pre-image was stamped with; `prev_version` continues the
/// chain toward older versions.
#[derive(Debug, Clone)]
pub struct UndoLog {
    pub is_deleted: bool,
    pub modified_fields: Vec<bool>,
    pub tuple: Tuple,
    pub ts: Timestamp,
    pub prev_version: Option<UndoLink>,
}

pub struct Transaction {
    txn_id: TxnId,
    isolation_level: IsolationLevel,
    read_ts: Timestamp,
    commit_ts: AtomicU64,
    state: Mutex<TransactionState>,
    undo_logs: Mutex<Vec<UndoLog>>,
    write_set: Mutex<HashMap<u32, HashSet<Rid>>>,
}

impl Transaction {
    pub fn new(txn_id: TxnId, read_ts: Timestamp, isolation_level: IsolationLevel) -> Self {
        Self {
            txn_id,
            isolation_level,
            read_ts,
            commit_ts: AtomicU64::new(INVALID_TS),
            state: Mutex::new(TransactionState::Running),
            undo_logs: Mutex::new(Vec::new()),
            write_set: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    /// The tagged timestamp this transaction stamps its in-flight writes with.
    pub fn temp_ts(&self) -> Timestamp {
        self.txn_id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_commit_ts(&self, ts: Timestamp) {
        self.commit_ts.store(ts, Ordering::SeqCst);
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Marks the transaction as failed-by-conflict. Only Abort is legal next.
    pub fn set_tainted(&self) {
        let mut state = self.state.lock();
        if *state == TransactionState::Running {
            *state = TransactionState::Tainted;
        }
    }

    /// Appends an undo log and returns the link that addresses it.
    pub fn append_undo_log(&self, log: UndoLog) -> UndoLink {
        let mut logs = self.undo_logs.lock();
        logs.push(log);
        UndoLink {
            prev_txn: self.txn_id,
            prev_log_idx: logs.len() - 1,
        }
    }

    /// Rewrites the log at `idx`; used when a statement touches the same RID
    /// twice so that at most one log per (txn, RID) exists.
    pub fn modify_undo_log(&self, idx: usize, log: UndoLog) {
        self.undo_logs.lock()[idx] = log;
    }

    pub fn undo_log(&self, idx: usize) -> Option<UndoLog> {
        self.undo_logs.lock().get(idx).cloned()
    }

    pub fn undo_log_count(&self) -> usize {
        self.undo_logs.lock().len()
    }

    pub fn append_write_set(&self, table_oid: u32, rid: Rid) {
        self.write_set.lock().entry(table_oid).or_default().insert(rid);
    }

    pub fn write_set(&self) -> HashMap<u32, HashSet<Rid>> {
        self.write_set.lock().clone()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("txn_id", &txn_readable_id(self.txn_id))
            .field("read_ts", &self.read_ts)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn timestamp_tagging() {
        assert!(is_txn_ts(TXN_START_ID));
        assert!(is_txn_ts(TXN_START_ID + 17));
        assert!(!is_txn_ts(0));
        assert!(!is_txn_ts(123_456));
        assert_eq!(txn_readable_id(TXN_START_ID + 9), 9);
    }

    #[test]
    fn undo_log_links_address_appended_logs() {
        let txn = Transaction::new(TXN_START_ID + 1, 5, IsolationLevel::SnapshotIsolation);
        let log = UndoLog {
            is_deleted: false,
            modified_fields: vec![true],
            tuple: Tuple::new(vec![Value::Int(1)]),
            ts: 5,
            prev_version: None,
        };
        let link = txn.append_undo_log(log.clone());
        assert_eq!(link.prev_txn, txn.id());
        assert_eq!(link.prev_log_idx, 0);
        let second = txn.append_undo_log(log);
        assert_eq!(second.prev_log_idx, 1);
        assert_eq!(txn.undo_log_count(), 2);
    }

    #[test]
    fn tainting_only_applies_to_running_transactions() {
        let txn = Transaction::new(TXN_START_ID + 1, 0, IsolationLevel::SnapshotIsolation);
        txn.set_tainted();
        assert_eq!(txn.state(), TransactionState::Tainted);
        txn.set_state(TransactionState::Aborted);
        txn.set_tainted();
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
