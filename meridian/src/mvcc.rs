//! MVCC read-path helpers: version reconstruction and visibility.

use stratum::page::TupleMeta;
use stratum::Rid;

use crate::catalog::TableInfo;
use crate::transaction::{is_txn_ts, txn_readable_id, Timestamp, Transaction, UndoLog};
use crate::transaction_manager::TransactionManager;
use crate::types::Tuple;

/// Rebuilds a historical version by folding pre-image deltas over the base
/// tuple, newest first. Returns `None` when the reconstructed version is a
/// delete marker.
pub fn reconstruct_tuple(
    base_tuple: &Tuple,
    base_meta: TupleMeta,
    undo_logs: &[UndoLog],
) -> Option<Tuple> {
    let mut values = base_tuple.values.clone();
    let mut is_deleted = base_meta.is_deleted;
    for undo in undo_logs {
        if undo.is_deleted {
            is_deleted = true;
            continue;
        }
        is_deleted = false;
        let mut partial_idx = 0;
        for (i, modified) in undo.modified_fields.iter().enumerate() {
            if *modified {
                values[i] = undo.tuple.value(partial_idx).clone();
                partial_idx += 1;
            }
        }
    }
    if is_deleted {
        return None;
    }
    Some(Tuple::new(values))
}

/// Collects the undo logs needed to roll `rid` back to `read_ts`, newest
/// first, ending with the first log stamped at or below `read_ts`. Returns
/// `None` when the chain has no version that old (the row did not exist).
pub fn collect_undo_logs(
    txn_mgr: &TransactionManager,
    rid: Rid,
    read_ts: Timestamp,
) -> Option<Vec<UndoLog>> {
    let mut logs = Vec::new();
    let mut link = txn_mgr.undo_link(rid);
    while let Some(l) = link {
        let log = txn_mgr.undo_log(l)?;
        let log_ts = log.ts;
        link = log.prev_version;
        logs.push(log);
        if log_ts <= read_ts {
            return Some(logs);
        }
    }
    None
}

/// Resolves the version of a tuple visible to `txn`, given the base tuple
/// and meta currently in the heap.
pub fn visible_tuple(
    txn_mgr: &TransactionManager,
    txn: &Transaction,
    meta: TupleMeta,
    tuple: &Tuple,
    rid: Rid,
) -> Option<Tuple> {
    let own_write = meta.ts == txn.id();
    let committed_visible = !is_txn_ts(meta.ts) && meta.ts <= txn.read_ts();
    if own_write || committed_visible {
        if meta.is_deleted {
            return None;
        }
        return Some(tuple.clone());
    }
    let logs = collect_undo_logs(txn_mgr, rid, txn.read_ts())?;
    reconstruct_tuple(tuple, meta, &logs)
}

/// Dumps every RID's base tuple and undo chain, gated on the debug switch.
pub fn debug_version_chain(info: &str, txn_mgr: &TransactionManager, table: &TableInfo) {
    if !crate::debug_logs_enabled() {
        return;
    }
    println!("debug_hook: {info}");
    let mut iter = table.heap.iter();
    while let Ok(Some((meta, payload, rid))) = iter.next() {
        let tuple = Tuple::deserialize(&payload, &table.schema)
            .map(|t| format!("{:?}", t.to_string_row()))
            .unwrap_or_else(|_| "<undecodable>".to_string());
        let ts = if is_txn_ts(meta.ts) {
            format!("txn{}", txn_readable_id(meta.ts))
        } else {
            format!("{}", meta.ts)
        };
        let marker = if meta.is_deleted { " <del>" } else { "" };
        println!("RID={}/{} ts={ts}{marker} tuple={tuple}", rid.page_id, rid.slot);

        let mut link = txn_mgr.undo_link(rid);
        while let Some(l) = link {
            let Some(log) = txn_mgr.undo_log(l) else {
                println!("  txn{}@{} <collected>", txn_readable_id(l.prev_txn), l.prev_log_idx);
                break;
            };
            let body = if log.is_deleted {
                "<del>".to_string()
            } else {
                format!("{:?}", log.tuple.to_string_row())
            };
            println!(
                "  txn{}@{} {} ts={}",
                txn_readable_id(l.prev_txn),
                l.prev_log_idx,
                body,
                log.ts
            );
            link = log.prev_version;
        }
    }
}
