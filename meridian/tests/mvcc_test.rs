mod common;

use common::*;
use meridian::errors::ExecutionError;
use meridian::executor::execute_plan;
use meridian::plan::{Expression, PlanNode};
use meridian::transaction::TransactionState;
use meridian::types::Value;

/// An update plan setting `x = value` for every row of the table.
fn update_x_plan(table: &str, value: i64) -> PlanNode {
    PlanNode::Update {
        table: table.to_string(),
        child: Box::new(PlanNode::SeqScan {
            table: table.to_string(),
            filter: None,
        }),
        target_exprs: vec![
            Expression::column(0),
            Expression::literal(Value::Int(value)),
        ],
    }
}

fn delete_all_plan(table: &str) -> PlanNode {
    PlanNode::Delete {
        table: table.to_string(),
        child: Box::new(PlanNode::SeqScan {
            table: table.to_string(),
            filter: None,
        }),
    }
}

#[test]
fn own_update_is_visible_before_commit_and_snapshots_hold() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let txn_a = db.begin();
    let txn_b = db.begin();
    assert_eq!(txn_a.read_ts(), txn_b.read_ts());

    execute_plan(&update_x_plan("t", 2), &db.ctx(&txn_a)).unwrap();

    // A reads its own uncommitted write; B still reads the snapshot.
    assert_eq!(scan_all(&db, &txn_a, "t"), int_rows(&[&[1, 2]]));
    assert_eq!(scan_all(&db, &txn_b, "t"), int_rows(&[&[1, 1]]));

    let commit_ts = db.txn_mgr.commit(&txn_a, &db.catalog).unwrap();

    // B's snapshot predates the commit; a new transaction sees the update.
    assert_eq!(scan_all(&db, &txn_b, "t"), int_rows(&[&[1, 1]]));
    let txn_c = db.begin();
    assert_eq!(txn_c.read_ts(), commit_ts);
    assert_eq!(scan_all(&db, &txn_c, "t"), int_rows(&[&[1, 2]]));
}

#[test]
fn concurrent_update_of_same_row_taints_the_second_writer() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let txn_a = db.begin();
    let txn_b = db.begin();
    execute_plan(&update_x_plan("t", 2), &db.ctx(&txn_a)).unwrap();

    let err = execute_plan(&update_x_plan("t", 3), &db.ctx(&txn_b)).unwrap_err();
    assert!(matches!(err, ExecutionError::WriteWriteConflict));
    assert_eq!(txn_b.state(), TransactionState::Tainted);

    // A tainted transaction cannot commit, only abort.
    assert!(db.txn_mgr.commit(&txn_b, &db.catalog).is_err());
    db.txn_mgr.abort(&txn_b).unwrap();

    db.txn_mgr.commit(&txn_a, &db.catalog).unwrap();
    let reader = db.begin();
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 2]]));
}

#[test]
fn update_committed_after_my_snapshot_is_a_conflict() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let stale = db.begin();
    let winner = db.begin();
    execute_plan(&update_x_plan("t", 5), &db.ctx(&winner)).unwrap();
    db.txn_mgr.commit(&winner, &db.catalog).unwrap();

    // `stale` still sees the old snapshot, and its write must conflict.
    assert_eq!(scan_all(&db, &stale, "t"), int_rows(&[&[1, 1]]));
    let err = execute_plan(&update_x_plan("t", 9), &db.ctx(&stale)).unwrap_err();
    assert!(matches!(err, ExecutionError::WriteWriteConflict));
}

#[test]
fn delete_is_a_version_too() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 10], &[2, 20]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let reader = db.begin();
    let deleter = db.begin();
    execute_plan(&delete_all_plan("t"), &db.ctx(&deleter)).unwrap();

    // The deleter sees its own deletes; the old reader sees everything.
    assert!(scan_all(&db, &deleter, "t").is_empty());
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 10], &[2, 20]]));

    db.txn_mgr.commit(&deleter, &db.catalog).unwrap();
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 10], &[2, 20]]));
    let after = db.begin();
    assert!(scan_all(&db, &after, "t").is_empty());
}

#[test]
fn aborted_writes_stay_invisible() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let txn_a = db.begin();
    execute_plan(&update_x_plan("t", 99), &db.ctx(&txn_a)).unwrap();
    insert_int_rows(&db, &txn_a, "t", &[&[2, 2]]).unwrap();
    db.txn_mgr.abort(&txn_a).unwrap();

    // No physical rollback happens, but nothing of A is visible.
    let reader = db.begin();
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 1]]));
}

#[test]
fn repeat_update_in_one_transaction_keeps_a_single_undo_log() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let txn_a = db.begin();
    execute_plan(&update_x_plan("t", 2), &db.ctx(&txn_a)).unwrap();
    execute_plan(&update_x_plan("t", 3), &db.ctx(&txn_a)).unwrap();
    assert_eq!(txn_a.undo_log_count(), 1);
    assert_eq!(scan_all(&db, &txn_a, "t"), int_rows(&[&[1, 3]]));

    // The merged log still reconstructs the pre-image for old snapshots.
    let reader = db.begin();
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 1]]));
    db.txn_mgr.commit(&txn_a, &db.catalog).unwrap();
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 1]]));
}

#[test]
fn garbage_collection_collapses_dead_version_chains() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let txn_a = db.begin();
    execute_plan(&update_x_plan("t", 2), &db.ctx(&txn_a)).unwrap();
    let a_id = txn_a.id();
    db.txn_mgr.commit(&txn_a, &db.catalog).unwrap();

    // No live reader needs the old version: the log and then the finished
    // transaction become collectable.
    db.txn_mgr.garbage_collection(&db.catalog).unwrap();
    assert!(db.txn_mgr.transaction(a_id).is_none());

    let reader = db.begin();
    assert_eq!(scan_all(&db, &reader, "t"), int_rows(&[&[1, 2]]));
}

#[test]
fn garbage_collection_preserves_logs_needed_by_live_readers() {
    let db = TestDb::new();
    db.create_id_x_table("t");

    let setup = db.begin();
    insert_int_rows(&db, &setup, "t", &[&[1, 1]]).unwrap();
    db.txn_mgr.commit(&setup, &db.catalog).unwrap();

    let old_reader = db.begin();
    let txn_a = db.begin();
    execute_plan(&update_x_plan("t", 2), &db.ctx(&txn_a)).unwrap();
    let a_id = txn_a.id();
    db.txn_mgr.commit(&txn_a, &db.catalog).unwrap();

    // The old reader pins the watermark below A's commit.
    db.txn_mgr.garbage_collection(&db.catalog).unwrap();
    assert!(db.txn_mgr.transaction(a_id).is_some());
    assert_eq!(scan_all(&db, &old_reader, "t"), int_rows(&[&[1, 1]]));

    db.txn_mgr.abort(&old_reader).unwrap();
    db.txn_mgr.garbage_collection(&db.catalog).unwrap();
    assert!(db.txn_mgr.transaction(a_id).is_none());
}

#[test]
fn watermark_equals_last_commit_ts_when_idle() {
    let db = TestDb::new();
    db.create_id_x_table("t");
    for i in 0..3 {
        let txn = db.begin();
        insert_int_rows(&db, &txn, "t", &[&[i, i]]).unwrap();
        db.txn_mgr.commit(&txn, &db.catalog).unwrap();
    }
    assert_eq!(db.txn_mgr.watermark(), db.txn_mgr.last_commit_ts());
    assert_eq!(db.txn_mgr.last_commit_ts(), 3);
}
