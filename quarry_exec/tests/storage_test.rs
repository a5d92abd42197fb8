use std::fs;
use std::sync::Arc;

use granite::tuple::{Field, Tuple};
use granite::TransactionId;
use quarry_exec::ops::{Insert, OpIterator, TupleIterator};

mod common;
use common::{int_desc, int_field, int_str_desc, scan_all, setup_table, str_field};

#[test]
fn single_tuple_round_trip_across_transactions() {
    let td = int_str_desc();
    let (dir, db, table_id) = setup_table("round_trip", td.clone());

    // T1 inserts through the operator pipeline and commits.
    let t1 = TransactionId::new();
    let row = Tuple::with_fields(
        td.clone(),
        vec![Field::Int(42), Field::Str("hi".to_string())],
    );
    let child = TupleIterator::new(td.clone(), vec![row]);
    let mut insert = Insert::new(Arc::clone(db.pool()), t1, Box::new(child), table_id).unwrap();
    insert.open().unwrap();
    let count = insert.next().unwrap();
    assert_eq!(int_field(&count, 0), 1);
    insert.close();
    db.pool().transaction_complete(t1, true).unwrap();

    // T2 scans and sees exactly the committed tuple.
    let rows = scan_all(&db, table_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(int_field(&rows[0], 0), 42);
    assert_eq!(str_field(&rows[0], 1), "hi");

    // FORCE put the bytes on disk at commit.
    let on_disk = fs::read(dir.path().join("round_trip.dat")).unwrap();
    assert_eq!(on_disk.len(), granite::PAGE_SIZE);
}

#[test]
fn abort_rolls_back_to_the_committed_image() {
    let td = int_desc();
    let (dir, db, table_id) = setup_table("rollback", td.clone());
    let data_path = dir.path().join("rollback.dat");

    // Committed baseline: a single tuple (1).
    let setup = TransactionId::new();
    let mut t = Tuple::with_fields(td.clone(), vec![Field::Int(1)]);
    db.pool().insert_tuple(setup, table_id, &mut t).unwrap();
    db.pool().transaction_complete(setup, true).unwrap();
    let committed_bytes = fs::read(&data_path).unwrap();

    // T1 inserts (2) and aborts.
    let t1 = TransactionId::new();
    let mut t = Tuple::with_fields(td.clone(), vec![Field::Int(2)]);
    db.pool().insert_tuple(t1, table_id, &mut t).unwrap();
    db.pool().transaction_complete(t1, false).unwrap();

    // T2 sees only the committed tuple.
    let rows = scan_all(&db, table_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(int_field(&rows[0], 0), 1);

    // NO-STEAL: the aborted insert never reached disk.
    assert_eq!(fs::read(&data_path).unwrap(), committed_bytes);
}

#[test]
fn abort_releases_locks_and_forgets_the_transaction() {
    let td = int_desc();
    let (_dir, db, table_id) = setup_table("aborted", td.clone());

    let setup = TransactionId::new();
    let mut t = Tuple::with_fields(td.clone(), vec![Field::Int(1)]);
    db.pool().insert_tuple(setup, table_id, &mut t).unwrap();
    db.pool().transaction_complete(setup, true).unwrap();

    let tid = TransactionId::new();
    let pid = granite::PageId::new(table_id, 0);
    db.pool()
        .get_page(tid, pid, granite::Permissions::ReadOnly)
        .unwrap();
    db.pool().transaction_complete(tid, false).unwrap();

    // The tid is gone from the transaction table; a fresh one works fine.
    let tid2 = TransactionId::new();
    assert!(db
        .pool()
        .get_page(tid2, pid, granite::Permissions::ReadOnly)
        .is_ok());
    db.pool().transaction_complete(tid2, true).unwrap();
}
