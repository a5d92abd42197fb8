use std::sync::Arc;

use granite::catalog::Database;
use granite::heap_file::{DbFile, HeapFile};
use granite::tuple::{Field, Tuple, TupleDesc, Type};
use quarry_exec::ops::{OpIterator, SeqScan};
use tempfile::TempDir;

/// One table in a fresh database backed by a temp directory. The temp dir
/// must outlive the database, so it is returned alongside.
pub fn setup_table(name: &str, td: TupleDesc) -> (TempDir, Arc<Database>, u32) {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::new());
    let file = Arc::new(HeapFile::new(dir.path().join(format!("{}.dat", name)), td).unwrap());
    let table_id = file.id();
    db.catalog().add_table(file, name, "");
    (dir, db, table_id)
}

#[allow(dead_code)]
pub fn int_str_desc() -> TupleDesc {
    TupleDesc::new(
        vec![Type::Int, Type::Str],
        vec![Some("id".to_string()), Some("tag".to_string())],
    )
}

#[allow(dead_code)]
pub fn int_desc() -> TupleDesc {
    TupleDesc::new(vec![Type::Int], vec![Some("v".to_string())])
}

/// Scans the table under a fresh committed transaction and returns every
/// tuple it yields.
#[allow(dead_code)]
pub fn scan_all(db: &Arc<Database>, table_id: u32) -> Vec<Tuple> {
    let tid = granite::TransactionId::new();
    let mut scan = SeqScan::new(db.pool(), tid, table_id, "t").unwrap();
    scan.open().unwrap();
    let mut out = Vec::new();
    while scan.has_next().unwrap() {
        out.push(scan.next().unwrap());
    }
    scan.close();
    db.pool().transaction_complete(tid, true).unwrap();
    out
}

#[allow(dead_code)]
pub fn int_field(t: &Tuple, i: usize) -> i32 {
    match t.field(i) {
        Some(Field::Int(v)) => *v,
        other => panic!("expected int field, got {:?}", other),
    }
}

#[allow(dead_code)]
pub fn str_field(t: &Tuple, i: usize) -> String {
    match t.field(i) {
        Some(Field::Str(s)) => s.clone(),
        other => panic!("expected string field, got {:?}", other),
    }
}
