#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bedrock::{
    Database, DatabaseConfig, Field, HeapFile, TableId, Transaction, TransactionId, Tuple,
    TupleDesc, Type,
};
use quarry::executor::collect_all;
use quarry::{Executor, Insert, SeqScan, TupleIterator};
use tempfile::{tempdir, TempDir};

/// A database whose tables live in a temp directory removed on drop.
pub struct TestDb {
    pub db: Database,
    pub dir: TempDir,
}

impl TestDb {
    pub fn new(num_pages: usize) -> Self {
        Self::with_timeout(num_pages, Duration::from_millis(300))
    }

    pub fn with_timeout(num_pages: usize, lock_timeout: Duration) -> Self {
        let config = DatabaseConfig {
            num_pages,
            lock_timeout,
            ..DatabaseConfig::default()
        };
        Self {
            db: Database::new(config),
            dir: tempdir().unwrap(),
        }
    }

    /// Creates an empty table of INT columns named `name.dat`.
    pub fn int_table(&self, name: &str, columns: &[&str]) -> TableId {
        let types = vec![Type::Int; columns.len()];
        self.table(name, &types, columns)
    }

    pub fn table(&self, name: &str, types: &[Type], columns: &[&str]) -> TableId {
        let desc = Arc::new(TupleDesc::new(types, columns).unwrap());
        let path = self.dir.path().join(format!("{}.dat", name));
        let file = Arc::new(HeapFile::open(path, desc).unwrap());
        self.db.catalog().add_table(file, name)
    }

    pub fn desc(&self, table_id: TableId) -> Arc<TupleDesc> {
        self.db.catalog().tuple_desc(table_id).unwrap()
    }

    /// Inserts `rows` through an `Insert` operator and commits; returns the reported count.
    pub fn insert_rows(&self, table_id: TableId, rows: Vec<Vec<Field>>) -> i32 {
        let desc = self.desc(table_id);
        let tuples = rows
            .into_iter()
            .map(|fields| Tuple::new(desc.clone(), fields).unwrap())
            .collect();
        let source = Box::new(TupleIterator::new(desc, tuples).unwrap());

        let mut txn = Transaction::begin(&self.db);
        let mut insert = Insert::new(&self.db, txn.id(), source, table_id).unwrap();
        insert.open().unwrap();
        let count = insert.next().unwrap().unwrap();
        assert!(insert.next().unwrap().is_none());
        insert.close();
        txn.commit().unwrap();
        count.field(0).unwrap().as_int().unwrap()
    }

    /// All rows of a table as sorted field vectors, read in a fresh transaction.
    pub fn scan_sorted(&self, table_id: TableId) -> Vec<Vec<Field>> {
        let mut txn = Transaction::begin(&self.db);
        let rows = scan_with(&self.db, txn.id(), table_id);
        txn.commit().unwrap();
        rows
    }
}

pub fn scan_with(db: &Database, tid: TransactionId, table_id: TableId) -> Vec<Vec<Field>> {
    let mut scan = SeqScan::new(db, tid, table_id, "t").unwrap();
    scan.open().unwrap();
    let mut rows: Vec<Vec<Field>> = collect_all(&mut scan)
        .unwrap()
        .into_iter()
        .map(Tuple::into_fields)
        .collect();
    scan.close();
    rows.sort();
    rows
}

pub fn ints(values: &[i32]) -> Vec<Field> {
    values.iter().map(|v| Field::Int(*v)).collect()
}
