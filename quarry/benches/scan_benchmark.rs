use std::sync::Arc;

use bedrock::{
    Database, DatabaseConfig, Field, HeapFile, Op, TableId, Transaction, Tuple, TupleDesc, Type,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quarry::executor::collect_all;
use quarry::{AggOp, Aggregate, Executor, Filter, Predicate, SeqScan};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn setup_test_db(rows: usize) -> (TempDir, Database, TableId) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(DatabaseConfig {
        num_pages: 16,
        ..DatabaseConfig::default()
    });
    let desc = Arc::new(TupleDesc::new(&[Type::Int, Type::Int], &["id", "value"]).unwrap());
    let file = HeapFile::open(temp_dir.path().join("bench.dat"), desc.clone()).unwrap();
    let table_id = db.catalog().add_table(Arc::new(file), "bench");

    let mut rng = StdRng::seed_from_u64(42);
    let mut txn = Transaction::begin(&db);
    for i in 0..rows {
        let mut t = Tuple::new(
            desc.clone(),
            vec![Field::Int(i as i32), Field::Int(rng.gen_range(0..100))],
        )
        .unwrap();
        db.buffer_pool()
            .insert_tuple(txn.id(), table_id, &mut t)
            .unwrap();
    }
    txn.commit().unwrap();
    (temp_dir, db, table_id)
}

fn benchmark_seq_scan(c: &mut Criterion) {
    let (_dir, db, table_id) = setup_test_db(5000);

    c.bench_function("seq_scan", |b| {
        b.iter(|| {
            let mut txn = Transaction::begin(&db);
            let mut scan = SeqScan::new(&db, txn.id(), table_id, "b").unwrap();
            scan.open().unwrap();
            black_box(collect_all(&mut scan).unwrap());
            txn.commit().unwrap();
        })
    });
}

fn benchmark_filter_aggregate(c: &mut Criterion) {
    let (_dir, db, table_id) = setup_test_db(5000);

    c.bench_function("filter_aggregate", |b| {
        b.iter(|| {
            let mut txn = Transaction::begin(&db);
            let scan = SeqScan::new(&db, txn.id(), table_id, "b").unwrap();
            let filter = Filter::new(
                Predicate::new(1, Op::GreaterThan, Field::Int(50)),
                Box::new(scan),
            );
            let mut agg = Aggregate::new(Box::new(filter), 0, Some(1), AggOp::Count).unwrap();
            agg.open().unwrap();
            black_box(collect_all(&mut agg).unwrap());
            txn.commit().unwrap();
        })
    });
}

criterion_group!(benches, benchmark_seq_scan, benchmark_filter_aggregate);
criterion_main!(benches);
