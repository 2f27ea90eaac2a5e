use std::collections::HashMap;
use std::sync::Arc;

use bedrock::{
    Database, DbError, DbFileIterator, DbResult, Field, Op, TableId, Transaction, Type,
};
use log::{debug, info};
use parking_lot::RwLock;

use super::histogram::{IntHistogram, StringHistogram};

/// Cost of reading one page, in the same units as the rest of the cost model.
pub const IO_COST_PER_PAGE: f64 = 1000.0;

pub const NUM_HIST_BINS: usize = 100;

#[derive(Debug, Clone)]
enum ColumnHistogram {
    Int(IntHistogram),
    Str(StringHistogram),
}

/// Per-table statistics: page count, tuple count and one histogram per column.
#[derive(Debug, Clone)]
pub struct TableStats {
    table_id: TableId,
    io_cost_per_page: f64,
    num_pages: u32,
    num_tuples: u64,
    histograms: Vec<ColumnHistogram>,
}

impl TableStats {
    /// Scans the table twice in its own transaction: once for the range of
    /// every INT column, once to fill the histograms.
    pub fn new(db: &Database, table_id: TableId, io_cost_per_page: f64) -> DbResult<Self> {
        let file = db.catalog().db_file(table_id)?;
        let desc = file.tuple_desc().clone();
        let mut txn = Transaction::begin(db);

        let mut ranges: Vec<Option<(i32, i32)>> = vec![None; desc.num_fields()];
        let mut num_tuples = 0u64;
        let mut iter = file.iter(db.buffer_pool().clone(), txn.id());
        iter.open()?;
        while let Some(t) = iter.next()? {
            num_tuples += 1;
            for (range, field) in ranges.iter_mut().zip(t.fields()) {
                if let Field::Int(v) = field {
                    *range = Some(match *range {
                        Some((lo, hi)) => (lo.min(*v), hi.max(*v)),
                        None => (*v, *v),
                    });
                }
            }
        }

        let mut histograms: Vec<ColumnHistogram> = desc
            .items()
            .iter()
            .zip(&ranges)
            .map(|(item, range)| match item.field_type {
                Type::Int => {
                    let (lo, hi) = range.unwrap_or((0, 0));
                    ColumnHistogram::Int(IntHistogram::new(NUM_HIST_BINS, lo, hi))
                }
                Type::String => ColumnHistogram::Str(StringHistogram::new(NUM_HIST_BINS)),
            })
            .collect();

        iter.rewind()?;
        while let Some(t) = iter.next()? {
            for (hist, field) in histograms.iter_mut().zip(t.fields()) {
                match (hist, field) {
                    (ColumnHistogram::Int(h), Field::Int(v)) => h.add_value(*v),
                    (ColumnHistogram::Str(h), Field::Str(s)) => h.add_value(s),
                    _ => {}
                }
            }
        }
        iter.close();
        let num_pages = file.num_pages()?;
        txn.commit()?;

        debug!(
            "[TableStats::new] table {}: {} tuples on {} pages",
            table_id, num_tuples, num_pages
        );
        Ok(Self {
            table_id,
            io_cost_per_page,
            num_pages,
            num_tuples,
            histograms,
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Cost of a full sequential scan; every page is read once.
    pub fn estimate_scan_cost(&self) -> f64 {
        self.num_pages as f64 * self.io_cost_per_page
    }

    /// Tuples expected to survive a predicate of the given selectivity.
    pub fn estimate_table_cardinality(&self, selectivity: f64) -> usize {
        (self.num_tuples as f64 * selectivity).floor() as usize
    }

    /// Average selectivity of `field <op> c` over the stored values of `field`.
    pub fn avg_selectivity(&self, field: usize, _op: Op) -> DbResult<f64> {
        Ok(match self.histogram(field)? {
            ColumnHistogram::Int(h) => h.avg_selectivity(),
            ColumnHistogram::Str(h) => h.avg_selectivity(),
        })
    }

    pub fn estimate_selectivity(&self, field: usize, op: Op, constant: &Field) -> DbResult<f64> {
        match (self.histogram(field)?, constant) {
            (ColumnHistogram::Int(h), Field::Int(v)) => Ok(h.estimate_selectivity(op, *v)),
            (ColumnHistogram::Str(h), Field::Str(s)) => Ok(h.estimate_selectivity(op, s)),
            _ => Err(DbError::SchemaMismatch(format!(
                "constant {} does not match the type of field {}",
                constant, field
            ))),
        }
    }

    pub fn total_tuples(&self) -> u64 {
        self.num_tuples
    }

    fn histogram(&self, field: usize) -> DbResult<&ColumnHistogram> {
        self.histograms
            .get(field)
            .ok_or_else(|| DbError::NoSuchElement(format!("field index {}", field)))
    }
}

/// Statistics for every table, keyed by table name.
#[derive(Default)]
pub struct StatsRegistry {
    stats: RwLock<HashMap<String, Arc<TableStats>>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the statistics of every table in the catalog.
    pub fn compute_statistics(&self, db: &Database) -> DbResult<()> {
        let catalog = db.catalog();
        let mut computed = HashMap::new();
        for table_id in catalog.table_ids() {
            let name = catalog.table_name(table_id)?;
            let stats = TableStats::new(db, table_id, IO_COST_PER_PAGE)?;
            computed.insert(name, Arc::new(stats));
        }
        info!("[StatsRegistry::compute_statistics] {} tables", computed.len());
        *self.stats.write() = computed;
        Ok(())
    }

    pub fn get(&self, table_name: &str) -> Option<Arc<TableStats>> {
        self.stats.read().get(table_name).cloned()
    }

    pub fn set(&self, table_name: &str, stats: TableStats) {
        self.stats
            .write()
            .insert(table_name.to_string(), Arc::new(stats));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stats.read().keys().cloned().collect();
        names.sort();
        names
    }
}
