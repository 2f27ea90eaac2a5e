use std::sync::Arc;

use bedrock::{
    Database, DbError, DbFileIterator, DbResult, HeapFileIterator, TableId, TransactionId, Tuple,
    TupleDesc,
};
use log::debug;

use super::{not_open, Executor};

/// Sequential scan over every tuple of a table, in page then slot order.
///
/// Output field names are `alias.field`; a missing field name comes out as
/// `alias.null`.
pub struct SeqScan {
    tid: TransactionId,
    table_id: TableId,
    alias: String,
    desc: Arc<TupleDesc>,
    iter: HeapFileIterator,
    opened: bool,
}

impl SeqScan {
    pub fn new(
        db: &Database,
        tid: TransactionId,
        table_id: TableId,
        alias: &str,
    ) -> DbResult<Self> {
        let file = db.catalog().db_file(table_id)?;
        let desc = Arc::new(file.tuple_desc().with_prefix(alias));
        let iter = file.iter(db.buffer_pool().clone(), tid);
        Ok(Self {
            tid,
            table_id,
            alias: alias.to_string(),
            desc,
            iter,
            opened: false,
        })
    }

    /// Scan aliased by the table's catalog name.
    pub fn with_table_name(db: &Database, tid: TransactionId, table_id: TableId) -> DbResult<Self> {
        let name = db.catalog().table_name(table_id)?;
        Self::new(db, tid, table_id, &name)
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.tid
    }
}

impl Executor for SeqScan {
    fn open(&mut self) -> DbResult<()> {
        debug!(
            "[SeqScan::open] table {} as '{}' in tx {}",
            self.table_id, self.alias, self.tid
        );
        self.iter.open()?;
        self.opened = true;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        if !self.opened {
            return Err(not_open("SeqScan"));
        }
        let Some(stored) = self.iter.next()? else {
            return Ok(None);
        };
        let rid = stored.record_id();
        let mut out = Tuple::new(self.desc.clone(), stored.into_fields())?;
        out.set_record_id(rid);
        Ok(Some(out))
    }

    fn rewind(&mut self) -> DbResult<()> {
        if !self.opened {
            return Err(not_open("SeqScan"));
        }
        self.iter.rewind()
    }

    fn close(&mut self) {
        self.iter.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}

/// In-memory tuple source.
pub struct TupleIterator {
    desc: Arc<TupleDesc>,
    tuples: Vec<Tuple>,
    pos: Option<usize>,
}

impl TupleIterator {
    /// Every tuple must match `desc`.
    pub fn new(desc: Arc<TupleDesc>, tuples: Vec<Tuple>) -> DbResult<Self> {
        if let Some(bad) = tuples.iter().find(|t| **t.tuple_desc() != *desc) {
            return Err(DbError::SchemaMismatch(format!(
                "tuple ({}) does not match ({})",
                bad.tuple_desc(),
                desc
            )));
        }
        Ok(Self {
            desc,
            tuples,
            pos: None,
        })
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl Executor for TupleIterator {
    fn open(&mut self) -> DbResult<()> {
        self.pos = Some(0);
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        let pos = self.pos.ok_or_else(|| not_open("TupleIterator"))?;
        match self.tuples.get(pos) {
            Some(t) => {
                self.pos = Some(pos + 1);
                Ok(Some(t.clone()))
            }
            None => Ok(None),
        }
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.open()
    }

    fn close(&mut self) {
        self.pos = None;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
