use std::sync::Arc;

use bedrock::{
    BufferPool, Database, DbError, DbResult, Field, TableId, TransactionId, Tuple, TupleDesc, Type,
};
use log::debug;

use super::{not_open, Executor};

fn count_desc() -> DbResult<Arc<TupleDesc>> {
    Ok(Arc::new(TupleDesc::anonymous(&[Type::Int])?))
}

fn count_tuple(desc: &Arc<TupleDesc>, count: usize) -> DbResult<Tuple> {
    let count = i32::try_from(count)
        .map_err(|_| DbError::Db(format!("row count {} does not fit an INT", count)))?;
    Tuple::new(desc.clone(), vec![Field::Int(count)])
}

/// Inserts every child tuple into a table. The first `next` does all the
/// work and yields a single `(INT)` tuple with the number of rows inserted;
/// later calls yield nothing until rewound.
pub struct Insert {
    tid: TransactionId,
    child: Box<dyn Executor>,
    table_id: TableId,
    table_desc: Arc<TupleDesc>,
    pool: Arc<BufferPool>,
    desc: Arc<TupleDesc>,
    state: DmlState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmlState {
    Closed,
    Ready,
    Done,
}

impl Insert {
    /// Fails with `SchemaMismatch` if the child's schema differs from the table's.
    pub fn new(
        db: &Database,
        tid: TransactionId,
        child: Box<dyn Executor>,
        table_id: TableId,
    ) -> DbResult<Self> {
        let table_desc = db.catalog().tuple_desc(table_id)?;
        if **child.tuple_desc() != *table_desc {
            return Err(DbError::SchemaMismatch(format!(
                "cannot insert ({}) into table {} ({})",
                child.tuple_desc(),
                table_id,
                table_desc
            )));
        }
        Ok(Self {
            tid,
            child,
            table_id,
            table_desc,
            pool: db.buffer_pool().clone(),
            desc: count_desc()?,
            state: DmlState::Closed,
        })
    }
}

impl Executor for Insert {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.state = DmlState::Ready;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        match self.state {
            DmlState::Closed => return Err(not_open("Insert")),
            DmlState::Done => return Ok(None),
            DmlState::Ready => {}
        }
        let mut count = 0;
        while let Some(t) = self.child.next()? {
            let mut row = Tuple::new(self.table_desc.clone(), t.into_fields())?;
            self.pool.insert_tuple(self.tid, self.table_id, &mut row)?;
            count += 1;
        }
        self.state = DmlState::Done;
        debug!(
            "[Insert::next] tx {} inserted {} rows into {}",
            self.tid, count, self.table_id
        );
        count_tuple(&self.desc, count).map(Some)
    }

    fn rewind(&mut self) -> DbResult<()> {
        if self.state == DmlState::Closed {
            return Err(not_open("Insert"));
        }
        self.child.rewind()?;
        self.state = DmlState::Ready;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.state = DmlState::Closed;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}

/// Deletes every child tuple (located by its record id) and yields a single
/// `(INT)` tuple with the number of rows deleted.
pub struct Delete {
    tid: TransactionId,
    child: Box<dyn Executor>,
    pool: Arc<BufferPool>,
    desc: Arc<TupleDesc>,
    state: DmlState,
}

impl Delete {
    pub fn new(db: &Database, tid: TransactionId, child: Box<dyn Executor>) -> DbResult<Self> {
        Ok(Self {
            tid,
            child,
            pool: db.buffer_pool().clone(),
            desc: count_desc()?,
            state: DmlState::Closed,
        })
    }
}

impl Executor for Delete {
    fn open(&mut self) -> DbResult<()> {
        self.child.open()?;
        self.state = DmlState::Ready;
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        match self.state {
            DmlState::Closed => return Err(not_open("Delete")),
            DmlState::Done => return Ok(None),
            DmlState::Ready => {}
        }
        let mut count = 0;
        while let Some(t) = self.child.next()? {
            self.pool.delete_tuple(self.tid, &t)?;
            count += 1;
        }
        self.state = DmlState::Done;
        debug!("[Delete::next] tx {} deleted {} rows", self.tid, count);
        count_tuple(&self.desc, count).map(Some)
    }

    fn rewind(&mut self) -> DbResult<()> {
        if self.state == DmlState::Closed {
            return Err(not_open("Delete"));
        }
        self.child.rewind()?;
        self.state = DmlState::Ready;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.state = DmlState::Closed;
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }
}
