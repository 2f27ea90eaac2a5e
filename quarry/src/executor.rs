//! The query executor.
//!
//! Operators form a tree and are driven from the root: each call to
//! [`Executor::next`] pulls as many tuples from the children as it needs
//! to produce one of its own.

use std::sync::Arc;

use bedrock::{DbError, DbResult, Tuple, TupleDesc};

mod dml;
mod pipeline;
mod scan;

pub use dml::{Delete, Insert};
pub use pipeline::{Filter, Project};
pub use scan::{SeqScan, TupleIterator};

pub trait Executor {
    fn open(&mut self) -> DbResult<()>;

    /// The next output tuple, or `Ok(None)` when exhausted. Calling this
    /// before [`Executor::open`] fails with `NoSuchElement`.
    fn next(&mut self) -> DbResult<Option<Tuple>>;

    /// Restarts from the first tuple.
    fn rewind(&mut self) -> DbResult<()>;

    fn close(&mut self);

    fn tuple_desc(&self) -> &Arc<TupleDesc>;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn open(&mut self) -> DbResult<()> {
        (**self).open()
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        (**self).next()
    }

    fn rewind(&mut self) -> DbResult<()> {
        (**self).rewind()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn tuple_desc(&self) -> &Arc<TupleDesc> {
        (**self).tuple_desc()
    }
}

pub(crate) fn not_open(operator: &str) -> DbError {
    DbError::NoSuchElement(format!("{} is not open", operator))
}

/// Drains an open executor.
pub fn collect_all<E: Executor + ?Sized>(exec: &mut E) -> DbResult<Vec<Tuple>> {
    let mut rows = Vec::new();
    while let Some(t) = exec.next()? {
        rows.push(t);
    }
    Ok(rows)
}

/// `has_next`/`next` view over an executor, peeking one tuple ahead.
pub struct Cursor<E: Executor> {
    inner: E,
    peeked: Option<Tuple>,
}

impl<E: Executor> Cursor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    pub fn open(&mut self) -> DbResult<()> {
        self.peeked = None;
        self.inner.open()
    }

    pub fn has_next(&mut self) -> DbResult<bool> {
        if self.peeked.is_none() {
            self.peeked = self.inner.next()?;
        }
        Ok(self.peeked.is_some())
    }

    /// Fails with `NoSuchElement` past the end.
    pub fn next(&mut self) -> DbResult<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoSuchElement("no more tuples".to_string()));
        }
        self.peeked
            .take()
            .ok_or_else(|| DbError::NoSuchElement("no more tuples".to_string()))
    }

    pub fn rewind(&mut self) -> DbResult<()> {
        self.peeked = None;
        self.inner.rewind()
    }

    pub fn close(&mut self) {
        self.peeked = None;
        self.inner.close();
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        self.inner.tuple_desc()
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}
