//! Error kinds raised by the storage kernel.

use thiserror::Error;

use crate::transaction::TransactionId;
use crate::PageId;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Raised by `HeapPage::insert_tuple`; `HeapFile` recovers from it.
    #[error("no empty slot on page {0}")]
    NoSpace(PageId),

    #[error("tuple not present: {0}")]
    NotPresent(String),

    #[error("{0}")]
    Db(String),

    #[error("transaction {0} aborted")]
    TransactionAborted(TransactionId),

    #[error("unsupported operation: {0}")]
    UnsupportedOp(String),

    #[error("no such element: {0}")]
    NoSuchElement(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, DbError::TransactionAborted(_))
    }
}
