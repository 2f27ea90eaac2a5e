pub mod buffer_pool;

pub mod catalog;

pub mod database;

pub mod error;

pub mod failpoint;

pub mod heap_file;

pub mod lock_manager;

pub mod page;

pub mod transaction;

pub mod tuple;

pub mod types;

use std::fmt;

/// Bytes per page, header included.
pub const PAGE_SIZE: usize = 4096;

/// Default number of resident pages in the buffer pool.
pub const DEFAULT_PAGES: usize = 50;

pub type TableId = u32;

/// Identifies a page of a table: `(table_id, page_number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId {
    pub table_id: TableId,
    pub page_no: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_no: u32) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

/// Identifies a tuple slot on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.page_id, self.slot)
    }
}

pub use buffer_pool::{BufferPool, PageRef, Permissions};
pub use catalog::Catalog;
pub use database::{Database, DatabaseConfig};
pub use error::{DbError, DbResult};
pub use heap_file::{DbFileIterator, HeapFile, HeapFileIterator};
pub use page::HeapPage;
pub use transaction::{Transaction, TransactionId};
pub use tuple::{Tuple, TupleDesc};
pub use types::{Field, Op, Type, STRING_LEN};
