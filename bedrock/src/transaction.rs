//! Transaction identities and a small begin/commit/abort handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::database::Database;
use crate::error::DbResult;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A running transaction. Dropping it without finishing aborts it.
pub struct Transaction {
    id: TransactionId,
    db: Database,
    finished: bool,
}

impl Transaction {
    pub fn begin(db: &Database) -> Self {
        let id = TransactionId::new();
        debug!("[Transaction::begin] tx {}", id);
        Self {
            id,
            db: db.clone(),
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Flushes this transaction's pages and releases its locks.
    /// On error the transaction stays open and may be retried or aborted.
    pub fn commit(&mut self) -> DbResult<()> {
        self.db.buffer_pool().transaction_complete(self.id, true)?;
        self.finished = true;
        Ok(())
    }

    pub fn abort(&mut self) -> DbResult<()> {
        self.db.buffer_pool().transaction_complete(self.id, false)?;
        self.finished = true;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.db.buffer_pool().transaction_complete(self.id, false) {
                warn!("[Transaction::drop] abort of tx {} failed: {}", self.id, e);
            }
        }
    }
}
