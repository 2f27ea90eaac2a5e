//! Manages page locks for strict two-phase locking.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::transaction::TransactionId;
use crate::PageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    /// Waiting would close a cycle in the waits-for graph.
    Deadlock,
    /// The request waited longer than the configured timeout.
    Timeout,
}

#[derive(Debug)]
struct LockRequest {
    tx_id: TransactionId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockQueue {
    queue: VecDeque<LockRequest>,
    sharing: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
}

impl LockQueue {
    /// True if `tx_id` already holds `mode` or something stronger.
    fn is_held(&self, tx_id: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => self.exclusive == Some(tx_id) || self.sharing.contains(&tx_id),
            LockMode::Exclusive => self.exclusive == Some(tx_id),
        }
    }

    fn is_locked_for(&self, tx_id: TransactionId, mode: LockMode) -> bool {
        if let Some(ex_tx) = self.exclusive {
            if ex_tx != tx_id {
                return true;
            }
        }
        match mode {
            LockMode::Shared => false,
            LockMode::Exclusive => self.sharing.iter().any(|holder| *holder != tx_id),
        }
    }

    /// Grants the lock if compatible and `tx_id` is at the head of the queue.
    fn try_acquire(&mut self, tx_id: TransactionId, mode: LockMode) -> bool {
        if self.is_locked_for(tx_id, mode) {
            return false;
        }
        match self.queue.front() {
            Some(first) if first.tx_id == tx_id => {}
            _ => return false,
        }
        self.queue.pop_front();
        match mode {
            LockMode::Shared => {
                self.sharing.insert(tx_id);
            }
            LockMode::Exclusive => {
                self.sharing.remove(&tx_id);
                self.exclusive = Some(tx_id);
            }
        }
        true
    }

    /// Transactions `tx_id` is waiting on: conflicting holders plus
    /// everyone queued ahead of it.
    fn blockers(&self, tx_id: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut blockers = Vec::new();
        if let Some(ex_holder) = self.exclusive {
            if ex_holder != tx_id {
                blockers.push(ex_holder);
            }
        }
        if mode == LockMode::Exclusive {
            blockers.extend(self.sharing.iter().copied().filter(|h| *h != tx_id));
        }
        for req in &self.queue {
            if req.tx_id == tx_id {
                break;
            }
            if !blockers.contains(&req.tx_id) {
                blockers.push(req.tx_id);
            }
        }
        blockers
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.sharing.is_empty() && self.exclusive.is_none()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<PageId, LockQueue>,
    held: HashMap<TransactionId, HashSet<PageId>>,
    waits_for: HashMap<TransactionId, Vec<TransactionId>>,
}

impl LockTable {
    fn has_cycle_from(&self, start: TransactionId) -> bool {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();
        self.has_cycle_util(start, &mut visited, &mut recursion_stack)
    }

    fn has_cycle_util(
        &self,
        tx_id: TransactionId,
        visited: &mut HashSet<TransactionId>,
        recursion_stack: &mut HashSet<TransactionId>,
    ) -> bool {
        if recursion_stack.contains(&tx_id) {
            return true;
        }
        if !visited.insert(tx_id) {
            return false;
        }
        recursion_stack.insert(tx_id);
        if let Some(waits_for_txs) = self.waits_for.get(&tx_id) {
            for waited_tx in waits_for_txs {
                if self.has_cycle_util(*waited_tx, visited, recursion_stack) {
                    return true;
                }
            }
        }
        recursion_stack.remove(&tx_id);
        false
    }

    /// Withdraws a pending request after the requester gave up.
    fn cancel(&mut self, tx_id: TransactionId, page_id: PageId) {
        self.waits_for.remove(&tx_id);
        if let Some(queue) = self.locks.get_mut(&page_id) {
            queue.queue.retain(|req| req.tx_id != tx_id);
            if queue.is_idle() {
                self.locks.remove(&page_id);
            }
        }
    }

    fn release(&mut self, tx_id: TransactionId, page_id: PageId) -> bool {
        let Some(queue) = self.locks.get_mut(&page_id) else {
            return false;
        };
        let mut changed = queue.sharing.remove(&tx_id);
        if queue.exclusive == Some(tx_id) {
            queue.exclusive = None;
            changed = true;
        }
        queue.queue.retain(|req| req.tx_id != tx_id);
        if queue.is_idle() {
            self.locks.remove(&page_id);
        }
        if let Some(pages) = self.held.get_mut(&tx_id) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&tx_id);
            }
        }
        changed
    }
}

/// Page-granularity shared/exclusive locks.
///
/// Requests are granted FIFO per page; an upgrade from shared to
/// exclusive is queued at the front. A blocked request fails with
/// [`LockError::Deadlock`] when it closes a waits-for cycle (if detection
/// is on) and with [`LockError::Timeout`] once it has waited `timeout`.
#[derive(Debug)]
pub struct LockManager {
    table: Mutex<LockTable>,
    cvar: Condvar,
    timeout: Duration,
    detect_deadlocks: bool,
}

impl LockManager {
    pub fn new(timeout: Duration, detect_deadlocks: bool) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            cvar: Condvar::new(),
            timeout,
            detect_deadlocks,
        }
    }

    pub fn lock(
        &self,
        tx_id: TransactionId,
        page_id: PageId,
        mode: LockMode,
    ) -> Result<(), LockError> {
        let mut guard = self.table.lock();
        {
            let queue = guard.locks.entry(page_id).or_default();
            if queue.is_held(tx_id, mode) {
                return Ok(());
            }
            let request = LockRequest { tx_id, mode };
            if mode == LockMode::Exclusive && queue.sharing.contains(&tx_id) {
                queue.queue.push_front(request);
            } else {
                queue.queue.push_back(request);
            }
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let table = &mut *guard;
            let queue = table.locks.entry(page_id).or_default();
            if queue.try_acquire(tx_id, mode) {
                table.waits_for.remove(&tx_id);
                table.held.entry(tx_id).or_default().insert(page_id);
                trace!("[LockManager::lock] tx {} got {:?} on {}", tx_id, mode, page_id);
                return Ok(());
            }

            if self.detect_deadlocks {
                let blockers = queue.blockers(tx_id, mode);
                table.waits_for.insert(tx_id, blockers);
                if table.has_cycle_from(tx_id) {
                    debug!(
                        "[LockManager::lock] deadlock: tx {} waiting for {:?} on {}",
                        tx_id, mode, page_id
                    );
                    table.cancel(tx_id, page_id);
                    self.cvar.notify_all();
                    return Err(LockError::Deadlock);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(
                    "[LockManager::lock] timeout: tx {} waiting for {:?} on {}",
                    tx_id, mode, page_id
                );
                table.cancel(tx_id, page_id);
                self.cvar.notify_all();
                return Err(LockError::Timeout);
            }
            self.cvar.wait_for(&mut guard, deadline - now);
        }
    }

    /// Releases whatever `tx_id` holds on `page_id`.
    pub fn release(&self, tx_id: TransactionId, page_id: PageId) {
        let mut table = self.table.lock();
        if table.release(tx_id, page_id) {
            self.cvar.notify_all();
        }
    }

    pub fn release_all(&self, tx_id: TransactionId) {
        let mut table = self.table.lock();
        table.waits_for.remove(&tx_id);
        let pages: Vec<PageId> = table
            .held
            .get(&tx_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        for page_id in &pages {
            table.release(tx_id, *page_id);
        }
        table.held.remove(&tx_id);
        if !pages.is_empty() {
            trace!("[LockManager::release_all] tx {} released {} pages", tx_id, pages.len());
        }
        self.cvar.notify_all();
    }

    pub fn holds_lock(&self, tx_id: TransactionId, page_id: PageId) -> bool {
        self.lock_mode(tx_id, page_id).is_some()
    }

    /// The strongest mode `tx_id` holds on `page_id`.
    pub fn lock_mode(&self, tx_id: TransactionId, page_id: PageId) -> Option<LockMode> {
        let table = self.table.lock();
        let queue = table.locks.get(&page_id)?;
        if queue.exclusive == Some(tx_id) {
            Some(LockMode::Exclusive)
        } else if queue.sharing.contains(&tx_id) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    pub fn pages_locked_by(&self, tx_id: TransactionId) -> Vec<PageId> {
        let table = self.table.lock();
        let mut pages: Vec<PageId> = table
            .held
            .get(&tx_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }
}
