//! The buffer pool caches heap pages in memory and is the only way the
//! rest of the system reaches a page.
//!
//! Every page access acquires a page lock for the requesting transaction
//! first. Dirty pages stay resident until their transaction commits
//! (no-steal), so aborting only needs to restore in-memory before-images.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::catalog::Catalog;
use crate::error::{DbError, DbResult};
use crate::lock_manager::{LockManager, LockMode};
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::tuple::Tuple;
use crate::{PageId, TableId};

/// Shared handle to a resident page. Take the latch only for the duration
/// of a page operation, never across a call back into the pool.
pub type PageRef = Arc<RwLock<HeapPage>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl Permissions {
    fn lock_mode(self) -> LockMode {
        match self {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

#[derive(Default)]
struct PoolState {
    pages: HashMap<PageId, PageRef>,
    /// Least recently used first.
    lru: VecDeque<PageId>,
    /// Owner of every resident page dirtied through the pool.
    dirty: HashMap<PageId, TransactionId>,
}

impl PoolState {
    fn touch(&mut self, pid: PageId) {
        if let Some(pos) = self.lru.iter().position(|p| *p == pid) {
            self.lru.remove(pos);
        }
        self.lru.push_back(pid);
    }

    fn remove(&mut self, pid: PageId) -> Option<PageRef> {
        if let Some(pos) = self.lru.iter().position(|p| *p == pid) {
            self.lru.remove(pos);
        }
        self.dirty.remove(&pid);
        self.pages.remove(&pid)
    }

    fn mark_clean(&mut self, pid: PageId, tid: TransactionId) {
        if self.dirty.get(&pid) == Some(&tid) {
            self.dirty.remove(&pid);
        }
    }

    /// Resident pages dirtied by `tid`, or by anyone when `tid` is `None`.
    fn dirty_pages(&self, tid: Option<TransactionId>) -> Vec<PageRef> {
        self.dirty
            .iter()
            .filter(|(_, owner)| tid.map_or(true, |tid| **owner == tid))
            .filter_map(|(pid, _)| self.pages.get(pid).cloned())
            .collect()
    }

    /// Least recently used page that is clean and not referenced outside the pool.
    fn find_victim(&self) -> Option<PageId> {
        self.lru.iter().copied().find(|pid| {
            !self.dirty.contains_key(pid)
                && self.pages.get(pid).is_some_and(|page| {
                    Arc::strong_count(page) == 1
                        && page.try_read().is_some_and(|p| p.is_dirty().is_none())
                })
        })
    }
}

/// Bounded page cache with an approximate LRU replacement policy.
pub struct BufferPool {
    capacity: usize,
    catalog: Arc<Catalog>,
    lock_manager: LockManager,
    state: Mutex<PoolState>,
}

impl BufferPool {
    pub fn new(capacity: usize, catalog: Arc<Catalog>, lock_manager: LockManager) -> Self {
        Self {
            capacity,
            catalog,
            lock_manager,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Locks `pid` for `tid` (shared for `ReadOnly`, exclusive for
    /// `ReadWrite`), then returns the resident page, loading it if needed.
    ///
    /// If the lock cannot be granted the transaction is rolled back, its
    /// locks are released and `TransactionAborted` is returned.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> DbResult<PageRef> {
        if let Err(e) = self.lock_manager.lock(tid, pid, perm.lock_mode()) {
            warn!(
                "[BufferPool::get_page] aborting tx {} on {} ({:?})",
                tid, pid, e
            );
            self.transaction_complete(tid, false)?;
            return Err(DbError::TransactionAborted(tid));
        }

        let mut state = self.state.lock();
        if let Some(page) = state.pages.get(&pid).cloned() {
            state.touch(pid);
            return Ok(page);
        }

        while state.pages.len() >= self.capacity {
            self.evict_page(&mut state)?;
        }

        let file = self.catalog.db_file(pid.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(pid)?));
        state.pages.insert(pid, page.clone());
        state.touch(pid);
        Ok(page)
    }

    fn evict_page(&self, state: &mut PoolState) -> DbResult<()> {
        let victim = state.find_victim().ok_or_else(|| {
            DbError::Db(format!(
                "buffer pool full: all {} resident pages are dirty or in use",
                state.pages.len()
            ))
        })?;
        state.remove(victim);
        debug!("[BufferPool::evict_page] evicted {}", victim);
        Ok(())
    }

    /// Inserts `tuple` into table `table_id` on behalf of `tid` and marks the
    /// touched pages dirty.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> DbResult<()> {
        let file = self.catalog.db_file(table_id)?;
        let pages = file.insert_tuple(self, tid, tuple)?;
        for page in pages {
            self.install_dirty(tid, page);
        }
        Ok(())
    }

    /// Deletes `tuple` from the table its record id points into.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> DbResult<()> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotPresent("tuple has no record id".to_string()))?;
        let file = self.catalog.db_file(rid.page_id.table_id)?;
        let page = file.delete_tuple(self, tid, tuple)?;
        self.install_dirty(tid, page);
        Ok(())
    }

    /// Marks `page` dirty and makes sure this exact object is the resident copy.
    fn install_dirty(&self, tid: TransactionId, page: PageRef) {
        let pid = {
            let mut guard = page.write();
            guard.mark_dirty(true, tid);
            guard.id()
        };
        let mut state = self.state.lock();
        let resident = state
            .pages
            .get(&pid)
            .is_some_and(|current| Arc::ptr_eq(current, &page));
        if !resident {
            state.pages.insert(pid, page);
        }
        state.dirty.insert(pid, tid);
        state.touch(pid);
    }

    /// Releases `tid`'s lock on a single page before the transaction ends.
    /// This breaks two-phase locking; use with care.
    pub fn release_page(&self, tid: TransactionId, pid: PageId) {
        self.lock_manager.release(tid, pid);
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.lock_manager.holds_lock(tid, pid)
    }

    /// Commits or aborts `tid`. Commit writes every page it dirtied; abort
    /// restores their before-images. Either way its locks are released.
    ///
    /// A failed commit write leaves the remaining pages dirty and the locks
    /// held, so the caller may retry or abort. Finishing an already-finished
    /// transaction is a no-op.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> DbResult<()> {
        if commit {
            self.flush_pages(tid)?;
        } else {
            for page in self.pages_dirtied_by(tid) {
                let mut guard = page.write();
                let pid = guard.id();
                if guard.is_dirty() == Some(tid) {
                    let restored = guard.before_image()?;
                    *guard = restored;
                    debug!("[BufferPool::transaction_complete] restored {}", pid);
                }
                drop(guard);
                self.state.lock().mark_clean(pid, tid);
            }
        }
        self.lock_manager.release_all(tid);
        debug!(
            "[BufferPool::transaction_complete] tx {} {}",
            tid,
            if commit { "committed" } else { "aborted" }
        );
        Ok(())
    }

    /// Writes every page dirtied by `tid` and makes it the new before-image.
    pub fn flush_pages(&self, tid: TransactionId) -> DbResult<()> {
        for page in self.pages_dirtied_by(tid) {
            let mut guard = page.write();
            let pid = guard.id();
            if guard.is_dirty() == Some(tid) {
                let file = self.catalog.db_file(pid.table_id)?;
                file.write_page(&guard)?;
                guard.mark_dirty(false, tid);
                guard.set_before_image();
            }
            drop(guard);
            self.state.lock().mark_clean(pid, tid);
        }
        Ok(())
    }

    /// Writes every dirty resident page regardless of owner and marks it
    /// clean. Uncommitted changes written this way can no longer be rolled back.
    pub fn flush_all_pages(&self) -> DbResult<()> {
        let dirty = self.state.lock().dirty_pages(None);
        for page in dirty {
            let mut guard = page.write();
            let pid = guard.id();
            if let Some(owner) = guard.is_dirty() {
                let file = self.catalog.db_file(pid.table_id)?;
                file.write_page(&guard)?;
                guard.mark_dirty(false, owner);
                drop(guard);
                self.state.lock().mark_clean(pid, owner);
            }
        }
        Ok(())
    }

    /// Drops a page from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        self.state.lock().remove(pid);
    }

    pub fn num_resident(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn is_resident(&self, pid: PageId) -> bool {
        self.state.lock().pages.contains_key(&pid)
    }

    /// Pages dirtied by `tid`. Clean pages are never cloned here, so a
    /// commit in flight does not pin eviction candidates.
    fn pages_dirtied_by(&self, tid: TransactionId) -> Vec<PageRef> {
        self.state.lock().dirty_pages(Some(tid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, DatabaseConfig};
    use crate::heap_file::HeapFile;
    use crate::tuple::TupleDesc;
    use crate::types::{Field, Type};
    use std::thread;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        db: Database,
        file: Arc<HeapFile>,
        desc: Arc<TupleDesc>,
    }

    /// A table with `pages` pages, each holding one tuple `(page_no, 0)`.
    fn fixture(num_pages: usize, pages: u32) -> Fixture {
        let dir = tempdir().unwrap();
        let desc = Arc::new(TupleDesc::new(&[Type::Int, Type::Int], &["a", "b"]).unwrap());
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap());
        for page_no in 0..pages {
            let pid = PageId::new(file.id(), page_no);
            let mut page = HeapPage::new(pid, desc.clone(), &HeapPage::empty_page_data()).unwrap();
            let mut t =
                Tuple::new(desc.clone(), vec![Field::Int(page_no as i32), Field::Int(0)]).unwrap();
            page.insert_tuple(&mut t).unwrap();
            file.write_page(&page).unwrap();
        }
        let db = Database::new(DatabaseConfig {
            num_pages,
            lock_timeout: Duration::from_millis(100),
            ..DatabaseConfig::default()
        });
        db.catalog().add_table(file.clone(), "t");
        Fixture {
            _dir: dir,
            db,
            file,
            desc,
        }
    }

    fn first_tuple(pool: &BufferPool, tid: TransactionId, pid: PageId) -> Tuple {
        let page = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        let tuple = page.read().iter().next().cloned().unwrap();
        tuple
    }

    #[test]
    fn test_get_page_caches_and_locks() {
        let fx = fixture(4, 2);
        let pool = fx.db.buffer_pool();
        let tid = TransactionId::new();
        let pid = PageId::new(fx.file.id(), 0);

        let a = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        let b = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(pool.holds_lock(tid, pid));
        assert_eq!(pool.num_resident(), 1);

        pool.transaction_complete(tid, true).unwrap();
        assert!(!pool.holds_lock(tid, pid));
    }

    #[test]
    fn test_clean_pages_are_evicted_lru() {
        let fx = fixture(2, 3);
        let pool = fx.db.buffer_pool();
        let tid = TransactionId::new();
        let pids: Vec<PageId> = (0..3).map(|n| PageId::new(fx.file.id(), n)).collect();

        pool.get_page(tid, pids[0], Permissions::ReadOnly).unwrap();
        pool.get_page(tid, pids[1], Permissions::ReadOnly).unwrap();
        pool.get_page(tid, pids[0], Permissions::ReadOnly).unwrap();
        pool.get_page(tid, pids[2], Permissions::ReadOnly).unwrap();

        assert_eq!(pool.num_resident(), 2);
        assert!(pool.is_resident(pids[0]));
        assert!(!pool.is_resident(pids[1]));
        assert!(pool.is_resident(pids[2]));
        pool.transaction_complete(tid, true).unwrap();
    }

    #[test]
    fn test_dirty_pages_are_never_evicted() {
        let fx = fixture(2, 3);
        let pool = fx.db.buffer_pool();
        let tid = TransactionId::new();
        let pids: Vec<PageId> = (0..3).map(|n| PageId::new(fx.file.id(), n)).collect();

        for pid in &pids[..2] {
            let tuple = first_tuple(pool, tid, *pid);
            pool.delete_tuple(tid, &tuple).unwrap();
        }
        let err = pool
            .get_page(tid, pids[2], Permissions::ReadOnly)
            .unwrap_err();
        assert!(matches!(err, DbError::Db(_)));

        pool.transaction_complete(tid, false).unwrap();
        let tid2 = TransactionId::new();
        assert!(pool.get_page(tid2, pids[2], Permissions::ReadOnly).is_ok());
        pool.transaction_complete(tid2, true).unwrap();
    }

    #[test]
    fn test_abort_restores_before_image() {
        let fx = fixture(4, 1);
        let pool = fx.db.buffer_pool();
        let table = fx.file.id();
        let tid = TransactionId::new();

        let mut t = Tuple::new(fx.desc.clone(), vec![Field::Int(42), Field::Int(42)]).unwrap();
        pool.insert_tuple(tid, table, &mut t).unwrap();
        let pid = t.record_id().unwrap().page_id;
        let page = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().iter().count(), 2);
        drop(page);

        pool.transaction_complete(tid, false).unwrap();
        // idempotent
        pool.transaction_complete(tid, false).unwrap();

        let tid2 = TransactionId::new();
        let page = pool.get_page(tid2, pid, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().iter().count(), 1);
        assert!(page.read().is_dirty().is_none());
        pool.transaction_complete(tid2, true).unwrap();
    }

    #[test]
    fn test_commit_writes_through() {
        let fx = fixture(4, 1);
        let pool = fx.db.buffer_pool();
        let tid = TransactionId::new();
        let mut t = Tuple::new(fx.desc.clone(), vec![Field::Int(5), Field::Int(6)]).unwrap();
        pool.insert_tuple(tid, fx.file.id(), &mut t).unwrap();
        pool.transaction_complete(tid, true).unwrap();

        let on_disk = fx.file.read_page(PageId::new(fx.file.id(), 0)).unwrap();
        assert_eq!(on_disk.iter().count(), 2);
        let page = pool
            .get_page(TransactionId::new(), PageId::new(fx.file.id(), 0), Permissions::ReadOnly)
            .unwrap();
        assert!(page.read().is_dirty().is_none());
    }

    #[test]
    fn test_lock_failure_aborts_transaction() {
        let fx = fixture(4, 2);
        let pool = fx.db.buffer_pool();
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let p0 = PageId::new(fx.file.id(), 0);

        let mut t = Tuple::new(fx.desc.clone(), vec![Field::Int(9), Field::Int(9)]).unwrap();
        pool.insert_tuple(t2, fx.file.id(), &mut t).unwrap();
        pool.get_page(t1, PageId::new(fx.file.id(), 1), Permissions::ReadWrite)
            .unwrap();

        // t1 cannot read page 0 while t2 holds it exclusively; it times out and is rolled back.
        let err = pool.get_page(t1, p0, Permissions::ReadOnly).unwrap_err();
        assert!(err.is_aborted());
        assert!(!pool.holds_lock(t1, PageId::new(fx.file.id(), 1)));
        assert!(pool.holds_lock(t2, p0));
        pool.transaction_complete(t1, false).unwrap();
        pool.transaction_complete(t2, true).unwrap();
    }

    #[test]
    fn test_delete_marks_dirty() {
        let fx = fixture(4, 1);
        let pool = fx.db.buffer_pool();
        let tid = TransactionId::new();
        let pid = PageId::new(fx.file.id(), 0);
        let victim = pool
            .get_page(tid, pid, Permissions::ReadOnly)
            .unwrap()
            .read()
            .iter()
            .next()
            .cloned()
            .unwrap();
        pool.delete_tuple(tid, &victim).unwrap();
        let page = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
        assert_eq!(page.read().is_dirty(), Some(tid));
        assert_eq!(page.read().iter().count(), 0);
        drop(page);
        pool.transaction_complete(tid, true).unwrap();
        assert_eq!(fx.file.read_page(pid).unwrap().iter().count(), 0);
    }

    #[test]
    fn test_commit_in_flight_does_not_pin_clean_pages() {
        let fx = fixture(2, 3);
        let pool = fx.db.buffer_pool().clone();
        let (reader, committer) = (TransactionId::new(), TransactionId::new());
        let pids: Vec<PageId> = (0..3).map(|n| PageId::new(fx.file.id(), n)).collect();

        let latched = pool.get_page(reader, pids[0], Permissions::ReadOnly).unwrap();
        pool.get_page(reader, pids[1], Permissions::ReadOnly).unwrap();
        let guard = latched.write();

        let committing = {
            let pool = pool.clone();
            thread::spawn(move || pool.transaction_complete(committer, true))
        };
        thread::sleep(Duration::from_millis(50));

        // page 1 is clean and unreferenced, so it must be the victim
        let tid = TransactionId::new();
        assert!(pool.get_page(tid, pids[2], Permissions::ReadOnly).is_ok());
        assert!(!pool.is_resident(pids[1]));

        drop(guard);
        committing.join().unwrap().unwrap();
        pool.transaction_complete(tid, true).unwrap();
        pool.transaction_complete(reader, true).unwrap();
    }

    #[test]
    fn test_flush_all_in_flight_does_not_pin_clean_pages() {
        let fx = fixture(2, 3);
        let pool = fx.db.buffer_pool().clone();
        let writer = TransactionId::new();
        let pids: Vec<PageId> = (0..3).map(|n| PageId::new(fx.file.id(), n)).collect();

        let tuple = first_tuple(&pool, writer, pids[0]);
        pool.delete_tuple(writer, &tuple).unwrap();
        pool.get_page(writer, pids[1], Permissions::ReadOnly).unwrap();
        let dirty = pool.get_page(writer, pids[0], Permissions::ReadWrite).unwrap();
        let guard = dirty.write();

        // blocks on the latched dirty page
        let flushing = {
            let pool = pool.clone();
            thread::spawn(move || pool.flush_all_pages())
        };
        thread::sleep(Duration::from_millis(50));

        let tid = TransactionId::new();
        assert!(pool.get_page(tid, pids[2], Permissions::ReadOnly).is_ok());
        assert!(pool.is_resident(pids[0]));
        assert!(!pool.is_resident(pids[1]));

        drop(guard);
        drop(dirty);
        flushing.join().unwrap().unwrap();
        assert_eq!(fx.file.read_page(pids[0]).unwrap().iter().count(), 0);
        pool.transaction_complete(tid, true).unwrap();
        pool.transaction_complete(writer, true).unwrap();
    }

    #[test]
    fn test_eviction_under_concurrent_readers() {
        let fx = fixture(3, 8);
        let pool = fx.db.buffer_pool().clone();
        let table = fx.file.id();

        let handles: Vec<_> = (0..2u32)
            .map(|worker| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for round in 0..20u32 {
                        let tid = TransactionId::new();
                        let pid = PageId::new(table, (worker + round) % 8);
                        let page = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
                        assert_eq!(page.read().iter().count(), 1);
                        drop(page);
                        pool.transaction_complete(tid, true).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.num_resident() <= 3);
    }
}
