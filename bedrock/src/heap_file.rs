//! A table stored as an unordered sequence of heap pages in one file.
use std::fs::{create_dir_all, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, PageRef, Permissions};
use crate::error::{DbError, DbResult};
use crate::failpoint::{self, Failpoint};
use crate::page::HeapPage;
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::{PageId, TableId, PAGE_SIZE};

/// Backing file of one table. Page `n` occupies bytes
/// `[n * PAGE_SIZE, (n + 1) * PAGE_SIZE)`.
pub struct HeapFile {
    path: PathBuf,
    id: TableId,
    desc: Arc<TupleDesc>,
    io_lock: Mutex<()>,
}

impl HeapFile {
    /// Opens the file, creating it and its parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P, desc: Arc<TupleDesc>) -> DbResult<Self> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let path = path_ref.canonicalize()?;
        let id = crc32fast::hash(path.to_string_lossy().as_bytes());
        debug!("[HeapFile::open] {:?} as table {}", path, id);
        Ok(Self {
            path,
            id,
            desc,
            io_lock: Mutex::new(()),
        })
    }

    /// Stable for a given absolute path.
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    /// Whole pages on disk. A torn trailing page is not counted.
    pub fn num_pages(&self) -> DbResult<u32> {
        let len = std::fs::metadata(&self.path)?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }

    /// Reads page `pid` straight from disk, bypassing the buffer pool.
    pub fn read_page(&self, pid: PageId) -> DbResult<HeapPage> {
        if pid.table_id != self.id {
            return Err(DbError::Db(format!(
                "page {} does not belong to table {}",
                pid, self.id
            )));
        }
        failpoint::check(Failpoint::HeapFileRead)?;
        let mut data = vec![0u8; PAGE_SIZE];
        {
            let _io = self.io_lock.lock();
            let mut file = OpenOptions::new().read(true).open(&self.path)?;
            file.seek(SeekFrom::Start(pid.page_no as u64 * PAGE_SIZE as u64))?;
            file.read_exact(&mut data)?;
        }
        trace!("[HeapFile::read_page] read {}", pid);
        HeapPage::new(pid, self.desc.clone(), &data)
    }

    /// Writes the page at its offset, extending the file if needed.
    pub fn write_page(&self, page: &HeapPage) -> DbResult<()> {
        let pid = page.id();
        if pid.table_id != self.id {
            return Err(DbError::Db(format!(
                "page {} does not belong to table {}",
                pid, self.id
            )));
        }
        failpoint::check(Failpoint::HeapFileWrite)?;
        let data = page.serialize();
        let _io = self.io_lock.lock();
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(pid.page_no as u64 * PAGE_SIZE as u64))?;
        file.write_all(&data)?;
        file.sync_data()?;
        trace!("[HeapFile::write_page] wrote {}", pid);
        Ok(())
    }

    /// Appends one all-zero page and returns its id.
    fn append_empty_page(&self) -> DbResult<PageId> {
        let _io = self.io_lock.lock();
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let len = file.metadata()?.len();
        let page_no = len.div_ceil(PAGE_SIZE as u64) as u32;
        file.seek(SeekFrom::Start(page_no as u64 * PAGE_SIZE as u64))?;
        file.write_all(&HeapPage::empty_page_data())?;
        file.sync_data()?;
        let pid = PageId::new(self.id, page_no);
        debug!("[HeapFile::append_empty_page] appended {}", pid);
        Ok(pid)
    }

    /// Puts `tuple` into the first page with a free slot, appending a page if
    /// every existing one is full. Pages are fetched read-write through `pool`.
    /// Returns the modified pages; marking them dirty is the caller's job.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &mut Tuple,
    ) -> DbResult<Vec<PageRef>> {
        if **tuple.tuple_desc() != *self.desc {
            return Err(DbError::SchemaMismatch(format!(
                "tuple schema ({}) differs from table schema ({})",
                tuple.tuple_desc(),
                self.desc
            )));
        }
        if HeapPage::slots_per_page(&self.desc) == 0 {
            return Err(DbError::Db(format!(
                "tuple too large: {} bytes do not fit on a page",
                self.desc.size()
            )));
        }

        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.id, page_no);
            let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let inserted = page.write().insert_tuple(tuple);
            match inserted {
                Ok(_) => return Ok(vec![page]),
                Err(DbError::NoSpace(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        let pid = self.append_empty_page()?;
        let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        let inserted = page.write().insert_tuple(tuple);
        inserted?;
        Ok(vec![page])
    }

    /// Removes `tuple` from the page named by its record id.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> DbResult<PageRef> {
        let rid = tuple
            .record_id()
            .ok_or_else(|| DbError::NotPresent("tuple has no record id".to_string()))?;
        if rid.page_id.table_id != self.id {
            return Err(DbError::NotPresent(format!(
                "record {} is not in table {}",
                rid, self.id
            )));
        }
        let page = pool.get_page(tid, rid.page_id, Permissions::ReadWrite)?;
        let deleted = page.write().delete_tuple(tuple);
        deleted?;
        Ok(page)
    }

    /// Iterates every tuple in page order, reading pages through `pool`
    /// with shared locks held by `tid`.
    pub fn iter(self: &Arc<Self>, pool: Arc<BufferPool>, tid: TransactionId) -> HeapFileIterator {
        HeapFileIterator {
            file: self.clone(),
            pool,
            tid,
            cursor: None,
            num_pages: 0,
        }
    }
}

impl std::fmt::Debug for HeapFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapFile")
            .field("path", &self.path)
            .field("id", &self.id)
            .field("desc", &self.desc.to_string())
            .finish()
    }
}

/// Pull-style iteration over a table file.
pub trait DbFileIterator {
    fn open(&mut self) -> DbResult<()>;

    /// `Ok(None)` once exhausted. Errors if the iterator is not open.
    fn next(&mut self) -> DbResult<Option<Tuple>>;

    fn rewind(&mut self) -> DbResult<()>;

    fn close(&mut self);
}

/// Walks `(page, slot)` positions; never holds a page latch across calls.
pub struct HeapFileIterator {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    cursor: Option<(u32, usize)>,
    num_pages: u32,
}

impl DbFileIterator for HeapFileIterator {
    fn open(&mut self) -> DbResult<()> {
        self.num_pages = self.file.num_pages()?;
        self.cursor = Some((0, 0));
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Tuple>> {
        let Some((mut page_no, mut slot)) = self.cursor else {
            return Err(DbError::NoSuchElement("iterator is not open".to_string()));
        };
        while page_no < self.num_pages {
            let pid = PageId::new(self.file.id(), page_no);
            let page = self.pool.get_page(self.tid, pid, Permissions::ReadOnly)?;
            let guard = page.read();
            if let Some(used) = guard.next_used_slot(slot) {
                self.cursor = Some((page_no, used + 1));
                return Ok(guard.tuple_at(used).cloned());
            }
            page_no += 1;
            slot = 0;
            self.cursor = Some((page_no, slot));
        }
        Ok(None)
    }

    fn rewind(&mut self) -> DbResult<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, DatabaseConfig};
    use crate::types::{Field, Type};
    use tempfile::tempdir;

    fn two_ints() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(&[Type::Int, Type::Int], &["a", "b"]).unwrap())
    }

    fn row(desc: &Arc<TupleDesc>, a: i32, b: i32) -> Tuple {
        Tuple::new(desc.clone(), vec![Field::Int(a), Field::Int(b)]).unwrap()
    }

    #[test]
    fn test_open_creates_empty_file() {
        let dir = tempdir().unwrap();
        let file = HeapFile::open(dir.path().join("sub/t.dat"), two_ints()).unwrap();
        assert_eq!(file.num_pages().unwrap(), 0);
        let again = HeapFile::open(dir.path().join("sub/t.dat"), two_ints()).unwrap();
        assert_eq!(file.id(), again.id());
        let other = HeapFile::open(dir.path().join("u.dat"), two_ints()).unwrap();
        assert_ne!(file.id(), other.id());
    }

    #[test]
    fn test_partial_trailing_page_is_not_counted() {
        let dir = tempdir().unwrap();
        let file = HeapFile::open(dir.path().join("t.dat"), two_ints()).unwrap();
        let mut raw = OpenOptions::new().append(true).open(file.path()).unwrap();
        raw.write_all(&vec![0u8; PAGE_SIZE + 10]).unwrap();
        assert_eq!(file.num_pages().unwrap(), 1);
    }

    #[test]
    fn test_write_then_read_page() {
        let dir = tempdir().unwrap();
        let desc = two_ints();
        let file = HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap();
        let pid = PageId::new(file.id(), 0);
        let mut page = HeapPage::new(pid, desc.clone(), &HeapPage::empty_page_data()).unwrap();
        let mut t = row(&desc, 7, 8);
        page.insert_tuple(&mut t).unwrap();
        file.write_page(&page).unwrap();

        assert_eq!(file.num_pages().unwrap(), 1);
        let back = file.read_page(pid).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_read_past_end_is_io_error() {
        let dir = tempdir().unwrap();
        let file = HeapFile::open(dir.path().join("t.dat"), two_ints()).unwrap();
        let err = file.read_page(PageId::new(file.id(), 3)).unwrap_err();
        assert!(matches!(err, DbError::Io(_)));
    }

    #[test]
    fn test_read_failpoint() {
        let dir = tempdir().unwrap();
        let desc = two_ints();
        let file = HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap();
        let pid = PageId::new(file.id(), 0);
        let page = HeapPage::new(pid, desc, &HeapPage::empty_page_data()).unwrap();
        file.write_page(&page).unwrap();

        let _armed = failpoint::arm(Failpoint::HeapFileRead);
        assert!(matches!(file.read_page(pid), Err(DbError::Io(_))));
    }

    #[test]
    fn test_insert_fills_pages_in_order() {
        let dir = tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        let desc = two_ints();
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap());
        db.catalog().add_table(file.clone(), "t");
        let pool = db.buffer_pool();
        let tid = TransactionId::new();

        let slots = HeapPage::slots_per_page(&desc);
        let mut last_pages = Vec::new();
        for i in 0..(slots + 1) as i32 {
            let mut t = row(&desc, i, i);
            let pages = file.insert_tuple(pool, tid, &mut t).unwrap();
            last_pages = pages.iter().map(|p| p.read().id()).collect();
            if i == 0 {
                assert_eq!(t.record_id().unwrap().page_id.page_no, 0);
            }
        }
        assert_eq!(last_pages, vec![PageId::new(file.id(), 1)]);
        assert_eq!(file.num_pages().unwrap(), 2);
        pool.transaction_complete(tid, false).unwrap();
    }

    #[test]
    fn test_insert_rejects_wrong_schema() {
        let dir = tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), two_ints()).unwrap());
        db.catalog().add_table(file.clone(), "t");
        let one = Arc::new(TupleDesc::anonymous(&[Type::Int]).unwrap());
        let mut t = Tuple::new(one, vec![Field::Int(1)]).unwrap();
        let err = file
            .insert_tuple(db.buffer_pool(), TransactionId::new(), &mut t)
            .unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch(_)));
    }

    #[test]
    fn test_insert_tuple_too_large() {
        let dir = tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        let wide = Arc::new(TupleDesc::anonymous(&[Type::String; 32]).unwrap());
        let file = Arc::new(HeapFile::open(dir.path().join("w.dat"), wide.clone()).unwrap());
        db.catalog().add_table(file.clone(), "w");
        let mut t = Tuple::new(wide, vec![Field::string("x"); 32]).unwrap();
        let err = file
            .insert_tuple(db.buffer_pool(), TransactionId::new(), &mut t)
            .unwrap_err();
        assert!(matches!(err, DbError::Db(_)));
        assert_eq!(file.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_delete_requires_record_id() {
        let dir = tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        let desc = two_ints();
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap());
        db.catalog().add_table(file.clone(), "t");
        let t = row(&desc, 1, 2);
        let err = file
            .delete_tuple(db.buffer_pool(), TransactionId::new(), &t)
            .unwrap_err();
        assert!(matches!(err, DbError::NotPresent(_)));
    }

    #[test]
    fn test_iterator_skips_empty_pages_and_rewinds() {
        let dir = tempdir().unwrap();
        let db = Database::new(DatabaseConfig::default());
        let desc = two_ints();
        let file = Arc::new(HeapFile::open(dir.path().join("t.dat"), desc.clone()).unwrap());
        db.catalog().add_table(file.clone(), "t");

        // page 0 empty, page 1 holds two rows
        let blank = HeapPage::empty_page_data();
        let empty = HeapPage::new(PageId::new(file.id(), 0), desc.clone(), &blank).unwrap();
        file.write_page(&empty).unwrap();
        let mut full = HeapPage::new(PageId::new(file.id(), 1), desc.clone(), &blank).unwrap();
        full.insert_tuple(&mut row(&desc, 1, 10)).unwrap();
        full.insert_tuple(&mut row(&desc, 2, 20)).unwrap();
        file.write_page(&full).unwrap();

        let tid = TransactionId::new();
        let mut it = file.iter(db.buffer_pool().clone(), tid);
        assert!(it.next().is_err());
        it.open().unwrap();
        let mut seen = Vec::new();
        while let Some(t) = it.next().unwrap() {
            seen.push(t.field(0).unwrap().clone());
        }
        assert_eq!(seen, vec![Field::Int(1), Field::Int(2)]);
        assert!(it.next().unwrap().is_none());

        it.rewind().unwrap();
        assert_eq!(it.next().unwrap().unwrap().field(1).unwrap(), &Field::Int(10));
        it.close();
        assert!(it.next().is_err());
        db.buffer_pool().transaction_complete(tid, true).unwrap();
    }
}
