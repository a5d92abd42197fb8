use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::buffer_pool::{BufferPool, PageRef, Permissions};
use crate::error::{DbError, Result};
use crate::page::{HeapPage, PageId};
use crate::transaction::TransactionId;
use crate::tuple::{Tuple, TupleDesc};
use crate::PAGE_SIZE;

/// A table's storage. The buffer pool and the iterators depend only on this
/// interface; [`HeapFile`] is its one implementation.
pub trait DbFile: Send + Sync {
    /// The table id, stable for the life of the process.
    fn id(&self) -> u32;

    fn tuple_desc(&self) -> &TupleDesc;

    /// Reads the page's bytes from disk and parses them. Does not consult or
    /// populate the buffer pool.
    fn read_page(&self, pid: PageId) -> Result<HeapPage>;

    /// Writes the page's serialized image back to its file position.
    fn write_page(&self, page: &HeapPage) -> Result<()>;

    fn num_pages(&self) -> Result<usize>;

    /// Inserts `t` somewhere in the file, locking pages through `pool` under
    /// `tid`. Returns the pages it modified; the caller marks them dirty.
    fn insert_tuple(
        &self,
        tid: TransactionId,
        t: &mut Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageRef>>;

    /// Deletes `t` from the page named by its record id. Returns the pages it
    /// modified; the caller marks them dirty.
    fn delete_tuple(
        &self,
        tid: TransactionId,
        t: &mut Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageRef>>;
}

fn table_id_for_path(path: &Path) -> u32 {
    // FNV-1a over the path bytes; the id only has to be stable and distinct
    // within one process, like the original file-path hash.
    let mut h: u32 = 0x811c_9dc5;
    for b in path.to_string_lossy().as_bytes() {
        h ^= u32::from(*b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// A table stored as a file of pages in no particular tuple order.
pub struct HeapFile {
    file: Mutex<File>,
    path: PathBuf,
    td: TupleDesc,
    id: u32,
}

impl HeapFile {
    /// Opens (creating if absent) the heap file at `path`.
    pub fn new(path: impl AsRef<Path>, td: TupleDesc) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let id = table_id_for_path(&path);
        Ok(HeapFile {
            file: Mutex::new(file),
            path,
            td,
            id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DbFile for HeapFile {
    fn id(&self) -> u32 {
        self.id
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }

    fn read_page(&self, pid: PageId) -> Result<HeapPage> {
        if pid.table_id() != self.id {
            return Err(DbError::TableIdMismatch(pid));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start((pid.page_no() * PAGE_SIZE) as u64))?;
            file.read_exact(&mut buf)?;
        }
        HeapPage::new(pid, &buf, self.td.clone())
    }

    fn write_page(&self, page: &HeapPage) -> Result<()> {
        let pid = page.id();
        if pid.table_id() != self.id {
            return Err(DbError::TableIdMismatch(pid));
        }
        let data = page.serialize();
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((pid.page_no() * PAGE_SIZE) as u64))?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    fn num_pages(&self) -> Result<usize> {
        let len = self.file.lock().unwrap().metadata()?.len() as usize;
        Ok(len.div_ceil(PAGE_SIZE))
    }

    fn insert_tuple(
        &self,
        tid: TransactionId,
        t: &mut Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageRef>> {
        // Probe existing pages under READ; only a page with room is worth a
        // write lock. A full page's probe lock is dropped so the probe does
        // not pin pages the transaction never touches again.
        for page_no in 0..self.num_pages()? {
            let pid = PageId::new(self.id, page_no);
            let page = pool.get_page(tid, pid, Permissions::ReadOnly)?;
            let has_room = page.read().unwrap().num_empty_slots() > 0;
            if !has_room {
                pool.release_page(tid, pid);
                continue;
            }
            let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            page.write().unwrap().insert_tuple(t)?;
            return Ok(vec![page]);
        }

        // Every page is full: extend the file with an empty page, then load
        // it through the pool under WRITE. The file mutex serializes
        // concurrent growers onto distinct page numbers.
        let pid = {
            let mut file = self.file.lock().unwrap();
            let page_no = (file.metadata()?.len() as usize).div_ceil(PAGE_SIZE);
            file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
            file.write_all(&HeapPage::empty_page_data(PAGE_SIZE))?;
            file.sync_all()?;
            PageId::new(self.id, page_no)
        };
        let page = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        page.write().unwrap().insert_tuple(t)?;
        Ok(vec![page])
    }

    fn delete_tuple(
        &self,
        tid: TransactionId,
        t: &mut Tuple,
        pool: &BufferPool,
    ) -> Result<Vec<PageRef>> {
        let rid = t.record_id().ok_or(DbError::TupleNotFound)?;
        let page = pool.get_page(tid, rid.page_id(), Permissions::ReadWrite)?;
        page.write().unwrap().delete_tuple(t)?;
        Ok(vec![page])
    }
}

/// Scans every live tuple of a file in ascending (page, slot) order. Pages
/// are fetched through the buffer pool under READ as the scan advances; no
/// page is touched before the scan reaches it.
pub struct HeapFileIterator {
    file: Arc<dyn DbFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    opened: bool,
    next_page: usize,
    current: VecDeque<Tuple>,
}

impl HeapFileIterator {
    pub fn new(file: Arc<dyn DbFile>, tid: TransactionId, pool: Arc<BufferPool>) -> Self {
        HeapFileIterator {
            file,
            pool,
            tid,
            opened: false,
            next_page: 0,
            current: VecDeque::new(),
        }
    }

    pub fn open(&mut self) {
        self.opened = true;
        self.next_page = 0;
        self.current.clear();
    }

    pub fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Ok(false);
        }
        while self.current.is_empty() {
            if self.next_page >= self.file.num_pages()? {
                return Ok(false);
            }
            let pid = PageId::new(self.file.id(), self.next_page);
            self.next_page += 1;
            let page = self.pool.get_page(self.tid, pid, Permissions::ReadOnly)?;
            let guard = page.read().unwrap();
            self.current.extend(guard.iter().cloned());
        }
        Ok(true)
    }

    pub fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(DbError::NoSuchElement);
        }
        Ok(self.current.pop_front().expect("has_next ensured a tuple"))
    }

    pub fn rewind(&mut self) {
        self.next_page = 0;
        self.current.clear();
    }

    pub fn close(&mut self) {
        self.opened = false;
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Database;
    use crate::tuple::{Field, Type};
    use tempfile::tempdir;

    fn int_desc() -> TupleDesc {
        TupleDesc::with_types(vec![Type::Int, Type::Int])
    }

    fn int_tuple(td: &TupleDesc, a: i32, b: i32) -> Tuple {
        Tuple::with_fields(td.clone(), vec![Field::Int(a), Field::Int(b)])
    }

    #[test]
    fn table_id_is_stable_and_path_sensitive() {
        let a = table_id_for_path(Path::new("/tmp/a.dat"));
        let b = table_id_for_path(Path::new("/tmp/b.dat"));
        assert_eq!(a, table_id_for_path(Path::new("/tmp/a.dat")));
        assert_ne!(a, b);
    }

    #[test]
    fn write_page_rejects_foreign_pages() {
        let dir = tempdir().unwrap();
        let td = int_desc();
        let file = HeapFile::new(dir.path().join("t.dat"), td.clone()).unwrap();
        let foreign_pid = PageId::new(file.id().wrapping_add(1), 0);
        let page =
            HeapPage::new(foreign_pid, &HeapPage::empty_page_data(PAGE_SIZE), td).unwrap();
        assert!(matches!(
            file.write_page(&page),
            Err(DbError::TableIdMismatch(_))
        ));
    }

    #[test]
    fn page_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let td = int_desc();
        let file = HeapFile::new(dir.path().join("t.dat"), td.clone()).unwrap();
        let pid = PageId::new(file.id(), 0);
        let mut page =
            HeapPage::new(pid, &HeapPage::empty_page_data(PAGE_SIZE), td.clone()).unwrap();
        let mut t = int_tuple(&td, 17, 23);
        page.insert_tuple(&mut t).unwrap();
        file.write_page(&page).unwrap();
        assert_eq!(file.num_pages().unwrap(), 1);

        let reread = file.read_page(pid).unwrap();
        assert_eq!(reread.serialize(), page.serialize());
    }

    #[test]
    fn insert_grows_file_when_full_and_scan_sees_everything() {
        let dir = tempdir().unwrap();
        let td = int_desc();
        let db = Database::new();
        let file = Arc::new(HeapFile::new(dir.path().join("t.dat"), td.clone()).unwrap());
        db.catalog().add_table(file.clone(), "t", "");

        let per_page = HeapPage::num_tuples(&td, PAGE_SIZE);
        let total = per_page + 3; // spills onto a second page
        let tid = TransactionId::new();
        for i in 0..total {
            let mut t = int_tuple(&td, i as i32, 0);
            db.pool().insert_tuple(tid, file.id(), &mut t).unwrap();
        }
        db.pool().transaction_complete(tid, true).unwrap();
        assert_eq!(file.num_pages().unwrap(), 2);

        let tid2 = TransactionId::new();
        let mut it = HeapFileIterator::new(file.clone(), tid2, Arc::clone(db.pool()));
        it.open();
        let mut seen = Vec::new();
        while it.has_next().unwrap() {
            let t = it.next().unwrap();
            match t.field(0).unwrap() {
                Field::Int(v) => seen.push(*v),
                other => panic!("unexpected field {:?}", other),
            }
        }
        it.close();
        seen.sort_unstable();
        assert_eq!(seen, (0..total as i32).collect::<Vec<_>>());
        db.pool().transaction_complete(tid2, true).unwrap();
    }

    #[test]
    fn iterator_rewind_and_closed_protocol() {
        let dir = tempdir().unwrap();
        let td = int_desc();
        let db = Database::new();
        let file = Arc::new(HeapFile::new(dir.path().join("t.dat"), td.clone()).unwrap());
        db.catalog().add_table(file.clone(), "t", "");

        let tid = TransactionId::new();
        let mut t = int_tuple(&td, 1, 2);
        db.pool().insert_tuple(tid, file.id(), &mut t).unwrap();
        db.pool().transaction_complete(tid, true).unwrap();

        let tid2 = TransactionId::new();
        let mut it = HeapFileIterator::new(file.clone(), tid2, Arc::clone(db.pool()));
        // Not yet open: no tuples.
        assert!(!it.has_next().unwrap());
        it.open();
        assert!(it.has_next().unwrap());
        it.next().unwrap();
        assert!(!it.has_next().unwrap());
        it.rewind();
        assert!(it.has_next().unwrap());
        it.close();
        assert!(!it.has_next().unwrap());
        db.pool().transaction_complete(tid2, true).unwrap();
    }
}
