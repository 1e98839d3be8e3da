use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use log::debug;

use crate::buffer_pool::BufferPool;
use crate::error::{DbError, Result};
use crate::lock_mode::LockMode;
use crate::page::Page;
use crate::page_id::PageId;
use crate::transaction_id::TransactionId;

/// A slot within a table's heap pages, identifying one tuple directly
/// rather than requiring a scan to find it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordId {
    pub pid: PageId,
    pub slot: u32,
}

/// The persistent, page-addressable storage a `BufferPool` loads
/// pages from and flushes pages to. Table implementations are heap
/// files: fixed-size slots within fixed-size pages, with a bitmap
/// header marking slot occupancy.
///
/// `insert_tuple`/`delete_tuple` take `&BufferPool` explicitly rather
/// than holding one, since they call back into `BufferPool::get_page`
/// to obtain the pages they modify — passing the pool in as a
/// parameter avoids an ownership cycle between `BufferPool` and its
/// `PageStore`. The mutual recursion is safe because locks are
/// page-granular and reentrant per transaction.
pub trait PageStore: Send + Sync {
    fn read(&self, pid: PageId) -> Result<Vec<u8>>;
    fn write(&self, pid: PageId, payload: &[u8]) -> Result<()>;
    fn num_pages(&self, table_id: i32) -> usize;
    fn page_size(&self) -> usize;
    fn tuple_size(&self) -> usize;

    fn insert_tuple(
        &self,
        bp: &BufferPool,
        tid: TransactionId,
        table_id: i32,
        data: &[u8],
    ) -> Result<(RecordId, Vec<Page>)>;

    fn delete_tuple(
        &self,
        bp: &BufferPool,
        tid: TransactionId,
        rid: RecordId,
    ) -> Result<Vec<Page>>;
}

struct Slots {
    tuple_size: usize,
    slot_count: usize,
    header_size: usize,
}

impl Slots {
    fn for_page(page_size: usize, tuple_size: usize) -> Self {
        let slot_count = (page_size * 8) / (tuple_size * 8 + 1);
        let header_size = (slot_count + 7) / 8;
        Self {
            tuple_size,
            slot_count,
            header_size,
        }
    }

    fn is_used(&self, header: &[u8], slot: usize) -> bool {
        let byte = header[slot / 8];
        (byte & (1 << (7 - slot % 8))) != 0
    }

    fn set_used(&self, header: &mut [u8], slot: usize, used: bool) {
        let mask = 1 << (7 - slot % 8);
        if used {
            header[slot / 8] |= mask;
        } else {
            header[slot / 8] &= !mask;
        }
    }

    fn slot_offset(&self, slot: usize) -> usize {
        self.header_size + slot * self.tuple_size
    }

    fn first_free(&self, header: &[u8]) -> Option<usize> {
        (0..self.slot_count).find(|&s| !self.is_used(header, s))
    }
}

/// Decodes every occupied slot of a page's payload into `(slot,
/// tuple bytes)` pairs, in slot order. Exposed for `scan.rs`'s
/// `TableScan`, which otherwise has no way to read tuples back out of
/// a page it only knows as an opaque `&[u8]` payload.
pub fn decode_tuples(payload: &[u8], page_size: usize, tuple_size: usize) -> Vec<(u32, Vec<u8>)> {
    let slots = Slots::for_page(page_size, tuple_size);
    let (header, body) = payload.split_at(slots.header_size);
    (0..slots.slot_count)
        .filter(|&s| slots.is_used(header, s))
        .map(|s| {
            let start = s * slots.tuple_size;
            (s as u32, body[start..start + slots.tuple_size].to_vec())
        })
        .collect()
}

/// An in-memory `PageStore` backed by a `Vec<Vec<u8>>` per table.
/// Tables are plain unordered heaps, with no index structure.
pub struct MemPageStore {
    page_size: usize,
    tuple_size: usize,
    tables: Mutex<HashMap<i32, Vec<Vec<u8>>>>,
}

impl MemPageStore {
    pub fn new(page_size: usize, tuple_size: usize) -> Self {
        Self {
            page_size,
            tuple_size,
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> Slots {
        Slots::for_page(self.page_size, self.tuple_size)
    }

    fn allocate_page(&self, table_id: i32) -> PageId {
        let mut tables = self.tables.lock().unwrap();
        let pages = tables.entry(table_id).or_insert_with(Vec::new);
        let page_no = pages.len() as u32;
        pages.push(vec![0u8; self.page_size]);
        PageId::new(table_id, page_no)
    }
}

impl PageStore for MemPageStore {
    fn read(&self, pid: PageId) -> Result<Vec<u8>> {
        let tables = self.tables.lock().unwrap();
        let pages = tables
            .get(&pid.table_id)
            .ok_or_else(|| DbError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such table")))?;
        pages
            .get(pid.page_no as usize)
            .cloned()
            .ok_or_else(|| DbError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such page")))
    }

    fn write(&self, pid: PageId, payload: &[u8]) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let pages = tables.entry(pid.table_id).or_insert_with(Vec::new);
        while pages.len() <= pid.page_no as usize {
            pages.push(vec![0u8; self.page_size]);
        }
        pages[pid.page_no as usize] = payload.to_vec();
        Ok(())
    }

    fn num_pages(&self, table_id: i32) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&table_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    fn insert_tuple(
        &self,
        bp: &BufferPool,
        tid: TransactionId,
        table_id: i32,
        data: &[u8],
    ) -> Result<(RecordId, Vec<Page>)> {
        let slots = self.slots();
        let existing = self.num_pages(table_id);

        for page_no in 0..existing {
            let pid = PageId::new(table_id, page_no as u32);
            let mut page = bp.get_page(tid, pid, LockMode::Exclusive)?;
            let payload = page.payload_mut();
            let (header, body) = payload.split_at_mut(slots.header_size);
            if let Some(slot) = slots.first_free(header) {
                slots.set_used(header, slot, true);
                let start = slot * slots.tuple_size;
                let end = start + slots.tuple_size.min(data.len());
                body[start..end].copy_from_slice(&data[..end - start]);
                debug!("inserted tuple into existing page {}, slot {}", pid, slot);
                return Ok((RecordId { pid, slot: slot as u32 }, vec![page]));
            }
        }

        // No free slot anywhere: allocate a fresh page. Its before-image
        // is the all-zero page (what a never-written page reads back
        // as), captured *before* this tuple's bytes land, so aborting
        // this insert rolls the page back to empty rather than to the
        // just-inserted tuple.
        let pid = self.allocate_page(table_id);
        let mut page = Page::new(pid, vec![0u8; self.page_size]);
        let payload = page.payload_mut();
        let (header, body) = payload.split_at_mut(slots.header_size);
        slots.set_used(header, 0, true);
        let end = slots.tuple_size.min(data.len());
        body[..end].copy_from_slice(&data[..end]);

        debug!("inserted tuple into freshly allocated page {}", pid);
        Ok((RecordId { pid, slot: 0 }, vec![page]))
    }

    fn delete_tuple(
        &self,
        bp: &BufferPool,
        tid: TransactionId,
        rid: RecordId,
    ) -> Result<Vec<Page>> {
        let slots = self.slots();
        let mut page = bp.get_page(tid, rid.pid, LockMode::Exclusive)?;
        let payload = page.payload_mut();
        let (header, body) = payload.split_at_mut(slots.header_size);
        slots.set_used(header, rid.slot as usize, false);
        let offset = slots.slot_offset(rid.slot as usize) - slots.header_size;
        for b in &mut body[offset..offset + slots.tuple_size] {
            *b = 0;
        }
        Ok(vec![page])
    }
}

/// A single-file-backed `PageStore`. Each table occupies its own file;
/// pages are fixed-size slabs within it. Used by the durability test
/// to show that a process restart with an empty cache observes a
/// committed transaction's writes.
pub struct FilePageStore {
    page_size: usize,
    tuple_size: usize,
    files: Mutex<HashMap<i32, File>>,
    dir: std::path::PathBuf,
}

impl FilePageStore {
    pub fn new<P: AsRef<Path>>(dir: P, page_size: usize, tuple_size: usize) -> Self {
        std::fs::create_dir_all(&dir).expect("create page store directory");
        Self {
            page_size,
            tuple_size,
            files: Mutex::new(HashMap::new()),
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn slots(&self) -> Slots {
        Slots::for_page(self.page_size, self.tuple_size)
    }

    fn with_file<T>(&self, table_id: i32, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut files = self.files.lock().unwrap();
        let file = files.entry(table_id).or_insert_with(|| {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(self.dir.join(format!("table_{}.db", table_id)))
                .expect("open table file")
        });
        f(file)
    }
}

impl PageStore for FilePageStore {
    fn read(&self, pid: PageId) -> Result<Vec<u8>> {
        self.with_file(pid.table_id, |file| {
            let mut buf = vec![0u8; self.page_size];
            file.seek(SeekFrom::Start((pid.page_no as usize * self.page_size) as u64))?;
            match file.read_exact(&mut buf) {
                Ok(()) => Ok(buf),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(buf),
                Err(e) => Err(DbError::Io(e)),
            }
        })
    }

    fn write(&self, pid: PageId, payload: &[u8]) -> Result<()> {
        self.with_file(pid.table_id, |file| {
            file.seek(SeekFrom::Start((pid.page_no as usize * self.page_size) as u64))?;
            file.write_all(payload)?;
            file.flush()?;
            Ok(())
        })
    }

    fn num_pages(&self, table_id: i32) -> usize {
        self.with_file(table_id, |file| {
            let len = file.metadata()?.len();
            Ok((len as usize + self.page_size - 1) / self.page_size)
        })
        .unwrap_or(0)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    fn insert_tuple(
        &self,
        bp: &BufferPool,
        tid: TransactionId,
        table_id: i32,
        data: &[u8],
    ) -> Result<(RecordId, Vec<Page>)> {
        let slots = self.slots();
        let existing = self.num_pages(table_id);

        for page_no in 0..existing {
            let pid = PageId::new(table_id, page_no as u32);
            let mut page = bp.get_page(tid, pid, LockMode::Exclusive)?;
            let payload = page.payload_mut();
            let (header, body) = payload.split_at_mut(slots.header_size);
            if let Some(slot) = slots.first_free(header) {
                slots.set_used(header, slot, true);
                let start = slot * slots.tuple_size;
                let end = start + slots.tuple_size.min(data.len());
                body[start..end].copy_from_slice(&data[..end - start]);
                return Ok((RecordId { pid, slot: slot as u32 }, vec![page]));
            }
        }

        // Reserve the new page's slot in the file immediately, the same
        // way MemPageStore's `allocate_page` grows its backing `Vec`
        // right away: otherwise two inserts into the same empty table
        // within one transaction would both see `existing == 0` and
        // collide on the same fresh `PageId`. The page is all-zero
        // until this tuple's bytes are written below, so a reader that
        // somehow observed it pre-commit would just see an empty slot,
        // not tentative data.
        let pid = PageId::new(table_id, existing as u32);
        self.write(pid, &vec![0u8; self.page_size])?;

        let mut page = Page::new(pid, vec![0u8; self.page_size]);
        let payload = page.payload_mut();
        let (header, body) = payload.split_at_mut(slots.header_size);
        slots.set_used(header, 0, true);
        let end = slots.tuple_size.min(data.len());
        body[..end].copy_from_slice(&data[..end]);

        Ok((RecordId { pid, slot: 0 }, vec![page]))
    }

    fn delete_tuple(
        &self,
        bp: &BufferPool,
        tid: TransactionId,
        rid: RecordId,
    ) -> Result<Vec<Page>> {
        let slots = self.slots();
        let mut page = bp.get_page(tid, rid.pid, LockMode::Exclusive)?;
        let payload = page.payload_mut();
        let (header, body) = payload.split_at_mut(slots.header_size);
        slots.set_used(header, rid.slot as usize, false);
        let offset = slots.slot_offset(rid.slot as usize) - slots.header_size;
        for b in &mut body[offset..offset + slots.tuple_size] {
            *b = 0;
        }
        Ok(vec![page])
    }
}
