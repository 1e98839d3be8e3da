use std::collections::VecDeque;

use crate::buffer_pool::BufferPool;
use crate::error::Result;
use crate::lock_mode::LockMode;
use crate::page_id::PageId;
use crate::page_store::decode_tuples;
use crate::transaction_id::TransactionId;

/// A minimal read-only table scan: a page-by-page walk over a heap
/// table exposing `open`/`has_next`/`next`/`rewind`/`close` as well as
/// `std::iter::Iterator` directly.
///
/// `TableScan` is the one intended caller of
/// `BufferPool::unsafe_release_page`: it releases each page's shared
/// lock as soon as it has buffered that page's tuples, rather than
/// holding every page it has ever visited until commit. This
/// sacrifices serializability for the scan itself — a concurrent
/// writer could mutate a page this scan already passed — in exchange
/// for a bounded lock footprint on long scans. No other caller should
/// reach for `unsafe_release_page`.
pub struct TableScan<'a> {
    bp: &'a BufferPool,
    tid: TransactionId,
    table_id: i32,
    next_page_no: u32,
    num_pages: u32,
    buffered: VecDeque<Vec<u8>>,
}

impl<'a> TableScan<'a> {
    pub fn new(bp: &'a BufferPool, tid: TransactionId, table_id: i32) -> Self {
        let mut scan = Self {
            bp,
            tid,
            table_id,
            next_page_no: 0,
            num_pages: 0,
            buffered: VecDeque::new(),
        };
        scan.open();
        scan
    }

    /// Snapshots the table's current page count and resets iteration
    /// to its first page. Re-calling this mid-scan (`rewind`) makes
    /// the scan start over.
    pub fn open(&mut self) {
        self.num_pages = self.bp.store().num_pages(self.table_id) as u32;
        self.next_page_no = 0;
        self.buffered.clear();
    }

    pub fn rewind(&mut self) {
        self.open();
    }

    pub fn close(&mut self) {
        self.buffered.clear();
        self.next_page_no = self.num_pages;
    }

    fn fill_buffer(&mut self) -> Result<()> {
        while self.buffered.is_empty() && self.next_page_no < self.num_pages {
            let pid = PageId::new(self.table_id, self.next_page_no);
            self.next_page_no += 1;

            let page = self.bp.get_page(self.tid, pid, LockMode::Shared)?;
            let tuples = decode_tuples(
                page.payload(),
                self.bp.store().page_size(),
                self.bp.store().tuple_size(),
            );
            self.buffered.extend(tuples.into_iter().map(|(_, bytes)| bytes));

            self.bp.unsafe_release_page(self.tid, pid);
        }
        Ok(())
    }

    pub fn has_next(&mut self) -> Result<bool> {
        self.fill_buffer()?;
        Ok(!self.buffered.is_empty())
    }
}

impl<'a> Iterator for TableScan<'a> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.fill_buffer() {
            Ok(()) => self.buffered.pop_front().map(Ok),
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lock_manager::LockManager;
    use crate::page_store::MemPageStore;
    use std::time::Duration;

    fn pool(capacity: usize) -> BufferPool {
        let cfg = Config::new(256, capacity);
        let lm = LockManager::new(Duration::from_millis(200));
        let store = Box::new(MemPageStore::new(cfg.page_size, 16));
        BufferPool::new(capacity, lm, store)
    }

    #[test]
    fn scan_sees_committed_inserts_and_releases_locks_as_it_goes() {
        let bp = pool(10);
        let writer = TransactionId::new();
        for i in 0..40u8 {
            bp.insert_tuple(writer, 1, &[i]).unwrap();
        }
        bp.transaction_complete(writer, true).unwrap();

        let reader = TransactionId::new();
        let mut scan = TableScan::new(&bp, reader, 1);
        let seen: Vec<u8> = scan
            .by_ref()
            .map(|r| r.unwrap()[0])
            .collect();
        assert_eq!(seen.len(), 40);

        // every page the scan visited should already be unlocked for
        // `reader`, since it hands back each page's shared lock as it
        // moves on to the next one.
        for page_no in 0..scan.num_pages {
            let pid = PageId::new(1, page_no);
            assert!(!bp.holds_lock(reader, pid));
        }
    }

    #[test]
    fn rewind_restarts_from_the_first_page() {
        let bp = pool(10);
        let writer = TransactionId::new();
        bp.insert_tuple(writer, 1, &[7]).unwrap();
        bp.transaction_complete(writer, true).unwrap();

        let reader = TransactionId::new();
        let mut scan = TableScan::new(&bp, reader, 1);
        let first_pass: Vec<u8> = scan.by_ref().map(|r| r.unwrap()[0]).collect();

        scan.rewind();
        let second_pass: Vec<u8> = scan.by_ref().map(|r| r.unwrap()[0]).collect();

        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn abort_isolation_hides_uncommitted_insert_from_a_concurrent_scan() {
        let bp = pool(10);
        let writer = TransactionId::new();
        bp.insert_tuple(writer, 1, &[99]).unwrap();
        bp.transaction_complete(writer, false).unwrap();

        let reader = TransactionId::new();
        let mut scan = TableScan::new(&bp, reader, 1);
        assert!(!scan.has_next().unwrap());
    }
}
