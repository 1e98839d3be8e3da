use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

use crate::error::Result;
use crate::lock::PageLock;
use crate::lock_mode::LockMode;
use crate::page_id::PageId;
use crate::transaction_id::TransactionId;

/// A fabric of `PageLock`s, indexed per transaction. Each page's lock
/// owns its own mutex/condvar; only the act of creating a new entry in
/// the `PageId -> PageLock` map, or reading/writing the reverse index,
/// is serialized through `LockManager`'s own mutexes. Acquisition
/// itself blocks on the target page's own lock, not on a pool-wide
/// one, so a wait on page A never blocks a concurrent acquisition on
/// unrelated page B.
pub struct LockManager {
    locks: Mutex<HashMap<PageId, Arc<PageLock>>>,
    held_by: Mutex<HashMap<TransactionId, HashSet<PageId>>>,
    pub(crate) default_timeout: Duration,
}

impl LockManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            held_by: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Locates or creates the `PageLock` for `pid`. Race-free: the
    /// double-checked insert under `locks`'s own mutex means two
    /// threads racing to create the same page's lock always end up
    /// sharing one `Arc<PageLock>`.
    fn lock_for(&self, pid: PageId) -> Arc<PageLock> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(pid).or_insert_with(|| {
            debug!("creating new page lock for {}", pid);
            Arc::new(PageLock::new())
        }))
    }

    /// Acquires `mode` on `pid` for `tid`, blocking until granted or
    /// timed out. On success, records `pid` in `tid`'s held-page set.
    /// On timeout, `held_by` is left untouched — nothing is released
    /// eagerly; the caller's subsequent `transaction_complete(tid,
    /// false)` will release whatever `tid` had acquired earlier.
    pub fn acquire(&self, tid: TransactionId, pid: PageId, mode: LockMode) -> Result<()> {
        let lock = self.lock_for(pid);
        match mode {
            LockMode::Shared => lock.acquire_shared(tid, self.default_timeout)?,
            LockMode::Exclusive => lock.acquire_exclusive(tid, self.default_timeout)?,
        }

        self.held_by
            .lock()
            .unwrap()
            .entry(tid)
            .or_insert_with(HashSet::new)
            .insert(pid);
        Ok(())
    }

    /// Releases `tid`'s lock on `pid`. Silent no-op if not held.
    pub fn release(&self, tid: TransactionId, pid: PageId) {
        if let Some(lock) = self.locks.lock().unwrap().get(&pid).cloned() {
            lock.release(tid);
        }
        if let Some(pages) = self.held_by.lock().unwrap().get_mut(&tid) {
            pages.remove(&pid);
        }
    }

    /// Releases every lock `tid` currently holds. Used by commit and
    /// abort.
    pub fn release_all(&self, tid: TransactionId) {
        let pages = self
            .held_by
            .lock()
            .unwrap()
            .remove(&tid)
            .unwrap_or_default();

        let locks = self.locks.lock().unwrap();
        for pid in pages {
            if let Some(lock) = locks.get(&pid) {
                lock.release(tid);
            }
        }
    }

    /// Reports the strongest mode `tid` holds on `pid`, or `None`.
    /// Read-only; never blocks.
    pub fn holds(&self, tid: TransactionId, pid: PageId) -> Option<LockMode> {
        self.locks.lock().unwrap().get(&pid).and_then(|l| l.holds(tid))
    }
}
