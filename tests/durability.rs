//! Commit FORCE durability. A transaction dirties a page, commits,
//! and a brand-new `BufferPool` backed by the *same* on-disk file
//! (standing in for a process restart with an empty cache) observes
//! the committed write.

use std::time::Duration;

use tinybase_core::{logging, BufferPool, FilePageStore, LockManager, LockMode, TransactionId};

fn pool_over(dir: &std::path::Path, capacity: usize) -> BufferPool {
    let lm = LockManager::new(Duration::from_millis(500));
    let store = Box::new(FilePageStore::new(dir, 256, 32));
    BufferPool::new(capacity, lm, store)
}

#[test]
fn committed_writes_survive_a_fresh_buffer_pool_over_the_same_file() {
    logging::init();
    let dir = tempfile::tempdir().unwrap();

    let rid = {
        let bp = pool_over(dir.path(), 4);
        let tid = TransactionId::new();
        let rid = bp.insert_tuple(tid, 1, b"durable").unwrap();
        bp.transaction_complete(tid, true).unwrap();
        rid
    };
    // `bp` dropped here: nothing but the file on disk remains.

    let bp2 = pool_over(dir.path(), 4);
    let reader = TransactionId::new();
    let page = bp2.get_page(reader, rid.pid, LockMode::Shared).unwrap();
    assert!(page.payload().windows(7).any(|w| w == b"durable"));
}

#[test]
fn aborted_writes_never_reach_disk() {
    logging::init();
    let dir = tempfile::tempdir().unwrap();

    let rid = {
        let bp = pool_over(dir.path(), 4);
        let tid = TransactionId::new();
        let rid = bp.insert_tuple(tid, 1, b"should-not-persist").unwrap();
        bp.transaction_complete(tid, false).unwrap();
        rid
    };

    let bp2 = pool_over(dir.path(), 4);
    let reader = TransactionId::new();
    let page = bp2.get_page(reader, rid.pid, LockMode::Shared).unwrap();
    assert!(!page
        .payload()
        .windows(19)
        .any(|w| w == b"should-not-persist"));
}
