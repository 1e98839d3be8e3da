//! Sustained concurrent insert/delete pressure: several threads
//! hammer the same table with randomized payloads while the capacity
//! bound and the no-dirty-page-evicted invariant must hold
//! throughout.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use tinybase_core::{logging, BufferPool, Config, LockManager, MemPageStore, TransactionId};

fn pool(capacity: usize) -> Arc<BufferPool> {
    let cfg = Config::new(256, capacity);
    let lm = LockManager::new(Duration::from_millis(500));
    let store = Box::new(MemPageStore::new(cfg.page_size, 16));
    Arc::new(BufferPool::new(cfg.capacity, lm, store))
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

#[test]
fn concurrent_inserters_and_deleters_never_violate_capacity_or_dirty_eviction() {
    logging::init();
    let bp = pool(8);
    let table_id = 1;

    // seed a handful of committed rows so deleters have something to
    // chew on from the start.
    let seed = TransactionId::new();
    let mut seeded = Vec::new();
    for _ in 0..20 {
        seeded.push(bp.insert_tuple(seed, table_id, &random_payload(8)).unwrap());
    }
    bp.transaction_complete(seed, true).unwrap();

    let (done_tx, done_rx) = crossbeam::channel::bounded::<()>(6);

    let inserters: Vec<_> = (0..4)
        .map(|_| {
            let bp = Arc::clone(&bp);
            let done_rx = done_rx.clone();
            thread::spawn(move || {
                while done_rx.try_recv().is_err() {
                    let tid = TransactionId::new();
                    let len = rand::thread_rng().gen_range(1, 16);
                    match bp.insert_tuple(tid, table_id, &random_payload(len)) {
                        Ok(_) => {
                            bp.transaction_complete(tid, true).unwrap();
                        }
                        Err(_) => {
                            // all pages dirty right now or a lock-wait
                            // timeout; back off and let the holder
                            // finish.
                            bp.transaction_complete(tid, false).unwrap();
                        }
                    }
                    assert!(bp.len() <= 8);
                }
            })
        })
        .collect();

    let deleters: Vec<_> = (0..2)
        .map(|_| {
            let bp = Arc::clone(&bp);
            let seeded = seeded.clone();
            let done_rx = done_rx.clone();
            thread::spawn(move || {
                while done_rx.try_recv().is_err() {
                    let tid = TransactionId::new();
                    let idx = rand::thread_rng().gen_range(0, seeded.len());
                    let result = bp.delete_tuple(tid, seeded[idx]);
                    bp.transaction_complete(tid, result.is_ok()).unwrap();
                    assert!(bp.len() <= 8);
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(300));
    for _ in 0..6 {
        let _ = done_tx.send(());
    }

    for h in inserters {
        h.join().unwrap();
    }
    for h in deleters {
        h.join().unwrap();
    }

    assert!(bp.len() <= 8);
}
