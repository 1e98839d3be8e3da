use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::error::{DbError, Result};
use crate::lock_mode::LockMode;
use crate::transaction_id::TransactionId;

/// Per-page lock state: the lock is free iff there are no shared
/// holders and no exclusive holder; it is exclusive iff there is an
/// exclusive holder; otherwise it is shared. `status()` derives this
/// from the holder sets directly rather than tracking a redundant
/// separate flag, so the two can never drift out of sync.
#[derive(Default)]
struct State {
    shared_holders: HashSet<TransactionId>,
    exclusive_holder: Option<TransactionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Free,
    Shared,
    Exclusive,
}

impl State {
    fn status(&self) -> Status {
        if self.exclusive_holder.is_some() {
            Status::Exclusive
        } else if !self.shared_holders.is_empty() {
            Status::Shared
        } else {
            Status::Free
        }
    }

    fn holds(&self, tid: TransactionId) -> Option<LockMode> {
        if self.exclusive_holder == Some(tid) {
            Some(LockMode::Exclusive)
        } else if self.shared_holders.contains(&tid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }
}

/// A single page's shared/exclusive lock: blocking acquisition with
/// in-place upgrade and a bounded wait. Waiters block on a condition
/// variable and are woken on every state change that could unblock
/// them, instead of spinning.
pub struct PageLock {
    state: Mutex<State>,
    cond: Condvar,
}

impl Default for PageLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PageLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    pub fn status(&self) -> Status {
        self.state.lock().unwrap().status()
    }

    pub fn holds(&self, tid: TransactionId) -> Option<LockMode> {
        self.state.lock().unwrap().holds(tid)
    }

    /// Grants shared access to `tid` if (a) the lock is free, (b) it
    /// is already shared, or (c) `tid` itself holds exclusive (an
    /// exclusive holder implicitly holds shared, so an operator that
    /// probes with a shared read before upgrading never deadlocks
    /// against itself). Blocks otherwise, up to `timeout`.
    pub fn acquire_shared(&self, tid: TransactionId, timeout: Duration) -> Result<()> {
        self.acquire(tid, timeout, |state| {
            match state.status() {
                Status::Free | Status::Shared => {
                    state.shared_holders.insert(tid);
                    true
                }
                Status::Exclusive if state.exclusive_holder == Some(tid) => true,
                Status::Exclusive => false,
            }
        })
    }

    /// Grants exclusive access to `tid` if (a) the lock is free, (b)
    /// `tid` already holds exclusive (no-op), or (c) `tid` is the sole
    /// shared holder (in-place upgrade). Blocks otherwise, up to
    /// `timeout`.
    pub fn acquire_exclusive(&self, tid: TransactionId, timeout: Duration) -> Result<()> {
        self.acquire(tid, timeout, |state| match state.status() {
            Status::Free => {
                state.exclusive_holder = Some(tid);
                true
            }
            Status::Exclusive if state.exclusive_holder == Some(tid) => true,
            Status::Exclusive => false,
            Status::Shared
                if state.shared_holders.len() == 1 && state.shared_holders.contains(&tid) =>
            {
                state.shared_holders.clear();
                state.exclusive_holder = Some(tid);
                true
            }
            Status::Shared => false,
        })
    }

    fn acquire(
        &self,
        tid: TransactionId,
        timeout: Duration,
        mut grant: impl FnMut(&mut State) -> bool,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if grant(&mut state) {
                trace!("lock granted to {}", tid);
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("lock wait timeout for {}", tid);
                return Err(DbError::aborted("lock wait timeout"));
            }

            let (guard, timeout_result) = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if timeout_result.timed_out() && !grant(&mut state) {
                warn!("lock wait timeout for {}", tid);
                return Err(DbError::aborted("lock wait timeout"));
            }
            // spurious wakeups are handled by re-checking `grant` above
            // on the next loop iteration regardless.
        }
    }

    /// Releases whatever mode `tid` holds. Idempotent: releasing a
    /// lock not held is a silent no-op.
    pub fn release(&self, tid: TransactionId) {
        let mut state = self.state.lock().unwrap();
        if state.exclusive_holder == Some(tid) {
            state.exclusive_holder = None;
        }
        state.shared_holders.remove(&tid);
        drop(state);
        self.cond.notify_all();
    }
}
